use bitfield::bitfield;

bitfield! {
    /// R1 response bitset.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct R1Response(u8);
    impl Debug;
    pub in_idle_state, _: 0;
    pub erase_reset, _: 1;
    pub illegal_command, _: 2;
    pub command_crc_error, _: 3;
    pub erase_sequence_error, _: 4;
    pub address_error, _: 5;
    pub parameter_error, _: 6;
    pub not_ready, _: 7;
}

impl R1Response {
    /// Card is ready, no error flags.
    pub const READY_STATE: R1Response = R1Response(0x00);
    /// Card is in idle state.
    pub const IN_IDLE_STATE: R1Response = R1Response(0x01);
    /// Card is in idle state and rejected the command.
    pub const IN_IDLE_AND_ILLEGAL: R1Response = R1Response(0x05);

    /// Response byte as received.
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// The card drives the response with bit 7 cleared.
    pub fn is_valid(&self) -> bool {
        !self.not_ready()
    }
}

impl From<u8> for R1Response {
    fn from(byte: u8) -> Self {
        R1Response(byte)
    }
}
