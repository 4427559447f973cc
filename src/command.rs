//! Command frames and the R1 response poll.

use crate::{
    consts::commands::{CMD55, CMD_BASE},
    crc::crc7,
    response::R1Response,
    Error, ErrorFor, SdMmcSpi, SdMmcSpiConfig, SpiBus,
};

use core::fmt::Debug;
#[cfg(feature = "defmt-log")]
use defmt::{trace, warn};
#[cfg(feature = "log")]
use log::{trace, warn};
use switch_hal::OutputSwitch;

/// Card command and the way its transaction ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Command {
    index: u8,
    arg: u32,
    trailing_bytes: usize,
    release: bool,
    skip_first_poll_byte: bool,
}

impl Command {
    /// Command released as soon as the response arrives.
    pub fn new(index: u8, arg: u32) -> Self {
        Command {
            index,
            arg,
            trailing_bytes: 0,
            release: true,
            skip_first_poll_byte: false,
        }
    }

    /// Keep chip select asserted after the response, data follows.
    pub fn hold(mut self) -> Self {
        self.release = false;
        self
    }

    /// Clock `count` bytes after R1 (R3/R7 payload).
    pub fn trailing(mut self, count: usize) -> Self {
        self.trailing_bytes = count;
        self
    }

    /// Discard the byte the card echoes right after the frame.
    pub fn skip_first_poll_byte(mut self) -> Self {
        self.skip_first_poll_byte = true;
        self
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    /// Start byte, big-endian argument, CRC-7 with end bit.
    pub fn frame(&self) -> [u8; 6] {
        let arg = self.arg.to_be_bytes();
        let mut buf = [CMD_BASE | self.index, arg[0], arg[1], arg[2], arg[3], 0];
        let crc_index = buf.len() - 1;

        buf[crc_index] = (crc7(&buf[..crc_index]) << 1) | 0x01;

        buf
    }
}

impl<Spi: SpiBus, Cs: OutputSwitch, Config: SdMmcSpiConfig> SdMmcSpi<Spi, Cs, Config>
where
    Cs::Error: Debug,
{
    /// Send command and poll its R1 response.
    ///
    /// Chip select stays asserted on success unless the command releases it,
    /// it is always released on timeout.
    pub(crate) fn issue(&self, command: Command) -> Result<R1Response, ErrorFor<Spi, Cs>> {
        trace!("CMD{} arg 0x{:08X}", command.index, command.arg);

        self.select()?;
        self.send_slice(&command.frame())?;

        if command.skip_first_poll_byte {
            self.skip_byte()?;
        }

        for _ in 0..Config::CMD_RESPONSE_ATTEMPTS {
            let r1 = R1Response::from(self.receive()?);

            if r1.is_valid() {
                for _ in 0..command.trailing_bytes {
                    self.skip_byte()?;
                }
                if command.release {
                    self.release()?;
                }

                return Ok(r1);
            }
        }

        self.release()?;
        warn!("No response from CMD{}", command.index);

        Err(Error::TimeoutCommand(command.index))
    }

    /// Issue command, a missing response is not an error.
    pub(crate) fn try_issue(
        &self,
        command: Command,
    ) -> Result<Option<R1Response>, ErrorFor<Spi, Cs>> {
        match self.issue(command) {
            Ok(r1) => Ok(Some(r1)),
            Err(Error::TimeoutCommand(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Issue application specific command, prefixed by APP_CMD.
    pub(crate) fn try_issue_app(
        &self,
        command: Command,
    ) -> Result<Option<R1Response>, ErrorFor<Spi, Cs>> {
        self.try_issue(Command::new(CMD55, 0))?;
        self.try_issue(command)
    }
}
