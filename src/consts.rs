/// Size of data block.
pub const BLOCK_SIZE: usize = 512;
/// Size of data block as `u32`.
pub const BLOCK_SIZE_U32: u32 = BLOCK_SIZE as u32;
/// Size of data block as `u64`.
pub const BLOCK_SIZE_U64: u64 = BLOCK_SIZE as u64;
/// Value clocked out while receiving.
pub const FILLER: u8 = 0xFF;

pub mod commands {
    /// Start and transmission bits of the first frame byte.
    pub const CMD_BASE: u8 = 0x40;
    /// GO_IDLE_STATE - init card in spi mode if CS low.
    pub const CMD0: u8 = 0;
    /// SEND_IF_COND - verify SD Memory Card interface operating condition.
    pub const CMD8: u8 = 8;
    /// SEND_CSD - read the Card Specific Data (CSD register).
    pub const CMD9: u8 = 9;
    /// STOP_TRANSMISSION - end multiple block read sequence.
    pub const CMD12: u8 = 12;
    /// SET_BLOCKLEN - set block length for standard capacity cards.
    pub const CMD16: u8 = 16;
    /// READ_SINGLE_BLOCK - read a single data block from the card.
    pub const CMD17: u8 = 17;
    /// READ_MULTIPLE_BLOCK - read a multiple data blocks from the card.
    pub const CMD18: u8 = 18;
    /// WRITE_BLOCK - write a single data block to the card.
    pub const CMD24: u8 = 24;
    /// WRITE_MULTIPLE_BLOCK - write blocks of data until a STOP_TRANSMISSION.
    pub const CMD25: u8 = 25;
    /// SD_SEND_OP_COMD - Sends host capacity support information and activates
    /// the card's initialization process. Must follow [`CMD55`].
    pub const ACMD41: u8 = 41;
    /// APP_CMD - escape for application specific command.
    pub const CMD55: u8 = 55;
    /// READ_OCR - read the OCR register of a card.
    pub const CMD58: u8 = 58;
}

pub mod args {
    /// SEND_IF_COND: 2.7-3.6V range and `0xAA` check pattern.
    pub const IF_COND: u32 = 0x0000_01AA;
    /// SD_SEND_OP_COMD: host supports high capacity cards.
    pub const HCS: u32 = 0x4000_0000;
    /// Length of R7 and R3 payload following R1.
    pub const R7_LEN: usize = 4;
}

pub mod tokens {
    /// Start data token for read or write single block.
    pub const DATA_START_BLOCK: u8 = 0xFE;
    /// Stop token for write multiple blocks.
    pub const STOP_TRAN: u8 = 0xFD;
    /// Start data token for write multiple blocks.
    pub const WRITE_MULTIPLE: u8 = 0xFC;
    /// Mask for data response tokens after a write block operation.
    pub const DATA_RES_MASK: u8 = 0x1F;
    /// Write data accepted token.
    pub const DATA_RES_ACCEPTED: u8 = 0x05;
    /// Value held on the line while the card is programming.
    pub const BUSY: u8 = 0x00;
}
