use crate::consts::BLOCK_SIZE_U64;

use bitfield::bitfield;
use size::Size;

/// Card Specific Data block.
pub type CsdData = [u8; 16];

/// CSD_STRUCTURE of version 1.0 (standard capacity).
const CSD_STRUCTURE_V1: u8 = 0b00;
/// CSD_STRUCTURE of version 2.0 (high and extended capacity).
const CSD_STRUCTURE_V2: u8 = 0b01;
/// READ_BL_LEN exponent of a 512 byte block.
const READ_BL_LEN_512: u8 = 9;

bitfield! {
    /// Card Specific Data, version 1.
    pub struct CsdV1(u128);
    pub u8, read_block_length, _: 83, 80;
    pub u16, device_size, _: 73, 62;
    pub u8, device_size_multiplier, _: 49, 47;
}

bitfield! {
    /// Card Specific Data, version 2.
    pub struct CsdV2(u128);
    // Low 16 bits of C_SIZE, enough to describe cards up to 32 GiB.
    pub u16, device_size, _: 63, 48;
}

/// Card Specific Data, generic container.
pub enum Csd {
    V1(CsdV1),
    V2(CsdV2),
}

/// Represents capacity provider.
pub trait CapacityProvider {
    /// Returns the card capacity in bytes.
    fn card_capacity(&self) -> Size {
        Size::from_bytes(u64::from(self.card_capacity_blocks()) * BLOCK_SIZE_U64)
    }

    /// Returns the card capacity in 512-byte blocks.
    fn card_capacity_blocks(&self) -> u32;
}

impl From<CsdData> for CsdV1 {
    fn from(csd_data: CsdData) -> Self {
        CsdV1(u128::from_be_bytes(csd_data))
    }
}

impl From<CsdData> for CsdV2 {
    fn from(csd_data: CsdData) -> Self {
        CsdV2(u128::from_be_bytes(csd_data))
    }
}

impl TryFrom<CsdData> for Csd {
    /// Unsupported CSD_STRUCTURE value.
    type Error = u8;

    fn try_from(csd_data: CsdData) -> Result<Self, Self::Error> {
        match csd_data[0] >> 6 {
            CSD_STRUCTURE_V1 => Ok(Csd::V1(CsdV1::from(csd_data))),
            CSD_STRUCTURE_V2 => Ok(Csd::V2(CsdV2::from(csd_data))),
            other => Err(other),
        }
    }
}

impl CapacityProvider for CsdV1 {
    /// `(C_SIZE + 1) * 2^(C_SIZE_MULT + 2)` blocks of READ_BL_LEN, counted in
    /// 512-byte blocks.
    fn card_capacity_blocks(&self) -> u32 {
        let block_len_shift = self.read_block_length().saturating_sub(READ_BL_LEN_512);

        (u32::from(self.device_size()) + 1)
            << (self.device_size_multiplier() + 2 + block_len_shift)
    }
}

impl CapacityProvider for CsdV2 {
    fn card_capacity_blocks(&self) -> u32 {
        (u32::from(self.device_size()) + 1) * 1024
    }
}

impl CapacityProvider for Csd {
    fn card_capacity_blocks(&self) -> u32 {
        match self {
            Csd::V1(csd) => csd.card_capacity_blocks(),
            Csd::V2(csd) => csd.card_capacity_blocks(),
        }
    }
}
