use crate::consts::{BLOCK_SIZE_U32, BLOCK_SIZE_U64};

use size::Size;

/// Card protocol version, as detected by SEND_IF_COND.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardVersion {
    /// Legacy card, rejects SEND_IF_COND.
    V1,
    /// Physical layer 2.0 or later.
    V2,
}

/// How block numbers map to card addresses.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// Standard capacity cards take byte addresses.
    Byte,
    /// High capacity cards take block addresses.
    Block,
}

impl Addressing {
    /// Factor from a block number to a card address.
    pub fn multiplier(&self) -> u32 {
        match self {
            Addressing::Byte => BLOCK_SIZE_U32,
            Addressing::Block => 1,
        }
    }
}

/// State of an initialized card. Never changes after initialization.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardSession {
    version: CardVersion,
    block_count: u32,
    addressing: Addressing,
    clock_rate: u32,
}

impl CardSession {
    pub(crate) fn new(
        version: CardVersion,
        block_count: u32,
        addressing: Addressing,
        clock_rate: u32,
    ) -> Self {
        CardSession {
            version,
            block_count,
            addressing,
            clock_rate,
        }
    }

    /// Card protocol version.
    pub fn version(&self) -> CardVersion {
        self.version
    }

    /// Count of 512-byte blocks.
    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    /// Card capacity.
    pub fn card_capacity(&self) -> Size {
        Size::from_bytes(u64::from(self.block_count) * BLOCK_SIZE_U64)
    }

    /// Block number to card address conversion.
    pub fn addressing(&self) -> Addressing {
        self.addressing
    }

    /// Operating bus clock rate, Hz.
    pub fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    /// Card address of the first of `blocks` blocks starting at
    /// `block_number`, `None` if the run doesn't fit the card.
    pub fn address(&self, block_number: u32, blocks: u32) -> Option<u32> {
        match block_number.checked_add(blocks) {
            Some(end) if end <= self.block_count => {
                block_number.checked_mul(self.addressing.multiplier())
            }
            _ => None,
        }
    }
}
