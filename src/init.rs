//! Card identification and initialization state machine.

use crate::{
    command::Command,
    consts::{
        args::{HCS, IF_COND, R7_LEN},
        commands::{ACMD41, CMD0, CMD16, CMD58, CMD8, CMD9},
        BLOCK_SIZE_U32, FILLER,
    },
    csd::{CapacityProvider, Csd, CsdData},
    response::R1Response,
    Addressing, CardSession, CardVersion, Error, ErrorFor, SdMmcSpi, SdMmcSpiConfig, SpiBus,
};

use core::fmt::Debug;
#[cfg(feature = "defmt-log")]
use defmt::{debug, error, warn};
#[cfg(feature = "log")]
use log::{debug, error, warn};
use switch_hal::OutputSwitch;

/// Initialization step. Failure of any step ends the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitState {
    Reset,
    VersionProbe,
    V1Handshake,
    V2Handshake,
    CapacityQuery {
        version: CardVersion,
        addressing: Addressing,
    },
    BlockSizeFix {
        version: CardVersion,
        addressing: Addressing,
        block_count: u32,
    },
    SpeedPromote {
        version: CardVersion,
        addressing: Addressing,
        block_count: u32,
    },
    Ready(CardSession),
}

impl<Spi: SpiBus, Cs: OutputSwitch, Config: SdMmcSpiConfig> SdMmcSpi<Spi, Cs, Config>
where
    Cs::Error: Debug,
{
    /// Run the whole initialization sequence and return the new session.
    pub(crate) fn run_init(&self) -> Result<CardSession, ErrorFor<Spi, Cs>> {
        let mut state = InitState::Reset;

        loop {
            state = match state {
                InitState::Reset => self.reset_card()?,
                InitState::VersionProbe => self.probe_version()?,
                InitState::V1Handshake => self.v1_handshake()?,
                InitState::V2Handshake => self.v2_handshake()?,
                InitState::CapacityQuery {
                    version,
                    addressing,
                } => self.query_capacity(version, addressing)?,
                InitState::BlockSizeFix {
                    version,
                    addressing,
                    block_count,
                } => self.fix_block_size(version, addressing, block_count)?,
                InitState::SpeedPromote {
                    version,
                    addressing,
                    block_count,
                } => {
                    self.set_baudrate(self.baudrate)?;
                    InitState::Ready(CardSession::new(
                        version,
                        block_count,
                        addressing,
                        self.baudrate,
                    ))
                }
                InitState::Ready(session) => return Ok(session),
            };
        }
    }

    /// Put the card into SPI mode and idle state.
    fn reset_card(&self) -> Result<InitState, ErrorFor<Spi, Cs>> {
        self.set_baudrate(Config::INIT_BAUDRATE)?;
        self.unselect()?;

        // At least 74 clock cycles with chip select released.
        for _ in 0..Config::SETTLE_BYTES {
            self.send(FILLER)?;
        }

        for attempt in 0..Config::GO_IDLE_ATTEMPTS {
            debug!("Enter to SPI mode for SD, attempt: {}", attempt + 1);

            match self.try_issue(Command::new(CMD0, 0))? {
                Some(R1Response::IN_IDLE_STATE) => return Ok(InitState::VersionProbe),
                Some(r1) => warn!("Wrong response from CMD0: 0x{:02X}", r1.bits()),
                None => {}
            }
        }

        error!("SD card not found");
        Err(Error::CardNotFound)
    }

    /// Tell v1 cards from v2 cards by SEND_IF_COND.
    fn probe_version(&self) -> Result<InitState, ErrorFor<Spi, Cs>> {
        match self.try_issue(Command::new(CMD8, IF_COND).trailing(R7_LEN))? {
            Some(R1Response::IN_IDLE_STATE) => {
                debug!("SD card version 2");
                Ok(InitState::V2Handshake)
            }
            Some(R1Response::IN_IDLE_AND_ILLEGAL) => {
                debug!("SD card version 1");
                Ok(InitState::V1Handshake)
            }
            r1 => {
                let r1 = r1.map_or(FILLER, |r1| r1.bits());
                error!("Unexpected response from CMD8: 0x{:02X}", r1);
                Err(Error::UndeterminedVersion(r1))
            }
        }
    }

    fn v1_handshake(&self) -> Result<InitState, ErrorFor<Spi, Cs>> {
        for _ in 0..Config::HANDSHAKE_ATTEMPTS {
            if self.try_issue_app(Command::new(ACMD41, 0))? == Some(R1Response::READY_STATE) {
                return Ok(InitState::CapacityQuery {
                    version: CardVersion::V1,
                    addressing: Addressing::Byte,
                });
            }
        }

        Err(Error::HandshakeTimeout(CardVersion::V1))
    }

    fn v2_handshake(&self) -> Result<InitState, ErrorFor<Spi, Cs>> {
        for _ in 0..Config::HANDSHAKE_ATTEMPTS {
            Self::delay(Config::HANDSHAKE_DELAY_CYCLES);

            self.try_issue(Command::new(CMD58, 0).trailing(R7_LEN))?;
            if self.try_issue_app(Command::new(ACMD41, HCS))? == Some(R1Response::READY_STATE) {
                self.try_issue(Command::new(CMD58, 0).trailing(R7_LEN))?;

                return Ok(InitState::CapacityQuery {
                    version: CardVersion::V2,
                    addressing: Addressing::Block,
                });
            }
        }

        Err(Error::HandshakeTimeout(CardVersion::V2))
    }

    /// Read and decode the CSD register.
    fn query_capacity(
        &self,
        version: CardVersion,
        addressing: Addressing,
    ) -> Result<InitState, ErrorFor<Spi, Cs>> {
        match self.try_issue(Command::new(CMD9, 0).hold())? {
            Some(R1Response::READY_STATE) => {}
            Some(r1) => {
                error!("CSD read refused: 0x{:02X}", r1.bits());
                self.release()?;
                return Err(Error::RegisterReadError);
            }
            None => {
                error!("No response from CMD9");
                return Err(Error::RegisterReadError);
            }
        }

        let mut csd_data: CsdData = Default::default();
        self.read_frame(&mut csd_data)?;

        let csd = Csd::try_from(csd_data).map_err(|structure| {
            error!("Unsupported CSD structure: {}", structure);
            Error::UnsupportedCsd(structure)
        })?;

        Ok(InitState::BlockSizeFix {
            version,
            addressing,
            block_count: csd.card_capacity_blocks(),
        })
    }

    fn fix_block_size(
        &self,
        version: CardVersion,
        addressing: Addressing,
        block_count: u32,
    ) -> Result<InitState, ErrorFor<Spi, Cs>> {
        match self.try_issue(Command::new(CMD16, BLOCK_SIZE_U32))? {
            Some(R1Response::READY_STATE) => {}
            r1 => {
                let r1 = r1.map_or(FILLER, |r1| r1.bits());
                error!("Can't set 512 block size: 0x{:02X}", r1);
                return Err(Error::BlockLengthRejected(r1));
            }
        }

        Ok(InitState::SpeedPromote {
            version,
            addressing,
            block_count,
        })
    }
}
