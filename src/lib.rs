//! SD/MMC block device driver written in Embedded Rust, inspired by [embedded-sdmmc](https://crates.io/crates/embedded-sdmmc).
//!
//! This crate is intended to turn an SPI bus and a chip select line into a
//! 512-byte block device: the card is identified and initialized once at
//! construction, then blocks are read and written with `readblocks` /
//! `writeblocks` or through the [`DiskioDevice`] trait.
//!
//! ```rust,ignore
//! let bus = HalSpiBus::new(spi, |spi, hz| spi.set_frequency(hz.Hz()));
//! let cs = Switch::<_, ActiveLow>::new(cs_pin);
//! let sd = SdMmcSpi::<_, _, DefaultSdMmcSpiConfig>::new(bus, cs, DEFAULT_BAUDRATE)
//!     .map_err(|(err, _, _)| err)?;
//!
//! let mut block = [0u8; 512];
//! sd.readblocks(0, &mut block)?;
//! ```
//!
//! ## Features
//!
//! * `log` (default): log messages through the `log` facade.
//! * `defmt-log`: turn off the default features and enable this one to log
//! over defmt instead.

#![cfg_attr(not(test), no_std)]

#[cfg(all(feature = "log", feature = "defmt-log"))]
compile_error!("features `log` and `defmt-log` are mutually exclusive");

#[cfg(not(any(feature = "log", feature = "defmt-log")))]
compile_error!("enable one of the `log` or `defmt-log` features");

mod bus;
mod command;
mod config;
mod consts;
mod crc;
mod csd;
mod init;
mod response;
mod session;
mod transfer;

#[cfg(test)]
mod test;

pub use crate::bus::{HalSpiBus, SpiBus};
pub use crate::config::{DefaultSdMmcSpiConfig, SdMmcSpiConfig};
pub use crate::consts::BLOCK_SIZE;
pub use crate::response::R1Response;
pub use crate::session::{Addressing, CardSession, CardVersion};
pub use diskio::{
    BlockSize, DiskioDevice, Error as DiskioError, IoctlCmd, Lba, Status, StatusFlag,
};
pub use size::Size;

use crate::consts::FILLER;

use core::{cell::RefCell, fmt, marker::PhantomData};
#[cfg(feature = "defmt-log")]
use defmt::{error, info, warn};
#[cfg(feature = "log")]
use log::{error, info, warn};
use switch_hal::OutputSwitch;

/// Operating bus clock rate used when the caller has no preference, Hz.
pub const DEFAULT_BAUDRATE: u32 = 1_320_000;

/// [`SdMmcSpi`] result error.
///
/// `T` - transport error type.
/// `S` - select switch error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<T, S> {
    /// Error from the SPI peripheral.
    Transport(T),
    /// Couldn't set a select.
    SelectError(S),
    /// Card never entered idle state.
    CardNotFound,
    /// Unexpected SEND_IF_COND response.
    UndeterminedVersion(u8),
    /// Card didn't leave idle state during the operating condition handshake.
    HandshakeTimeout(CardVersion),
    /// Card refused to send the Card Specific Data register.
    RegisterReadError,
    /// Unknown CSD_STRUCTURE value.
    UnsupportedCsd(u8),
    /// Card refused 512-byte block length.
    BlockLengthRejected(u8),
    /// No response when executing this command.
    TimeoutCommand(u8),
    /// Command error (command, response).
    ErrorCommand(u8, u8),
    /// No start token when reading data from the card.
    TimeoutReadBuffer,
    /// Card didn't accept written data (data response).
    WriteRejected(u8),
    /// No response when waiting for the card to not be busy.
    TimeoutWaitAvailable,
    /// CRC mismatch (card, host).
    CrcError(u16, u16),
    /// Can't perform this operation with the card in this state.
    BadState,
    /// Blocks past the end of the card, or not addressable (first block).
    OutOfRange(u32),
}

/// Class of an [`Error`].
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Card initialization failed, the driver must be constructed again.
    Init,
    /// Single operation failed.
    Io,
}

impl<T, S> Error<T, S> {
    /// Returns class of the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::CardNotFound
            | Error::UndeterminedVersion(_)
            | Error::HandshakeTimeout(_)
            | Error::RegisterReadError
            | Error::UnsupportedCsd(_)
            | Error::BlockLengthRejected(_) => ErrorKind::Init,
            _ => ErrorKind::Io,
        }
    }

    /// Returns human readable description of the error.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Transport(_) => "SPI transport error",
            Error::SelectError(_) => "chip select error",
            Error::CardNotFound => "no SD card",
            Error::UndeterminedVersion(_) => "couldn't determine SD card version",
            Error::HandshakeTimeout(CardVersion::V1) => "timeout waiting for v1 card",
            Error::HandshakeTimeout(CardVersion::V2) => "timeout waiting for v2 card",
            Error::RegisterReadError => "no response from SD card",
            Error::UnsupportedCsd(_) => "SD card CSD format not supported",
            Error::BlockLengthRejected(_) => "can't set 512 block size",
            Error::TimeoutCommand(_) => "timeout waiting for command response",
            Error::ErrorCommand(_, _) => "command failed",
            Error::TimeoutReadBuffer => "timeout waiting for start token",
            Error::WriteRejected(_) => "data rejected by SD card",
            Error::TimeoutWaitAvailable => "timeout waiting for SD card to be ready",
            Error::CrcError(_, _) => "data CRC mismatch",
            Error::BadState => "SD card is not initialized",
            Error::OutOfRange(_) => "block out of range",
        }
    }
}

impl<T: fmt::Debug, S: fmt::Debug> fmt::Display for Error<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Transport(err) => write!(f, "{}: {:?}", self.reason(), err),
            Error::SelectError(err) => write!(f, "{}: {:?}", self.reason(), err),
            Error::UndeterminedVersion(r1)
            | Error::BlockLengthRejected(r1)
            | Error::WriteRejected(r1) => write!(f, "{} (0x{:02X})", self.reason(), r1),
            Error::UnsupportedCsd(structure) => {
                write!(f, "{} (structure {})", self.reason(), structure)
            }
            Error::TimeoutCommand(cmd) => write!(f, "{} (CMD{})", self.reason(), cmd),
            Error::OutOfRange(block) => write!(f, "{} (block {})", self.reason(), block),
            Error::ErrorCommand(cmd, r1) => {
                write!(f, "{} (CMD{}, 0x{:02X})", self.reason(), cmd, r1)
            }
            Error::CrcError(card, host) => {
                write!(f, "{} (card 0x{:04X}, host 0x{:04X})", self.reason(), card, host)
            }
            _ => f.write_str(self.reason()),
        }
    }
}

/// Operations of [`SdMmcSpi::ioctl`], numbered after the MicroPython block
/// device protocol.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoctlOp {
    Init = 1,
    Deinit = 2,
    Sync = 3,
    BlockCount = 4,
    BlockSize = 5,
    BlockErase = 6,
}

impl TryFrom<u8> for IoctlOp {
    type Error = u8;

    fn try_from(op: u8) -> Result<Self, Self::Error> {
        match op {
            1 => Ok(IoctlOp::Init),
            2 => Ok(IoctlOp::Deinit),
            3 => Ok(IoctlOp::Sync),
            4 => Ok(IoctlOp::BlockCount),
            5 => Ok(IoctlOp::BlockSize),
            6 => Ok(IoctlOp::BlockErase),
            other => Err(other),
        }
    }
}

/// Error type alias.
type ErrorFor<Spi, Cs> = Error<<Spi as SpiBus>::Error, <Cs as OutputSwitch>::Error>;

/// SD Card SPI driver.
///
/// `Spi` - SPI bus.
/// `Cs` - Chip select output switch, `on` selects the card.
/// `Config` - Config implementation of driver config trait.
pub struct SdMmcSpi<Spi: SpiBus, Cs: OutputSwitch, Config: SdMmcSpiConfig = DefaultSdMmcSpiConfig>
{
    spi: RefCell<Spi>,
    cs: RefCell<Cs>,
    status: Status,
    session: CardSession,
    baudrate: u32,
    config: PhantomData<Config>,
}

impl<Spi: SpiBus, Cs: OutputSwitch, Config: SdMmcSpiConfig> SdMmcSpi<Spi, Cs, Config>
where
    Cs::Error: fmt::Debug,
{
    /// Creates a new [`SdMmcSpi<Spi, Cs, Config>`] and initializes the card.
    ///
    /// `spi` - SPI bus.
    /// `cs` - chip select output switch.
    /// `baudrate` - bus clock rate once the card is initialized, Hz.
    ///
    /// On failure the bus and the switch are handed back with the error.
    #[allow(clippy::type_complexity)]
    pub fn new(spi: Spi, cs: Cs, baudrate: u32) -> Result<Self, (ErrorFor<Spi, Cs>, Spi, Cs)> {
        let mut sd = SdMmcSpi {
            spi: RefCell::new(spi),
            cs: RefCell::new(cs),
            status: StatusFlag::NotInitialized.into(),
            session: CardSession::new(CardVersion::V1, 0, Addressing::Byte, Config::INIT_BAUDRATE),
            baudrate,
            config: PhantomData::<Config>,
        };

        match sd.init() {
            Ok(()) => Ok(sd),
            Err(err) => {
                let (spi, cs) = sd.free();
                Err((err, spi, cs))
            }
        }
    }

    /// Releases chip select and returns the bus and the switch.
    pub fn free(self) -> (Spi, Cs) {
        if let Err(err) = self.unselect() {
            warn!("Failed to release SD chip select: {}", err.reason());
        }

        (self.spi.into_inner(), self.cs.into_inner())
    }

    /// Session of the initialized card.
    pub fn session(&self) -> &CardSession {
        &self.session
    }

    /// Card protocol version.
    pub fn version(&self) -> CardVersion {
        self.session.version()
    }

    /// Count of 512-byte blocks.
    pub fn block_count(&self) -> u32 {
        self.session.block_count()
    }

    /// Card capacity.
    pub fn card_capacity(&self) -> Size {
        self.session.card_capacity()
    }

    /// Current bus clock rate, Hz.
    pub fn clock_rate(&self) -> u32 {
        self.session.clock_rate()
    }

    /// Read blocks starting at `block_number`.
    ///
    /// # Panics
    ///
    /// If `buf` length is not a positive multiple of [`BLOCK_SIZE`].
    pub fn readblocks(&self, block_number: u32, buf: &mut [u8]) -> Result<(), ErrorFor<Spi, Cs>> {
        assert!(is_valid_buffer_len(buf.len()), "Buffer length is invalid");
        self.validate_ready()?;

        self.read_blocks(block_number, buf)
    }

    /// Write blocks starting at `block_number`.
    ///
    /// # Panics
    ///
    /// If `buf` length is not a positive multiple of [`BLOCK_SIZE`].
    pub fn writeblocks(&self, block_number: u32, buf: &[u8]) -> Result<(), ErrorFor<Spi, Cs>> {
        assert!(is_valid_buffer_len(buf.len()), "Buffer length is invalid");
        self.validate_ready()?;

        self.write_blocks(block_number, buf)
    }

    /// Block device control.
    ///
    /// Returns a value for the queries (`BlockCount`, `BlockSize`), `None`
    /// for the other operations.
    pub fn ioctl(&self, op: IoctlOp, _arg: u32) -> Result<Option<u32>, ErrorFor<Spi, Cs>> {
        match op {
            IoctlOp::Init => self.validate_ready().map(|_| None),
            IoctlOp::Deinit | IoctlOp::BlockErase => Ok(None),
            IoctlOp::Sync => {
                self.validate_ready()?;
                self.wait_available().map(|_| None)
            }
            IoctlOp::BlockCount => Ok(Some(self.session.block_count())),
            IoctlOp::BlockSize => Ok(Some(consts::BLOCK_SIZE_U32)),
        }
    }

    /// Validate initialized.
    fn validate_ready(&self) -> Result<(), ErrorFor<Spi, Cs>> {
        if self.status.contains(StatusFlag::NotInitialized) {
            Err(Error::BadState)
        } else {
            Ok(())
        }
    }

    /// Delay.
    fn delay(cycles: usize) {
        for i in 0..cycles {
            unsafe { core::ptr::read_volatile(&i) };
        }
    }

    /// Activate chip select.
    fn select(&self) -> Result<(), ErrorFor<Spi, Cs>> {
        self.cs.borrow_mut().on().map_err(Error::SelectError)
    }

    /// Deactivate chip select.
    fn unselect(&self) -> Result<(), ErrorFor<Spi, Cs>> {
        self.cs.borrow_mut().off().map_err(Error::SelectError)
    }

    /// Deactivate chip select and clock one more byte so the card releases
    /// the data line.
    fn release(&self) -> Result<(), ErrorFor<Spi, Cs>> {
        self.unselect()?;
        self.send(FILLER)
    }

    /// Receive a byte from the SD card by clocking in an 0xFF byte.
    fn receive(&self) -> Result<u8, ErrorFor<Spi, Cs>> {
        bus::receive(&mut *self.spi.borrow_mut()).map_err(Error::Transport)
    }

    /// Send a byte to the SD card.
    fn send(&self, data: u8) -> Result<(), ErrorFor<Spi, Cs>> {
        self.send_slice(&[data])
    }

    /// Send a slice to the SD card.
    fn send_slice(&self, data: &[u8]) -> Result<(), ErrorFor<Spi, Cs>> {
        self.spi.borrow_mut().write(data).map_err(Error::Transport)
    }

    /// Receive a slice from the SD card, clocking out filler bytes.
    fn receive_slice(&self, data: &mut [u8]) -> Result<(), ErrorFor<Spi, Cs>> {
        const FILLER_BLOCK: [u8; consts::BLOCK_SIZE] = [FILLER; consts::BLOCK_SIZE];

        let mut spi = self.spi.borrow_mut();
        for chunk in data.chunks_mut(consts::BLOCK_SIZE) {
            spi.write_read(&FILLER_BLOCK[..chunk.len()], chunk)
                .map_err(Error::Transport)?;
        }

        Ok(())
    }

    /// Skip byte.
    fn skip_byte(&self) -> Result<(), ErrorFor<Spi, Cs>> {
        self.receive().map(|_| ())
    }

    /// Set bus clock rate.
    fn set_baudrate(&self, baudrate: u32) -> Result<(), ErrorFor<Spi, Cs>> {
        self.spi
            .borrow_mut()
            .set_baudrate(baudrate)
            .map_err(Error::Transport)
    }

    /// Initialize SD.
    fn init(&mut self) -> Result<(), ErrorFor<Spi, Cs>> {
        info!("SD initialize started");
        self.status = StatusFlag::NotInitialized.into();

        match self.run_init() {
            Ok(session) => {
                self.session = session;
                self.status = Status::default();
                info!(
                    "SD successfully initialized, blocks: {}, clock: {} Hz",
                    session.block_count(),
                    session.clock_rate()
                );
                Ok(())
            }
            Err(err) => {
                error!("Failed to initialize SD: {}", err.reason());
                self.status = StatusFlag::ErrorOccured | StatusFlag::NotInitialized;
                if let Err(unselect_err) = self.unselect() {
                    warn!("Failed to release SD chip select: {}", unselect_err.reason());
                }
                Err(err)
            }
        }
    }
}

/// Buffers must hold a whole, non-zero number of blocks.
fn is_valid_buffer_len(buf_len: usize) -> bool {
    buf_len != 0 && buf_len % consts::BLOCK_SIZE == 0
}

impl<Spi: SpiBus, Cs: OutputSwitch, Config: SdMmcSpiConfig> DiskioDevice
    for SdMmcSpi<Spi, Cs, Config>
where
    Cs::Error: fmt::Debug,
{
    type HardwareError = ErrorFor<Spi, Cs>;

    fn status(&self) -> Status {
        self.status
    }

    fn reset(&mut self) {
        info!("SD reset invoked");
        self.status = StatusFlag::NotInitialized.into();
    }

    fn initialize(&mut self) -> Result<(), DiskioError<Self::HardwareError>> {
        if !self.status.contains(StatusFlag::NotInitialized) {
            warn!("SD already is initialized");
            return Err(DiskioError::AlreadyInitialized);
        }

        self.init().map_err(DiskioError::Hardware)
    }

    fn read(&self, buf: &mut [u8], lba: Lba) -> Result<(), DiskioError<Self::HardwareError>> {
        if !is_valid_buffer_len(buf.len()) {
            error!("SD invalid buffer, length: {}", buf.len());
            return Err(DiskioError::InvalidArgument);
        }
        if self.validate_ready().is_err() {
            return Err(DiskioError::NotInitialized);
        }

        let block_number = u32::try_from(lba).map_err(|_| DiskioError::InvalidArgument)?;

        self.read_blocks(block_number, buf)
            .map_err(DiskioError::Hardware)
    }

    fn write(&self, buf: &[u8], lba: Lba) -> Result<(), DiskioError<Self::HardwareError>> {
        if !is_valid_buffer_len(buf.len()) {
            error!("SD invalid buffer, length: {}", buf.len());
            return Err(DiskioError::InvalidArgument);
        }
        if self.validate_ready().is_err() {
            return Err(DiskioError::NotInitialized);
        }

        let block_number = u32::try_from(lba).map_err(|_| DiskioError::InvalidArgument)?;

        self.write_blocks(block_number, buf)
            .map_err(DiskioError::Hardware)
    }

    fn ioctl(&self, cmd: IoctlCmd) -> Result<(), DiskioError<Self::HardwareError>> {
        match cmd {
            IoctlCmd::CtrlSync => self.wait_available().map_err(DiskioError::Hardware),
            IoctlCmd::GetBlockSize(block_size) => {
                *block_size = consts::BLOCK_SIZE;
                Ok(())
            }
            _ => Err(DiskioError::NotSupported),
        }
    }
}
