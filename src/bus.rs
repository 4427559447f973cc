//! Bus transport seam between the driver and the platform SPI peripheral.

use crate::consts::FILLER;

use embedded_hal::blocking::spi::{Transfer, Write};

/// Full-duplex byte bus the card is attached to.
///
/// Chip select is not part of the bus, it is driven separately so bytes can
/// be clocked with the card deselected.
pub trait SpiBus {
    /// Transport error.
    type Error: core::fmt::Debug;

    /// Write bytes, discarding whatever is clocked in.
    fn write(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Read `buf.len()` bytes while clocking out `filler`.
    fn read(&mut self, buf: &mut [u8], filler: u8) -> Result<(), Self::Error>;

    /// Clock out `tx` while reading the same amount of bytes into `rx`.
    fn write_read(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), Self::Error>;

    /// Reconfigure bus clock rate, Hz.
    fn set_baudrate(&mut self, baudrate: u32) -> Result<(), Self::Error>;
}

/// [`SpiBus`] over a blocking `embedded-hal` SPI peripheral.
///
/// `embedded-hal` has no notion of clock rate, so `set_clock` is called with
/// the peripheral and the requested rate.
pub struct HalSpiBus<Spi, SetClock> {
    spi: Spi,
    set_clock: SetClock,
}

impl<Spi, SetClock, E> HalSpiBus<Spi, SetClock>
where
    Spi: Transfer<u8, Error = E> + Write<u8, Error = E>,
    SetClock: FnMut(&mut Spi, u32) -> Result<(), E>,
{
    /// Creates a new [`HalSpiBus`].
    pub fn new(spi: Spi, set_clock: SetClock) -> Self {
        HalSpiBus { spi, set_clock }
    }

    /// Returns the wrapped peripheral.
    pub fn free(self) -> Spi {
        self.spi
    }
}

impl<Spi, SetClock, E> SpiBus for HalSpiBus<Spi, SetClock>
where
    Spi: Transfer<u8, Error = E> + Write<u8, Error = E>,
    SetClock: FnMut(&mut Spi, u32) -> Result<(), E>,
    E: core::fmt::Debug,
{
    type Error = E;

    fn write(&mut self, data: &[u8]) -> Result<(), E> {
        Write::write(&mut self.spi, data)
    }

    fn read(&mut self, buf: &mut [u8], filler: u8) -> Result<(), E> {
        buf.fill(filler);
        self.spi.transfer(buf).map(|_| ())
    }

    fn write_read(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), E> {
        assert_eq!(tx.len(), rx.len());

        rx.copy_from_slice(tx);
        self.spi.transfer(rx).map(|_| ())
    }

    fn set_baudrate(&mut self, baudrate: u32) -> Result<(), E> {
        (self.set_clock)(&mut self.spi, baudrate)
    }
}

/// Receive a single byte by clocking out a filler.
pub(crate) fn receive<B: SpiBus>(bus: &mut B) -> Result<u8, B::Error> {
    let mut byte = [FILLER];
    bus.read(&mut byte, FILLER)?;
    Ok(byte[0])
}
