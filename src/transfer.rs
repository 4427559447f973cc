//! Data block transfers.

use crate::{
    command::Command,
    consts::{
        commands::{CMD12, CMD17, CMD18, CMD24, CMD25},
        tokens, BLOCK_SIZE, FILLER,
    },
    crc::crc16,
    response::R1Response,
    Error, ErrorFor, SdMmcSpi, SdMmcSpiConfig, SpiBus,
};

use core::fmt::Debug;
#[cfg(feature = "defmt-log")]
use defmt::{debug, warn};
#[cfg(feature = "log")]
use log::{debug, warn};
use switch_hal::OutputSwitch;

impl<Spi: SpiBus, Cs: OutputSwitch, Config: SdMmcSpiConfig> SdMmcSpi<Spi, Cs, Config>
where
    Cs::Error: Debug,
{
    /// Read blocks, `buf` holds a whole number of blocks.
    pub(crate) fn read_blocks(
        &self,
        block_number: u32,
        buf: &mut [u8],
    ) -> Result<(), ErrorFor<Spi, Cs>> {
        let address = self.block_address(block_number, buf.len())?;

        if buf.len() == BLOCK_SIZE {
            self.start_transfer(Command::new(CMD17, address).hold())?;
            self.read_frame(buf)
        } else {
            self.start_transfer(Command::new(CMD18, address).hold())?;
            for chunk in buf.chunks_mut(BLOCK_SIZE) {
                self.read_frame(chunk)?;
            }

            let r1 = self.issue(Command::new(CMD12, 0).skip_first_poll_byte())?;
            if r1 != R1Response::READY_STATE {
                warn!("SD stop transmission failed: 0x{:02X}", r1.bits());
                return Err(Error::ErrorCommand(CMD12, r1.bits()));
            }

            Ok(())
        }
    }

    /// Write blocks, `buf` holds a whole number of blocks.
    pub(crate) fn write_blocks(&self, block_number: u32, buf: &[u8]) -> Result<(), ErrorFor<Spi, Cs>> {
        let address = self.block_address(block_number, buf.len())?;

        if buf.len() == BLOCK_SIZE {
            self.start_transfer(Command::new(CMD24, address))?;
            self.write_frame(tokens::DATA_START_BLOCK, buf)
        } else {
            self.start_transfer(Command::new(CMD25, address))?;
            for block in buf.chunks(BLOCK_SIZE) {
                if let Err(err) = self.write_frame(tokens::WRITE_MULTIPLE, block) {
                    // The card is still in receive state after a rejected block.
                    if let Error::WriteRejected(_) = err {
                        self.write_stop_token()?;
                    }
                    return Err(err);
                }
            }

            self.write_stop_token()
        }
    }

    /// Card address of a transfer of `len` bytes, all blocks must be on the card.
    fn block_address(&self, block_number: u32, len: usize) -> Result<u32, ErrorFor<Spi, Cs>> {
        let blocks = u32::try_from(len / BLOCK_SIZE).unwrap_or(u32::MAX);

        self.session.address(block_number, blocks).ok_or_else(|| {
            warn!(
                "SD blocks {}+{} out of range, card has {}",
                block_number,
                blocks,
                self.session.block_count()
            );
            Error::OutOfRange(block_number)
        })
    }

    /// Issue read/write command, any response but ready is an error.
    fn start_transfer(&self, command: Command) -> Result<(), ErrorFor<Spi, Cs>> {
        let r1 = self.issue(command)?;

        if r1 != R1Response::READY_STATE {
            let cmd = command.index();
            warn!("CMD{} failed: 0x{:02X}", cmd, r1.bits());
            self.unselect()?;
            return Err(Error::ErrorCommand(cmd, r1.bits()));
        }

        Ok(())
    }

    /// Read one data frame: start token, payload, CRC.
    pub(crate) fn read_frame(&self, buf: &mut [u8]) -> Result<(), ErrorFor<Spi, Cs>> {
        self.select()?;

        if let Err(err) = self.wait_start_token() {
            self.unselect()?;
            return Err(err);
        }

        self.receive_slice(buf)?;
        let card_crc = u16::from_be_bytes([self.receive()?, self.receive()?]);

        self.release()?;

        if Config::VERIFY_READ_CRC {
            let host_crc = crc16(buf);
            if card_crc != host_crc {
                warn!("SD CRC mismatch, card: 0x{:04X}, host: 0x{:04X}", card_crc, host_crc);
                return Err(Error::CrcError(card_crc, host_crc));
            }
        }

        Ok(())
    }

    /// Wait for data start token.
    fn wait_start_token(&self) -> Result<(), ErrorFor<Spi, Cs>> {
        for _ in 0..Config::START_TOKEN_ATTEMPTS {
            if self.receive()? == tokens::DATA_START_BLOCK {
                return Ok(());
            }

            Self::delay(Config::TOKEN_POLL_DELAY_CYCLES);
        }

        debug!("SD start token timeout");
        Err(Error::TimeoutReadBuffer)
    }

    /// Write one data frame and wait until the card has programmed it.
    fn write_frame(&self, token: u8, data: &[u8]) -> Result<(), ErrorFor<Spi, Cs>> {
        self.select()?;

        self.send(token)?;
        self.send_slice(data)?;
        self.send_slice(&[FILLER, FILLER])?;

        let status = self.receive()?;
        if (status & tokens::DATA_RES_MASK) != tokens::DATA_RES_ACCEPTED {
            warn!("SD data rejected: 0x{:02X}", status);
            self.release()?;
            return Err(Error::WriteRejected(status));
        }

        let result = self.wait_write_complete();
        self.release()?;

        result
    }

    /// End multiple block write.
    fn write_stop_token(&self) -> Result<(), ErrorFor<Spi, Cs>> {
        self.select()?;

        self.send(tokens::STOP_TRAN)?;
        self.send(FILLER)?;

        let result = self.wait_write_complete();
        self.release()?;

        result
    }

    /// Poll while the card holds the line low.
    fn wait_write_complete(&self) -> Result<(), ErrorFor<Spi, Cs>> {
        let mut polls: usize = 0;

        while self.receive()? == tokens::BUSY {
            polls = polls.saturating_add(1);

            if let Some(limit) = Config::WRITE_BUSY_ATTEMPTS {
                if polls >= limit {
                    return Err(Error::TimeoutWaitAvailable);
                }
            }
        }

        Ok(())
    }

    /// Wait until the card releases the line.
    pub(crate) fn wait_available(&self) -> Result<(), ErrorFor<Spi, Cs>> {
        self.select()?;

        let mut result = Err(Error::TimeoutWaitAvailable);
        for _ in 0..Config::CMD_RESPONSE_ATTEMPTS {
            if self.receive()? == FILLER {
                result = Ok(());
                break;
            }
        }

        self.release()?;

        result
    }
}
