/// Represents config for [`SdMmcSpi`](crate::SdMmcSpi).
pub trait SdMmcSpiConfig {
    /// Max bytes to poll for a command response (R1).
    const CMD_RESPONSE_ATTEMPTS: usize;
    /// Max attempts of GO_IDLE_STATE while entering SPI mode.
    const GO_IDLE_ATTEMPTS: usize;
    /// Max cycles of the operating condition handshake.
    const HANDSHAKE_ATTEMPTS: usize;
    /// Max bytes to poll for a start data token.
    const START_TOKEN_ATTEMPTS: usize;
    /// Max bytes to poll while the card commits written data.
    ///
    /// `None` waits as long as the card stays busy.
    const WRITE_BUSY_ATTEMPTS: Option<usize>;
    /// Count of filler bytes clocked with chip select released before reset.
    const SETTLE_BYTES: usize;
    /// Bus clock rate used during card identification, Hz.
    const INIT_BAUDRATE: u32;
    /// Count of dummy cycles between handshake cycles.
    const HANDSHAKE_DELAY_CYCLES: usize;
    /// Count of dummy cycles between start token polls.
    const TOKEN_POLL_DELAY_CYCLES: usize;
    /// Verify CRC-16 of received data blocks.
    const VERIFY_READ_CRC: bool;
}

/// Default implementation of [`SdMmcSpiConfig`](crate::SdMmcSpiConfig).
pub struct DefaultSdMmcSpiConfig;

impl SdMmcSpiConfig for DefaultSdMmcSpiConfig {
    const CMD_RESPONSE_ATTEMPTS: usize = 1000;
    const GO_IDLE_ATTEMPTS: usize = 5;
    const HANDSHAKE_ATTEMPTS: usize = 1000;
    const START_TOKEN_ATTEMPTS: usize = 1000;
    const WRITE_BUSY_ATTEMPTS: Option<usize> = None;
    const SETTLE_BYTES: usize = 16;
    const INIT_BAUDRATE: u32 = 100_000;
    const HANDSHAKE_DELAY_CYCLES: usize = 50_000;
    const TOKEN_POLL_DELAY_CYCLES: usize = 100;
    const VERIFY_READ_CRC: bool = false;
}
