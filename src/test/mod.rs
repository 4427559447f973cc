
use crate::{
    consts::BLOCK_SIZE, Addressing, CardVersion, DiskioDevice, DiskioError, Error, ErrorKind,
    IoctlCmd, IoctlOp, Lba, SdMmcSpi, SdMmcSpiConfig, Size, StatusFlag, DEFAULT_BAUDRATE,
};
use card::{Card, SimBus, SimCs, BLOCKS, DATA_RES_CRC_ERROR, R1_ADDRESS_ERROR};

use core::convert::Infallible;
use std::{cell::RefCell, rc::Rc};

/// Small ceilings so failures show up fast.
struct TestConfig;

impl SdMmcSpiConfig for TestConfig {
    const CMD_RESPONSE_ATTEMPTS: usize = 16;
    const GO_IDLE_ATTEMPTS: usize = 5;
    const HANDSHAKE_ATTEMPTS: usize = 20;
    const START_TOKEN_ATTEMPTS: usize = 16;
    const WRITE_BUSY_ATTEMPTS: Option<usize> = Some(64);
    const SETTLE_BYTES: usize = 16;
    const INIT_BAUDRATE: u32 = 100_000;
    const HANDSHAKE_DELAY_CYCLES: usize = 0;
    const TOKEN_POLL_DELAY_CYCLES: usize = 0;
    const VERIFY_READ_CRC: bool = false;
}

/// [`TestConfig`] with data CRC checked.
struct CrcConfig;

impl SdMmcSpiConfig for CrcConfig {
    const CMD_RESPONSE_ATTEMPTS: usize = TestConfig::CMD_RESPONSE_ATTEMPTS;
    const GO_IDLE_ATTEMPTS: usize = TestConfig::GO_IDLE_ATTEMPTS;
    const HANDSHAKE_ATTEMPTS: usize = TestConfig::HANDSHAKE_ATTEMPTS;
    const START_TOKEN_ATTEMPTS: usize = TestConfig::START_TOKEN_ATTEMPTS;
    const WRITE_BUSY_ATTEMPTS: Option<usize> = TestConfig::WRITE_BUSY_ATTEMPTS;
    const SETTLE_BYTES: usize = TestConfig::SETTLE_BYTES;
    const INIT_BAUDRATE: u32 = TestConfig::INIT_BAUDRATE;
    const HANDSHAKE_DELAY_CYCLES: usize = 0;
    const TOKEN_POLL_DELAY_CYCLES: usize = 0;
    const VERIFY_READ_CRC: bool = true;
}

type Sd<C = TestConfig> = SdMmcSpi<SimBus, SimCs, C>;
type SdError = Error<Infallible, Infallible>;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn attach<C: SdMmcSpiConfig>(card: Card) -> (Rc<RefCell<Card>>, Result<Sd<C>, SdError>) {
    init_logger();

    let card = Rc::new(RefCell::new(card));
    let sd = Sd::<C>::new(SimBus(card.clone()), SimCs(card.clone()), DEFAULT_BAUDRATE)
        .map_err(|(err, _, _)| err);

    (card, sd)
}

fn pattern(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

#[test]
fn init_v2_card() {
    let (card, sd) = attach::<TestConfig>(Card::sdhc());
    let sd = sd.unwrap();

    assert_eq!(sd.version(), CardVersion::V2);
    assert_eq!(sd.block_count(), 1024);
    assert_eq!(sd.session().addressing(), Addressing::Block);
    assert_eq!(sd.clock_rate(), DEFAULT_BAUDRATE);
    assert_eq!(sd.card_capacity(), Size::from_bytes(512 * 1024u64));
    assert!(!sd.status().contains(StatusFlag::NotInitialized));

    let card = card.borrow();
    assert_eq!(card.baudrates, [100_000, DEFAULT_BAUDRATE]);
    assert_eq!(
        card.commands[..5],
        [(0, 0), (8, 0x1AA), (58, 0), (55, 0), (41, 0x4000_0000)]
    );
    assert_eq!(card.commands.iter().filter(|c| c.0 == 41).count(), 3);
    assert_eq!(card.commands[card.commands.len() - 3..], [(58, 0), (9, 0), (16, 512)]);
    assert!(!card.selected());

    // Frame, NCR byte, R1 and the 4 byte R3/R7 payload.
    let payload_commands = |index: u8| {
        card.transactions
            .iter()
            .filter(|t| t.0 == index)
            .map(|t| t.1)
            .collect::<Vec<_>>()
    };
    assert_eq!(payload_commands(8), [12]);
    assert_eq!(payload_commands(58), [12; 4]);
}

#[test]
fn init_v1_card() {
    let (card, sd) = attach::<TestConfig>(Card::sdsc());
    let sd = sd.unwrap();

    assert_eq!(sd.version(), CardVersion::V1);
    assert_eq!(sd.block_count(), 64);
    assert_eq!(sd.session().addressing(), Addressing::Byte);

    let card = card.borrow();
    assert_eq!(card.commands[..4], [(0, 0), (8, 0x1AA), (55, 0), (41, 0)]);
    assert!(card.commands.iter().all(|c| c.0 != 58));
    assert_eq!(card.commands[card.commands.len() - 2..], [(9, 0), (16, 512)]);
}

#[test]
fn undetermined_version() {
    let mut card = Card::sdhc();
    card.if_cond_response = Some(0x00);

    let (_, sd) = attach::<TestConfig>(card);
    let err = sd.err().unwrap();

    assert_eq!(err, Error::UndeterminedVersion(0x00));
    assert_eq!(err.kind(), ErrorKind::Init);
}

#[test]
fn no_version_response() {
    let mut card = Card::sdhc();
    card.silent = Some(8);

    let (card, sd) = attach::<TestConfig>(card);
    let err = sd.err().unwrap();

    assert_eq!(err, Error::UndeterminedVersion(0xFF));
    assert_eq!(err.kind(), ErrorKind::Init);
    assert_eq!(card.borrow().commands.iter().filter(|c| c.0 == 8).count(), 1);
    assert!(!card.borrow().selected());
}

#[test]
fn no_csd_response() {
    let mut card = Card::sdhc();
    card.silent = Some(9);

    let (card, sd) = attach::<TestConfig>(card);
    let err = sd.err().unwrap();

    assert_eq!(err, Error::RegisterReadError);
    assert_eq!(err.kind(), ErrorKind::Init);
    assert!(!card.borrow().selected());
}

#[test]
fn no_block_length_response() {
    let mut card = Card::sdsc();
    card.silent = Some(16);

    let (_, sd) = attach::<TestConfig>(card);
    let err = sd.err().unwrap();

    assert_eq!(err, Error::BlockLengthRejected(0xFF));
    assert_eq!(err.kind(), ErrorKind::Init);
}

#[test]
fn no_card() {
    let mut card = Card::sdhc();
    card.mute = true;

    let (card, sd) = attach::<TestConfig>(card);

    assert_eq!(sd.err(), Some(Error::CardNotFound));
    // settle bytes, then every CMD0: frame, polls, release byte
    let per_command = 6 + TestConfig::CMD_RESPONSE_ATTEMPTS + 1;
    assert_eq!(
        card.borrow().exchanges,
        TestConfig::SETTLE_BYTES + TestConfig::GO_IDLE_ATTEMPTS * per_command
    );
    assert!(!card.borrow().selected());
}

#[test]
fn handshake_timeout() {
    let mut card = Card::sdhc();
    card.init_polls = usize::MAX;

    let (card, sd) = attach::<TestConfig>(card);

    assert_eq!(sd.err(), Some(Error::HandshakeTimeout(CardVersion::V2)));
    assert_eq!(
        card.borrow().commands.iter().filter(|c| c.0 == 41).count(),
        TestConfig::HANDSHAKE_ATTEMPTS
    );
}

#[test]
fn v1_handshake_timeout() {
    let mut card = Card::sdsc();
    card.init_polls = usize::MAX;

    let (_, sd) = attach::<TestConfig>(card);

    assert_eq!(sd.err(), Some(Error::HandshakeTimeout(CardVersion::V1)));
}

#[test]
fn unsupported_csd() {
    let mut card = Card::sdhc();
    card.csd[0] = 0x80;

    let (_, sd) = attach::<TestConfig>(card);

    assert_eq!(sd.err(), Some(Error::UnsupportedCsd(0b10)));
}

#[test]
fn block_length_rejected() {
    let mut card = Card::sdsc();
    card.reject_block_length = true;

    let (_, sd) = attach::<TestConfig>(card);

    assert_eq!(sd.err(), Some(Error::BlockLengthRejected(0x40)));
}

#[test]
fn failed_init_returns_bus() {
    let mut card = Card::sdhc();
    card.mute = true;
    let card = Rc::new(RefCell::new(card));

    let result = Sd::<TestConfig>::new(SimBus(card.clone()), SimCs(card.clone()), DEFAULT_BAUDRATE);
    let Err((err, SimBus(bus_card), SimCs(cs_card))) = result else {
        panic!("card must not initialize");
    };

    assert_eq!(err, Error::CardNotFound);
    assert!(Rc::ptr_eq(&bus_card, &card));
    assert!(Rc::ptr_eq(&cs_card, &card));
}

#[test]
fn single_block_round_trip() {
    let (card, sd) = attach::<TestConfig>(Card::sdhc());
    let sd = sd.unwrap();
    let data = pattern(7, BLOCK_SIZE);

    sd.writeblocks(3, &data).unwrap();
    assert_eq!(card.borrow().block(3), &data[..]);

    let mut buf = [0u8; BLOCK_SIZE];
    sd.readblocks(3, &mut buf).unwrap();
    assert_eq!(&buf[..], &data[..]);

    let card = card.borrow();
    let tail = &card.commands[card.commands.len() - 2..];
    assert_eq!(tail, [(24, 3), (17, 3)]);
    assert!(!card.selected());
}

#[test]
fn multi_block_round_trip_byte_addressed() {
    let (card, sd) = attach::<TestConfig>(Card::sdsc());
    let sd = sd.unwrap();
    let data = pattern(42, 4 * BLOCK_SIZE);

    sd.writeblocks(10, &data).unwrap();
    for (i, block) in data.chunks(BLOCK_SIZE).enumerate() {
        assert_eq!(card.borrow().block(10 + i), block);
    }

    let mut buf = vec![0u8; 4 * BLOCK_SIZE];
    sd.readblocks(10, &mut buf).unwrap();
    assert_eq!(buf, data);

    let card = card.borrow();
    let tail = &card.commands[card.commands.len() - 3..];
    assert_eq!(tail, [(25, 5120), (18, 5120), (12, 0)]);
}

#[test]
fn multi_block_read_sequence() {
    let (card, sd) = attach::<TestConfig>(Card::sdhc());
    let sd = sd.unwrap();
    card.borrow_mut().commands.clear();
    card.borrow_mut().frames_sent = 0;

    let mut buf = vec![0u8; 3 * BLOCK_SIZE];
    sd.readblocks(5, &mut buf).unwrap();

    let card = card.borrow();
    // The stop command answer starts with a junk byte, only skipping it
    // yields the real R1.
    assert_eq!(card.commands, [(18, 5), (12, 0)]);
    assert_eq!(card.frames_sent, 3);
    assert!(!card.selected());
}

#[test]
fn read_address_error() {
    let (card, sd) = attach::<TestConfig>(Card::sdhc());
    let sd = sd.unwrap();
    let mut buf = [0u8; BLOCK_SIZE];

    assert_eq!(
        sd.readblocks(BLOCKS as u32, &mut buf),
        Err(Error::ErrorCommand(17, R1_ADDRESS_ERROR))
    );
    assert!(!card.borrow().selected());

    let mut buf = vec![0u8; 2 * BLOCK_SIZE];
    assert_eq!(
        sd.readblocks(BLOCKS as u32, &mut buf),
        Err(Error::ErrorCommand(18, R1_ADDRESS_ERROR))
    );
}

#[test]
fn blocks_past_card_end() {
    let (card, sd) = attach::<TestConfig>(Card::sdsc());
    let sd = sd.unwrap();
    let commands = card.borrow().commands.len();

    let mut buf = [0u8; BLOCK_SIZE];
    let err = sd.readblocks(1 << 23, &mut buf).unwrap_err();
    assert_eq!(err, Error::OutOfRange(1 << 23));
    assert_eq!(err.kind(), ErrorKind::Io);

    let mut buf = vec![0u8; 2 * BLOCK_SIZE];
    assert_eq!(sd.readblocks(63, &mut buf), Err(Error::OutOfRange(63)));
    assert_eq!(sd.writeblocks(63, &buf), Err(Error::OutOfRange(63)));
    assert_eq!(
        sd.writeblocks(u32::MAX, &buf[..BLOCK_SIZE]),
        Err(Error::OutOfRange(u32::MAX))
    );

    // Nothing reached the card, block 0 stays untouched.
    assert_eq!(card.borrow().commands.len(), commands);

    assert_eq!(sd.readblocks(62, &mut buf), Ok(()));
    assert_eq!(card.borrow().commands[commands], (18, 62 * 512));
}

#[test]
fn command_timeout_after_retry_ceiling() {
    let (card, sd) = attach::<TestConfig>(Card::sdhc());
    let sd = sd.unwrap();
    card.borrow_mut().mute = true;
    let before = card.borrow().exchanges;

    let mut buf = [0u8; BLOCK_SIZE];
    let err = sd.readblocks(0, &mut buf).unwrap_err();

    assert_eq!(err, Error::TimeoutCommand(17));
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(
        card.borrow().exchanges - before,
        6 + TestConfig::CMD_RESPONSE_ATTEMPTS + 1
    );
    assert!(!card.borrow().selected());
}

#[test]
fn missing_start_token() {
    let (card, sd) = attach::<TestConfig>(Card::sdhc());
    let sd = sd.unwrap();
    card.borrow_mut().drop_data_token = true;

    let mut buf = [0u8; BLOCK_SIZE];
    assert_eq!(sd.readblocks(0, &mut buf), Err(Error::TimeoutReadBuffer));
    assert!(!card.borrow().selected());
}

#[test]
fn rejected_write_does_not_wait() {
    let (card, sd) = attach::<TestConfig>(Card::sdhc());
    let sd = sd.unwrap();
    card.borrow_mut().reject_writes = true;

    let data = pattern(1, BLOCK_SIZE);
    assert_eq!(
        sd.writeblocks(0, &data),
        Err(Error::WriteRejected(DATA_RES_CRC_ERROR))
    );

    let card = card.borrow();
    assert_eq!(card.block(0), &[0u8; BLOCK_SIZE][..]);
    assert!(!card.selected());
}

#[test]
fn rejected_block_ends_multi_block_write() {
    let (card, sd) = attach::<TestConfig>(Card::sdhc());
    let sd = sd.unwrap();
    card.borrow_mut().reject_writes = true;

    let data = pattern(5, 3 * BLOCK_SIZE);
    let err = sd.writeblocks(4, &data).unwrap_err();

    assert_eq!(err, Error::WriteRejected(DATA_RES_CRC_ERROR));
    assert_eq!(err.kind(), ErrorKind::Io);

    let card = card.borrow();
    assert_eq!(card.commands.last(), Some(&(25, 4)));
    assert_eq!(card.stop_tokens, 1);
    for block in 4..7 {
        assert_eq!(card.block(block), &[0u8; BLOCK_SIZE][..]);
    }
    assert!(!card.selected());
}

#[test]
fn multi_block_write_sends_stop_token() {
    let (card, sd) = attach::<TestConfig>(Card::sdhc());
    let sd = sd.unwrap();

    sd.writeblocks(0, &pattern(8, 2 * BLOCK_SIZE)).unwrap();

    assert_eq!(card.borrow().stop_tokens, 1);
}

#[test]
fn write_busy_wait() {
    let (card, sd) = attach::<TestConfig>(Card::sdhc());
    let sd = sd.unwrap();

    card.borrow_mut().busy_polls = 50;
    sd.writeblocks(1, &pattern(3, BLOCK_SIZE)).unwrap();

    card.borrow_mut().busy_polls = 500;
    assert_eq!(
        sd.writeblocks(1, &pattern(4, BLOCK_SIZE)),
        Err(Error::TimeoutWaitAvailable)
    );
}

#[test]
fn unchecked_crc_is_accepted() {
    let (card, sd) = attach::<TestConfig>(Card::sdhc());
    let sd = sd.unwrap();
    card.borrow_mut().corrupt_crc = true;

    let mut buf = [0u8; BLOCK_SIZE];
    assert_eq!(sd.readblocks(0, &mut buf), Ok(()));
}

#[test]
fn checked_crc_mismatch() {
    let (card, sd) = attach::<CrcConfig>(Card::sdhc());
    let sd = sd.unwrap();

    let mut buf = [0u8; BLOCK_SIZE];
    assert_eq!(sd.readblocks(0, &mut buf), Ok(()));

    card.borrow_mut().corrupt_crc = true;
    assert!(matches!(
        sd.readblocks(0, &mut buf),
        Err(Error::CrcError(_, _))
    ));
}

#[test]
#[should_panic(expected = "Buffer length is invalid")]
fn readblocks_partial_block() {
    let (_, sd) = attach::<TestConfig>(Card::sdhc());
    let mut buf = [0u8; 100];
    let _ = sd.unwrap().readblocks(0, &mut buf);
}

#[test]
#[should_panic(expected = "Buffer length is invalid")]
fn readblocks_empty() {
    let (_, sd) = attach::<TestConfig>(Card::sdhc());
    let _ = sd.unwrap().readblocks(0, &mut []);
}

#[test]
#[should_panic(expected = "Buffer length is invalid")]
fn writeblocks_partial_block() {
    let (_, sd) = attach::<TestConfig>(Card::sdhc());
    let _ = sd.unwrap().writeblocks(0, &[0u8; BLOCK_SIZE + 1]);
}

#[test]
fn ioctl_operations() {
    let (_, sd) = attach::<TestConfig>(Card::sdhc());
    let sd = sd.unwrap();

    assert_eq!(sd.ioctl(IoctlOp::BlockCount, 0), Ok(Some(1024)));
    assert_eq!(sd.ioctl(IoctlOp::BlockSize, 0), Ok(Some(512)));
    assert_eq!(sd.ioctl(IoctlOp::Sync, 0), Ok(None));
    assert_eq!(sd.ioctl(IoctlOp::Init, 0), Ok(None));
    assert_eq!(sd.ioctl(IoctlOp::Deinit, 0), Ok(None));
    assert_eq!(sd.ioctl(IoctlOp::BlockErase, 7), Ok(None));

    assert_eq!(IoctlOp::try_from(4), Ok(IoctlOp::BlockCount));
    assert_eq!(IoctlOp::try_from(9), Err(9));
}

#[test]
fn diskio_device() {
    let (card, sd) = attach::<TestConfig>(Card::sdhc());
    let mut sd = sd.unwrap();

    let mut block_size = 0;
    assert!(DiskioDevice::ioctl(&sd, IoctlCmd::GetBlockSize(&mut block_size)).is_ok());
    assert_eq!(block_size, BLOCK_SIZE);
    assert!(DiskioDevice::ioctl(&sd, IoctlCmd::CtrlSync).is_ok());

    let data = pattern(9, 2 * BLOCK_SIZE);
    assert!(DiskioDevice::write(&sd, &data, 2).is_ok());
    let mut buf = vec![0u8; 2 * BLOCK_SIZE];
    assert!(DiskioDevice::read(&sd, &mut buf, 2).is_ok());
    assert_eq!(buf, data);

    assert!(matches!(
        DiskioDevice::read(&sd, &mut buf[..10], 0),
        Err(DiskioError::InvalidArgument)
    ));
    let commands = card.borrow().commands.len();
    assert!(DiskioDevice::read(&sd, &mut buf, Lba::MAX).is_err());
    assert!(DiskioDevice::write(&sd, &data, Lba::MAX).is_err());
    assert_eq!(card.borrow().commands.len(), commands);

    sd.reset();
    assert!(sd.status().contains(StatusFlag::NotInitialized));
    assert!(matches!(
        DiskioDevice::read(&sd, &mut buf, 0),
        Err(DiskioError::NotInitialized)
    ));
    assert_eq!(sd.readblocks(0, &mut buf), Err(Error::BadState));

    let commands = card.borrow().commands.len();
    assert!(sd.initialize().is_ok());
    assert_eq!(card.borrow().commands[commands], (0, 0));
    assert!(matches!(
        sd.initialize(),
        Err(DiskioError::AlreadyInitialized)
    ));
    assert!(DiskioDevice::read(&sd, &mut buf, 2).is_ok());
    assert_eq!(buf, data);
}

#[test]
fn free_releases_chip_select() {
    let (card, sd) = attach::<TestConfig>(Card::sdhc());

    let (SimBus(bus_card), _) = sd.unwrap().free();

    assert!(Rc::ptr_eq(&bus_card, &card));
    assert!(!card.borrow().selected());
}

#[test]
fn error_display() {
    assert_eq!(
        std::format!("{}", SdError::TimeoutCommand(17)),
        "timeout waiting for command response (CMD17)"
    );
    assert_eq!(
        std::format!("{}", SdError::WriteRejected(0x0B)),
        "data rejected by SD card (0x0B)"
    );
    assert_eq!(std::format!("{}", SdError::CardNotFound), "no SD card");
    assert_eq!(
        std::format!("{}", SdError::OutOfRange(70)),
        "block out of range (block 70)"
    );
}
