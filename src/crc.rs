/// CRC-7 of a command frame, polynomial x^7 + x^3 + 1 (0x09), initial value 0.
pub fn crc7(data: &[u8]) -> u8 {
    let mut crc: u8 = 0;
    for mut byte in data.iter().copied() {
        for _bit in 0..8 {
            crc <<= 1;
            if ((byte & 0x80) ^ (crc & 0x80)) != 0 {
                crc ^= 0x09;
            }
            byte <<= 1;
        }
    }
    crc & 0x7F
}

/// CRC-16/XMODEM of a data block, polynomial x^16 + x^12 + x^5 + 1 (0x1021),
/// initial value 0. Computed a byte at a time without a table.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc = (crc >> 8) | (crc << 8);
        crc ^= u16::from(byte);
        crc ^= (crc & 0xFF) >> 4;
        crc ^= crc << 12;
        crc ^= (crc & 0xFF) << 5;
    }
    crc
}
