//! CRC16-XMODEM checksum used by the block protocol.

use crc::{CRC_16_XMODEM, Crc};

const XMODEM: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// CRC16-XMODEM (poly 0x1021, init 0) over `data`.
pub fn crc16_xmodem(data: &[u8]) -> u16 {
    XMODEM.checksum(data)
}
