//! CRC-16/XMODEM as used by Voltronic firmware.
//!
//! The firmware never lets `(`, CR or LF appear in a checksum field, since
//! those bytes delimit frames. Each checksum byte equal to one of them is
//! bumped by one. Received checksums are compared against the bumped value.

use crate::constants::{CR, LF, RESPONSE_PREFIX};
use crc::{CRC_16_XMODEM, Crc};

const XMODEM: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Plain CRC-16/XMODEM (init 0, no reflection, no final xor).
pub fn crc16_xmodem(data: &[u8]) -> u16 {
    XMODEM.checksum(data)
}

/// Protocol checksum: big-endian CRC with framing bytes escaped.
pub fn checksum(data: impl AsRef<[u8]>) -> [u8; 2] {
    crc16_xmodem(data.as_ref()).to_be_bytes().map(escape)
}

/// True if `received` is the protocol checksum of `data`.
pub fn verify(data: &[u8], received: &[u8]) -> bool {
    received == checksum(data)
}

fn escape(byte: u8) -> u8 {
    match byte {
        RESPONSE_PREFIX | CR | LF => byte + 1,
        other => other,
    }
}
