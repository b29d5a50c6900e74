//! # Voltronic/Axpert Serial Protocol
//!
//! Commands and responses are ASCII text wrapped in a small binary frame.
//!
//! ## Framing
//!
//! - **Outbound**: `COMMAND ++ crc_hi ++ crc_lo ++ CR`
//! - **Inbound**: `( ++ PAYLOAD ++ crc_hi ++ crc_lo ++ CR`, or a bare
//!   `ACK`/`NAK` (with or without the leading `(`) and no checksum.
//!
//! The checksum is CRC-16/XMODEM with framing bytes escaped, see
//! [`crate::checksum`].
//!
//! ## Response recovery
//!
//! Some HID bridges append junk after a valid frame. When the last two bytes
//! do not checksum the rest, [`decode_response`] searches for the longest
//! prefix made only of payload characters whose checksum sits right after it.
//! If nothing matches the payload is still returned, flagged as
//! [`Integrity::Unverified`].

use crate::checksum::{checksum, verify};
use crate::constants::{CHECKSUM_SIZE, CR, RESPONSE_PREFIX, VALID_PAYLOAD_CHARS};
use crate::error::InverterError;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// An outbound command: ASCII mnemonic plus optional fixed-width argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command(String);

impl Command {
    /// Live status snapshot
    pub const QPIGS: &'static str = "QPIGS";
    /// Rated information / current settings
    pub const QPIRI: &'static str = "QPIRI";
    /// Warning bits
    pub const QPIWS: &'static str = "QPIWS";
    /// Device mode
    pub const QMOD: &'static str = "QMOD";
    /// Serial number
    pub const QID: &'static str = "QID";
    /// Main CPU firmware version
    pub const QVFW: &'static str = "QVFW";
    /// Model code
    pub const QGMN: &'static str = "QGMN";

    pub fn new(text: impl Into<String>) -> Result<Self, InverterError> {
        let text = text.into();
        if text.is_empty() || !text.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(InverterError::InvalidArgument(format!(
                "command must be non-empty printable ASCII, got {:?}",
                text
            )));
        }
        Ok(Self(text))
    }

    /// Mnemonic followed by a two-digit selector, e.g. `POP02`.
    pub fn with_selector(mnemonic: &str, value: u8) -> Result<Self, InverterError> {
        if value > 99 {
            return Err(InverterError::InvalidArgument(format!(
                "{} selector {} does not fit two digits",
                mnemonic, value
            )));
        }
        Self::new(format!("{}{:02}", mnemonic, value))
    }

    /// Mnemonic followed by a three-digit zero-padded current, e.g. `MCHGC030`.
    pub fn with_current(mnemonic: &str, amps: u16) -> Result<Self, InverterError> {
        if amps > 999 {
            return Err(InverterError::InvalidArgument(format!(
                "{} current {} A does not fit three digits",
                mnemonic, amps
            )));
        }
        Self::new(format!("{}{:03}", mnemonic, amps))
    }

    /// Mnemonic followed by a voltage with one decimal, e.g. `PSDV43.5`.
    pub fn with_voltage(mnemonic: &str, volts: f32) -> Result<Self, InverterError> {
        if !volts.is_finite() || volts.is_sign_negative() || volts >= 99.95 {
            return Err(InverterError::InvalidArgument(format!(
                "{} voltage {} V does not fit NN.N",
                mnemonic, volts
            )));
        }
        Self::new(format!("{}{:04.1}", mnemonic, volts))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wire frame: text, checksum, CR.
    pub fn frame(&self) -> Bytes {
        let mut frame = BytesMut::with_capacity(self.0.len() + CHECKSUM_SIZE + 1);
        frame.extend_from_slice(self.0.as_bytes());
        frame.extend_from_slice(&checksum(self.0.as_bytes()));
        frame.put_u8(CR);
        frame.freeze()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How far the checksum of a payload could be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Integrity {
    /// Last two bytes were the checksum of everything before them.
    Verified,
    /// A shorter prefix verified; `discarded` trailing bytes were dropped.
    Recovered { discarded: usize },
    /// Nothing verified; the standard split was used anyway.
    Unverified { received: [u8; 2], computed: [u8; 2] },
    /// Too short to carry a checksum.
    Unchecked,
}

impl Integrity {
    /// A checksum matched, possibly after dropping trailing junk.
    pub fn is_trusted(&self) -> bool {
        matches!(self, Integrity::Verified | Integrity::Recovered { .. })
    }
}

/// A classified response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Ack,
    Nak,
    Payload { text: String, integrity: Integrity },
}

/// Classify and clean one raw response.
///
/// `raw` is what the transport returned: bytes up to and including the
/// first CR, or whatever arrived before the read timed out.
pub fn decode_response(raw: &[u8]) -> Decoded {
    let body = raw.strip_suffix(&[CR]).unwrap_or(raw);

    match body {
        b"ACK" | b"(ACK" => return Decoded::Ack,
        b"NAK" | b"(NAK" => return Decoded::Nak,
        _ => {}
    }

    let (data, integrity) = extract_payload(body);
    let text = clean_payload(data);
    match text.as_str() {
        // Real firmware checksums its ACK/NAK too
        "ACK" if integrity.is_trusted() => Decoded::Ack,
        "NAK" if integrity.is_trusted() => Decoded::Nak,
        _ => Decoded::Payload { text, integrity },
    }
}

/// Split `body` into payload and checksum, recovering from trailing junk.
pub fn extract_payload(body: &[u8]) -> (&[u8], Integrity) {
    if body.len() <= CHECKSUM_SIZE {
        return (body, Integrity::Unchecked);
    }

    let split = body.len() - CHECKSUM_SIZE;
    let (data, received) = body.split_at(split);
    if verify(data, received) {
        return (data, Integrity::Verified);
    }

    if let Some(len) = smart_scan(body) {
        return (
            &body[..len],
            Integrity::Recovered {
                discarded: body.len() - len - CHECKSUM_SIZE,
            },
        );
    }

    let mut received_crc = [0u8; 2];
    received_crc.copy_from_slice(received);
    (
        data,
        Integrity::Unverified {
            received: received_crc,
            computed: checksum(data),
        },
    )
}

/// Length of the longest prefix of valid payload characters whose checksum
/// immediately follows it.
fn smart_scan(body: &[u8]) -> Option<usize> {
    let valid_prefix = body
        .iter()
        .position(|b| !VALID_PAYLOAD_CHARS.contains(b))
        .unwrap_or(body.len());
    let longest = valid_prefix.min(body.len() - CHECKSUM_SIZE);

    (1..=longest)
        .rev()
        .find(|&len| verify(&body[..len], &body[len..len + CHECKSUM_SIZE]))
}

/// Latin-1 decode, drop NULs, trim, and cut through the first `(`.
pub fn clean_payload(data: &[u8]) -> String {
    let decoded: String = data.iter().filter(|&&b| b != 0).map(|&b| b as char).collect();
    let trimmed = decoded.trim();
    match trimmed.find(RESPONSE_PREFIX as char) {
        Some(pos) => trimmed[pos + 1..].to_string(),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &[u8] =
        b"(000.0 00.0 230.0 50.0 0046 0002 000 371 53.20 001 080 0026 0001 089.9 53.13 00000 00110110";

    fn framed(data: &[u8], trailer: &[u8]) -> Vec<u8> {
        let mut v = data.to_vec();
        v.extend_from_slice(&checksum(data));
        v.extend_from_slice(trailer);
        v.push(CR);
        v
    }

    #[test]
    fn test_command_frame() {
        let cmd = Command::new("QPIGS").unwrap();
        assert_eq!(cmd.frame().as_ref(), b"QPIGS\xB7\xA9\r");
    }

    #[test]
    fn test_frame_checksum_round_trip() {
        for text in ["QPIGS", "QMOD", "QGMN", "POP02", "MCHGC030", "PSDV43.5"] {
            let frame = Command::new(text).unwrap().frame();
            let (body, crc) = frame[..frame.len() - 1].split_at(frame.len() - 3);
            assert_eq!(frame.last(), Some(&CR));
            assert_eq!(body, text.as_bytes());
            assert_eq!(crc, checksum(body));
        }
    }

    #[test]
    fn test_command_arguments() {
        assert_eq!(Command::with_selector("POP", 2).unwrap().as_str(), "POP02");
        assert_eq!(Command::with_current("MCHGC", 30).unwrap().as_str(), "MCHGC030");
        assert_eq!(Command::with_current("MUCHGC", 2).unwrap().as_str(), "MUCHGC002");
        assert_eq!(Command::with_voltage("PSDV", 43.5).unwrap().as_str(), "PSDV43.5");
        assert_eq!(Command::with_voltage("PBFT", 9.0).unwrap().as_str(), "PBFT09.0");
        assert!(Command::with_current("MCHGC", 1000).is_err());
        assert!(Command::with_voltage("PCVV", 120.0).is_err());
        assert!(Command::with_voltage("PCVV", f32::NAN).is_err());
        assert_eq!(Command::with_voltage("PSDV", 0.0).unwrap().as_str(), "PSDV00.0");
        assert!(Command::with_voltage("PSDV", -0.0).is_err());
        assert!(Command::with_voltage("PSDV", -0.04).is_err());
        assert!(Command::new("").is_err());
        assert!(Command::new("QP IGS").is_err());
    }

    #[test]
    fn test_ack_nak_fast_path() {
        assert_eq!(decode_response(b"(ACK\r"), Decoded::Ack);
        assert_eq!(decode_response(b"ACK\r"), Decoded::Ack);
        assert_eq!(decode_response(b"(NAK\r"), Decoded::Nak);
        assert_eq!(decode_response(b"NAK"), Decoded::Nak);
    }

    #[test]
    fn test_checksummed_ack_nak() {
        assert_eq!(decode_response(&framed(b"(ACK", b"")), Decoded::Ack);
        assert_eq!(decode_response(&framed(b"(NAK", b"")), Decoded::Nak);
    }

    #[test]
    fn test_checksummed_ack_nak_with_trailing_junk() {
        assert_eq!(decode_response(&framed(b"(ACK", b"\xFF\x13")), Decoded::Ack);
        assert_eq!(decode_response(&framed(b"(NAK", b"\xFF\x13")), Decoded::Nak);
        assert_eq!(decode_response(&framed(b"(ACK", b"XY")), Decoded::Ack);
    }

    #[test]
    fn test_unverified_ack_text_stays_payload() {
        assert!(matches!(
            decode_response(b"(ACK\x12\x34\r"),
            Decoded::Payload { integrity: Integrity::Unverified { .. }, .. }
        ));
    }

    #[test]
    fn test_verified_payload() {
        let raw = framed(STATUS, b"");
        // The checksum of this payload starts with a NUL byte
        assert_eq!(checksum(STATUS), [0x00, 0x42]);
        match decode_response(&raw) {
            Decoded::Payload { text, integrity } => {
                assert_eq!(integrity, Integrity::Verified);
                assert_eq!(text.as_bytes(), &STATUS[1..]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_smart_scan_recovers_after_binary_garbage() {
        let raw = framed(STATUS, &[0xFF, 0x13]);
        match decode_response(&raw) {
            Decoded::Payload { text, integrity } => {
                assert_eq!(integrity, Integrity::Recovered { discarded: 2 });
                assert_eq!(text.as_bytes(), &STATUS[1..]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_smart_scan_recovers_after_printable_garbage() {
        let raw = framed(STATUS, b"XY");
        let body = &raw[..raw.len() - 1];
        let (data, integrity) = extract_payload(body);
        assert_eq!(data, STATUS);
        assert_eq!(integrity, Integrity::Recovered { discarded: 2 });
    }

    #[test]
    fn test_unrecoverable_mismatch_still_returns_payload() {
        let mut raw = STATUS.to_vec();
        raw.extend_from_slice(&[0x12, 0x34, CR]);
        match decode_response(&raw) {
            Decoded::Payload { text, integrity } => {
                assert_eq!(
                    integrity,
                    Integrity::Unverified {
                        received: [0x12, 0x34],
                        computed: [0x00, 0x42],
                    }
                );
                assert_eq!(text.as_bytes(), &STATUS[1..]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_short_responses_are_unchecked() {
        assert_eq!(
            decode_response(b"\r"),
            Decoded::Payload {
                text: String::new(),
                integrity: Integrity::Unchecked
            }
        );
        assert_eq!(
            decode_response(b"(1\r"),
            Decoded::Payload {
                text: "1".to_string(),
                integrity: Integrity::Unchecked
            }
        );
    }

    #[test]
    fn test_single_char_mode_reply() {
        assert_eq!(
            decode_response(&framed(b"(L", b"")),
            Decoded::Payload {
                text: "L".to_string(),
                integrity: Integrity::Verified
            }
        );
    }

    #[test]
    fn test_clean_payload() {
        assert_eq!(clean_payload(b"  (VERFW:00052.30\x00\x00 "), "VERFW:00052.30");
        assert_eq!(clean_payload(b"no marker"), "no marker");
        assert_eq!(clean_payload(b"\x00(\x00"), "");
    }
}
