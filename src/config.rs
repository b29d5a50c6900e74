use crate::constants::{
    DEFAULT_DEVICE_PATH, MIN_COMMAND_SPACING, NAK_BACKOFF, PID, RESPONSE_TIMEOUT, RETRY_BACKOFF, SETTLE_DELAY,
    USB_INTERFACE, VID,
};
use crate::error::InverterError;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which channel to reach the inverter through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConfig {
    /// A hidraw or tty node, opened fresh for every attempt
    CharDevice { path: PathBuf },
    /// Direct USB access, claiming the HID interface for every attempt
    UsbHid {
        vendor_id: u16,
        product_id: u16,
        interface: u8,
    },
}

impl TransportConfig {
    pub fn char_device(path: impl Into<PathBuf>) -> Self {
        Self::CharDevice { path: path.into() }
    }

    /// The stock Voltronic HID bridge (`0665:5161`, interface 0).
    pub fn usb_hid() -> Self {
        Self::UsbHid {
            vendor_id: VID,
            product_id: PID,
            interface: USB_INTERFACE,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::char_device(DEFAULT_DEVICE_PATH)
    }
}

/// Parses `usb`, `usb:VVVV:PPPP` (hex ids) or a filesystem path.
impl FromStr for TransportConfig {
    type Err = InverterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(InverterError::InvalidArgument("empty device specification".to_string()));
        }
        if s.eq_ignore_ascii_case("usb") {
            return Ok(Self::usb_hid());
        }
        if let Some(ids) = s.strip_prefix("usb:") {
            let (vid, pid) = ids
                .split_once(':')
                .ok_or_else(|| InverterError::InvalidArgument(format!("expected usb:VVVV:PPPP, got {:?}", s)))?;
            let parse = |v: &str| {
                u16::from_str_radix(v, 16)
                    .map_err(|_| InverterError::InvalidArgument(format!("invalid USB id {:?} in {:?}", v, s)))
            };
            return Ok(Self::UsbHid {
                vendor_id: parse(vid)?,
                product_id: parse(pid)?,
                interface: USB_INTERFACE,
            });
        }
        Ok(Self::char_device(s))
    }
}

impl fmt::Display for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportConfig::CharDevice { path } => write!(f, "{}", path.display()),
            TransportConfig::UsbHid {
                vendor_id,
                product_id,
                interface,
            } => write!(f, "usb:{:04x}:{:04x} (interface {})", vendor_id, product_id, interface),
        }
    }
}

/// Pacing and retry timings of the command engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Minimum gap between the end of one attempt and the start of the next
    pub min_spacing: Duration,
    /// Pause after writing before reading starts
    pub settle_delay: Duration,
    /// Overall wait for a terminated response
    pub response_timeout: Duration,
    /// Wait before retrying a NAKed command
    pub nak_backoff: Duration,
    /// Wait before retrying after a transport failure
    pub retry_backoff: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            min_spacing: MIN_COMMAND_SPACING,
            settle_delay: SETTLE_DELAY,
            response_timeout: RESPONSE_TIMEOUT,
            nak_backoff: NAK_BACKOFF,
            retry_backoff: RETRY_BACKOFF,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InverterConfig {
    pub transport: TransportConfig,
    pub timing: Timing,
}

impl InverterConfig {
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            transport,
            timing: Timing::default(),
        }
    }
}
