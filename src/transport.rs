//! Byte transports to the inverter.
//!
//! A [`Transport`] knows how to reach the device; each call to
//! [`Transport::open`] yields a fresh [`Link`] scoped to one command attempt.
//! Dropping the link releases the underlying resource (file descriptor or
//! claimed USB interface), so every exit path cleans up.

use crate::chardev::{CharDevice, CharDeviceLink};
use crate::config::TransportConfig;
use crate::error::InverterError;
use crate::usb::{UsbHid, UsbHidLink};
use bytes::BytesMut;
use std::future::Future;
use std::time::Duration;

/// Something that can open a link to the inverter.
pub trait Transport: Send + Sync {
    type Link: Link + Send;

    fn open(&self) -> impl Future<Output = Result<Self::Link, InverterError>> + Send;
}

/// An open, exclusively held channel to the inverter.
pub trait Link {
    /// Write a complete frame.
    fn write(&mut self, frame: &[u8]) -> impl Future<Output = Result<(), InverterError>> + Send;

    /// Accumulate bytes until `terminator` is seen or `timeout` elapses.
    ///
    /// An empty buffer means nothing arrived in time; it is not an error at
    /// this layer.
    fn read_until(
        &mut self,
        terminator: u8,
        timeout: Duration,
    ) -> impl Future<Output = Result<BytesMut, InverterError>> + Send;
}

/// The two supported channels, selected at construction time.
#[derive(Debug, Clone)]
pub enum DeviceTransport {
    CharDevice(CharDevice),
    UsbHid(UsbHid),
}

impl DeviceTransport {
    pub fn from_config(config: &TransportConfig) -> Self {
        match config {
            TransportConfig::CharDevice { path } => Self::CharDevice(CharDevice::new(path.clone())),
            TransportConfig::UsbHid {
                vendor_id,
                product_id,
                interface,
            } => Self::UsbHid(UsbHid::new(*vendor_id, *product_id, *interface)),
        }
    }
}

impl Transport for DeviceTransport {
    type Link = DeviceLink;

    async fn open(&self) -> Result<DeviceLink, InverterError> {
        match self {
            DeviceTransport::CharDevice(dev) => dev.open().await.map(DeviceLink::CharDevice),
            DeviceTransport::UsbHid(dev) => dev.open().await.map(DeviceLink::UsbHid),
        }
    }
}

#[derive(Debug)]
pub enum DeviceLink {
    CharDevice(CharDeviceLink),
    UsbHid(UsbHidLink),
}

impl Link for DeviceLink {
    async fn write(&mut self, frame: &[u8]) -> Result<(), InverterError> {
        match self {
            DeviceLink::CharDevice(link) => link.write(frame).await,
            DeviceLink::UsbHid(link) => link.write(frame).await,
        }
    }

    async fn read_until(&mut self, terminator: u8, timeout: Duration) -> Result<BytesMut, InverterError> {
        match self {
            DeviceLink::CharDevice(link) => link.read_until(terminator, timeout).await,
            DeviceLink::UsbHid(link) => link.read_until(terminator, timeout).await,
        }
    }
}

/// Cut `buf` just after the first `terminator`. Returns whether one was found.
pub(crate) fn truncate_at_terminator(buf: &mut BytesMut, terminator: u8) -> bool {
    match buf.iter().position(|&b| b == terminator) {
        Some(pos) => {
            buf.truncate(pos + 1);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_drops_report_padding() {
        let mut buf = BytesMut::from(&b"(L\x06\x07\r\0\0\0"[..]);
        assert!(truncate_at_terminator(&mut buf, b'\r'));
        assert_eq!(&buf[..], b"(L\x06\x07\r");
    }

    #[test]
    fn test_truncate_without_terminator_keeps_buffer() {
        let mut buf = BytesMut::from(&b"(000.0 00.0"[..]);
        assert!(!truncate_at_terminator(&mut buf, b'\r'));
        assert_eq!(&buf[..], b"(000.0 00.0");
    }
}
