// src/usb.rs

use crate::constants::{
    HID_OUTPUT_REPORT, HID_SET_REPORT, USB_CHUNK_DELAY, USB_CHUNK_SIZE, USB_CONFIGURATION, USB_READ_TIMEOUT,
    USB_WRITE_TIMEOUT,
};
use crate::error::InverterError;
use crate::transport::{Link, Transport, truncate_at_terminator};
use bytes::BytesMut;
use nusb::transfer::{ControlOut, ControlType, EndpointType, Recipient, RequestBuffer, TransferError};
use nusb::{Device, Interface};
use std::fmt;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

/// Inverter HID bridge reached through raw USB transfers.
#[derive(Debug, Clone)]
pub struct UsbHid {
    vendor_id: u16,
    product_id: u16,
    interface: u8,
    chunk_delay: Duration,
    read_timeout: Duration,
}

impl UsbHid {
    pub fn new(vendor_id: u16, product_id: u16, interface: u8) -> Self {
        Self {
            vendor_id,
            product_id,
            interface,
            chunk_delay: USB_CHUNK_DELAY,
            read_timeout: USB_READ_TIMEOUT,
        }
    }

    pub fn with_chunk_delay(mut self, chunk_delay: Duration) -> Self {
        self.chunk_delay = chunk_delay;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }
}

impl Transport for UsbHid {
    type Link = UsbHidLink;

    async fn open(&self) -> Result<UsbHidLink, InverterError> {
        let device_info = nusb::list_devices()?
            .find(|d| d.vendor_id() == self.vendor_id && d.product_id() == self.product_id)
            .ok_or(InverterError::DeviceNotFound {
                vendor_id: self.vendor_id,
                product_id: self.product_id,
            })?;

        info!(
            "Found inverter on bus {} addr {}",
            device_info.bus_number(),
            device_info.device_address()
        );

        let device = device_info.open()?;
        if let Err(e) = device.set_configuration(USB_CONFIGURATION) {
            // Usually means the configuration is already active
            debug!("set_configuration({}) failed: {}", USB_CONFIGURATION, e);
        }

        let endpoints = find_endpoints(&device, self.interface)?;
        let interface = device
            .detach_and_claim_interface(self.interface)
            .map_err(|source| InverterError::ClaimInterface {
                interface: self.interface,
                source,
            })?;
        debug!(
            interface = self.interface,
            ep_in = %format!("{:#04x}", endpoints.input),
            ep_out = ?endpoints.output,
            "Interface claimed"
        );

        Ok(UsbHidLink {
            interface,
            interface_number: self.interface,
            endpoints,
            chunk_delay: self.chunk_delay,
            read_timeout: self.read_timeout,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Endpoints {
    input: u8,
    input_packet_size: usize,
    output: Option<u8>,
}

/// First IN and first OUT endpoint of the interface's default alt setting.
fn find_endpoints(device: &Device, interface_number: u8) -> Result<Endpoints, InverterError> {
    let config = device
        .active_configuration()
        .map_err(|e| InverterError::Configuration(e.to_string()))?;

    for group in config.interfaces() {
        if group.interface_number() != interface_number {
            continue;
        }
        let Some(setting) = group.alt_settings().next() else {
            continue;
        };
        let endpoints = setting
            .endpoints()
            .map(|endpoint| (endpoint.address(), endpoint.transfer_type(), endpoint.max_packet_size()));
        return select_endpoints(endpoints).ok_or_else(|| {
            InverterError::Configuration(format!("no IN endpoint on interface {}", interface_number))
        });
    }

    Err(InverterError::Configuration(format!(
        "interface {} not present",
        interface_number
    )))
}

/// Picks endpoints from `(address, transfer type, max packet size)` descriptors.
fn select_endpoints(descriptors: impl IntoIterator<Item = (u8, EndpointType, usize)>) -> Option<Endpoints> {
    let mut input = None;
    let mut output = None;
    for (address, transfer_type, max_packet_size) in descriptors {
        if transfer_type == EndpointType::Control {
            continue;
        }
        if address & 0x80 != 0 {
            input.get_or_insert((address, max_packet_size));
        } else {
            output.get_or_insert(address);
        }
    }

    let (input, input_packet_size) = input?;
    Some(Endpoints {
        input,
        input_packet_size: input_packet_size.max(USB_CHUNK_SIZE),
        output,
    })
}

/// Splits a frame into zero-padded HID output reports.
fn reports(frame: &[u8]) -> impl Iterator<Item = [u8; USB_CHUNK_SIZE]> + '_ {
    frame.chunks(USB_CHUNK_SIZE).map(|chunk| {
        let mut report = [0u8; USB_CHUNK_SIZE];
        report[..chunk.len()].copy_from_slice(chunk);
        report
    })
}

/// A claimed interface; released when dropped.
pub struct UsbHidLink {
    interface: Interface,
    interface_number: u8,
    endpoints: Endpoints,
    chunk_delay: Duration,
    read_timeout: Duration,
}

impl fmt::Debug for UsbHidLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsbHidLink")
            .field("interface", &self.interface_number)
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

impl UsbHidLink {
    async fn write_report(&self, report: Vec<u8>) -> Result<(), InverterError> {
        match self.endpoints.output {
            Some(endpoint) => {
                let transfer = self.interface.interrupt_out(endpoint, report);
                timeout(USB_WRITE_TIMEOUT, transfer).await?.into_result()?;
            }
            None => {
                let transfer = self.interface.control_out(ControlOut {
                    control_type: ControlType::Class,
                    recipient: Recipient::Interface,
                    request: HID_SET_REPORT,
                    value: HID_OUTPUT_REPORT,
                    index: self.interface_number as u16,
                    data: &report,
                });
                timeout(USB_WRITE_TIMEOUT, transfer).await?.into_result()?;
            }
        }
        Ok(())
    }
}

impl Link for UsbHidLink {
    async fn write(&mut self, frame: &[u8]) -> Result<(), InverterError> {
        debug!(bytes = hex::encode(frame), "USB Write");
        for report in reports(frame) {
            self.write_report(report.to_vec()).await?;
            sleep(self.chunk_delay).await;
        }
        Ok(())
    }

    async fn read_until(&mut self, terminator: u8, overall: Duration) -> Result<BytesMut, InverterError> {
        let deadline = Instant::now() + overall;
        let mut response = BytesMut::new();

        while Instant::now() < deadline {
            let transfer = self
                .interface
                .interrupt_in(self.endpoints.input, RequestBuffer::new(self.endpoints.input_packet_size));
            let data = match timeout(self.read_timeout, transfer).await {
                Ok(completion) => match completion.into_result() {
                    Ok(data) => data,
                    Err(TransferError::Cancelled) => continue,
                    Err(e) => return Err(e.into()),
                },
                // No data yet
                Err(_) => continue,
            };
            response.extend_from_slice(&data);
            // Reports are zero-padded past the terminator
            if truncate_at_terminator(&mut response, terminator) {
                break;
            }
        }

        if response.is_empty() {
            warn!("No data on endpoint {:#04x} within {:?}", self.endpoints.input, overall);
        } else {
            debug!(bytes = hex::encode(&response), "USB Read");
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_are_zero_padded() {
        assert_eq!(reports(b"QMOD\x49\xC1\r").collect::<Vec<_>>(), vec![*b"QMOD\x49\xC1\r\0"]);

        let chunks: Vec<_> = reports(b"QPIGS\xB7\xA9\rX").collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(&chunks[0], b"QPIGS\xB7\xA9\r");
        assert_eq!(&chunks[1], b"X\0\0\0\0\0\0\0");
    }

    #[test]
    fn test_empty_frame_has_no_reports() {
        assert_eq!(reports(b"").count(), 0);
    }

    #[test]
    fn test_select_endpoints() {
        let endpoints = select_endpoints([
            (0x00, EndpointType::Control, 64),
            (0x81, EndpointType::Interrupt, 8),
            (0x82, EndpointType::Interrupt, 64),
            (0x02, EndpointType::Interrupt, 8),
        ]);
        assert_eq!(
            endpoints,
            Some(Endpoints {
                input: 0x81,
                input_packet_size: 8,
                output: Some(0x02),
            })
        );
    }

    #[test]
    fn test_select_endpoints_without_out_uses_control() {
        let endpoints = select_endpoints([(0x81, EndpointType::Interrupt, 4)]).unwrap();
        assert_eq!(endpoints.output, None);
        // Never read less than a full report
        assert_eq!(endpoints.input_packet_size, USB_CHUNK_SIZE);
    }

    #[test]
    fn test_select_endpoints_requires_input() {
        assert_eq!(select_endpoints([(0x01, EndpointType::Interrupt, 8)]), None);
    }
}
