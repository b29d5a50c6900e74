// src/error.rs

use nusb::transfer::TransferError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// The primary error type for the `axpert-rs` library.
#[derive(Error, Debug)]
pub enum InverterError {
    #[error("USB device {vendor_id:04x}:{product_id:04x} not found. Is the inverter connected?")]
    DeviceNotFound { vendor_id: u16, product_id: u16 },

    #[error("Failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to claim USB interface {interface}: {source}")]
    ClaimInterface {
        interface: u8,
        #[source]
        source: io::Error,
    },

    #[error("USB configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("USB transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Timeout during inverter operation: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("No response from inverter to {command}")]
    NoResponse { command: String },

    #[error("Command \"{command}\" not supported")]
    UnsupportedCommand { command: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl InverterError {
    /// True for failures of the underlying channel (open, claim, read, write),
    /// as opposed to the device answering with something we did not want.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            InverterError::DeviceNotFound { .. }
                | InverterError::Open { .. }
                | InverterError::ClaimInterface { .. }
                | InverterError::Configuration(_)
                | InverterError::Io(_)
                | InverterError::Transfer(_)
                | InverterError::Timeout(_)
        )
    }
}

/// Why a decoded payload could not be turned into a typed record.
///
/// Never surfaced by the high-level getters: they log it and return nothing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Response too short: expected at least {expected} fields, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("Invalid value {value:?} for field {name} at index {index}")]
    InvalidField {
        index: usize,
        name: &'static str,
        value: String,
    },
}
