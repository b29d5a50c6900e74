pub mod chardev;
pub mod checksum;
pub mod config;
pub mod constants;
pub mod device;
pub mod error;
pub mod protocol;
pub mod rated;
pub mod status;
pub mod transport;
pub mod usb;
pub mod warnings;

// Re-export the session type and its configuration for easy access
pub use config::{InverterConfig, Timing, TransportConfig};
pub use device::{Inverter, Reply};
pub use error::InverterError;
pub use protocol::Command;
