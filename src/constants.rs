// Protocol and timing constants for Voltronic/Axpert inverters

use std::time::Duration;

/// Default USB vendor id of the inverter's HID bridge
pub const VID: u16 = 0x0665;

/// Default USB product id of the inverter's HID bridge
pub const PID: u16 = 0x5161;

/// HID interface carrying the protocol
pub const USB_INTERFACE: u8 = 0;

/// USB configuration value selected before claiming
pub const USB_CONFIGURATION: u8 = 1;

/// Default character device path
pub const DEFAULT_DEVICE_PATH: &str = "/dev/hidraw0";

/// Frame terminator (carriage return)
pub const CR: u8 = 0x0D;

/// Line feed, escaped out of checksum bytes
pub const LF: u8 = 0x0A;

/// Response prefix marker
pub const RESPONSE_PREFIX: u8 = b'(';

/// Size of the checksum appended to every frame
pub const CHECKSUM_SIZE: usize = 2;

/// Characters a genuine response payload may contain
pub const VALID_PAYLOAD_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789 (.-:";

/// Number of attempts per command: one initial plus one retry
pub const MAX_ATTEMPTS: usize = 2;

/// Minimum spacing between the end of one attempt and the start of the next
pub const MIN_COMMAND_SPACING: Duration = Duration::from_millis(500);

/// Time given to the device to start answering after a write
pub const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Overall time allowed for a response to arrive
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep between non-blocking reads of the character device
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Maximum bytes taken from the character device per read
pub const READ_CHUNK_SIZE: usize = 256;

/// Longest response accepted from a device that never sends the terminator
pub const MAX_RESPONSE_SIZE: usize = 4096;

/// Wait before retrying after a NAK
pub const NAK_BACKOFF: Duration = Duration::from_secs(1);

/// Wait before retrying after a transport failure
pub const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// HID report size used for writes
pub const USB_CHUNK_SIZE: usize = 8;

/// Pause between HID report writes
pub const USB_CHUNK_DELAY: Duration = Duration::from_millis(20);

/// Timeout of a single interrupt IN poll; expiry means "no data yet"
pub const USB_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Deadline for a single HID report write
pub const USB_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// HID class request SET_REPORT
pub const HID_SET_REPORT: u8 = 0x09;

/// wValue for SET_REPORT: output report type, report id 0
pub const HID_OUTPUT_REPORT: u16 = 0x0200;
