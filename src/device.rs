// src/device.rs

use crate::config::{InverterConfig, Timing, TransportConfig};
use crate::constants::{CR, MAX_ATTEMPTS};
use crate::error::{DecodeError, InverterError};
use crate::protocol::{Command, Decoded, Integrity, decode_response};
use crate::rated::{AcInputRange, BatteryType, ChargerSourcePriority, OutputSourcePriority, RatedInformation};
use crate::status::GeneralStatus;
use crate::transport::{DeviceTransport, Link, Transport};
use crate::warnings::{DeviceMode, WarningFlags, model_name};
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, warn};

/// Successful outcome of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ack,
    Data(String),
}

impl Reply {
    pub fn is_ack(&self) -> bool {
        matches!(self, Reply::Ack)
    }

    /// The payload text, or the literal `ACK`.
    pub fn into_text(self) -> String {
        match self {
            Reply::Ack => "ACK".to_string(),
            Reply::Data(text) => text,
        }
    }
}

/// What a single attempt produced; the retry driver matches on this.
#[derive(Debug)]
enum Attempt {
    Reply(Reply),
    Nak,
    Empty,
    Transport(InverterError),
}

/// Stamps the session clock when an attempt ends, however it ends.
struct AttemptStamp<'a> {
    last_attempt: &'a mut Option<Instant>,
}

impl Drop for AttemptStamp<'_> {
    fn drop(&mut self) {
        *self.last_attempt = Some(Instant::now());
    }
}

/// A session with one inverter.
///
/// All commands are serialized by an internal lock that is held for pacing,
/// I/O, decoding and the retry of a single logical command.
pub struct Inverter<T: Transport = DeviceTransport> {
    transport: T,
    timing: Timing,
    last_attempt: Mutex<Option<Instant>>,
}

impl Inverter<DeviceTransport> {
    pub fn with_config(config: InverterConfig) -> Self {
        Self::with_transport(DeviceTransport::from_config(&config.transport), config.timing)
    }

    /// Inverter behind a hidraw/tty node.
    pub fn open_path(path: impl Into<std::path::PathBuf>) -> Self {
        Self::with_config(InverterConfig::new(TransportConfig::char_device(path)))
    }

    /// Inverter behind the stock USB HID bridge.
    pub fn open_usb() -> Self {
        Self::with_config(InverterConfig::new(TransportConfig::usb_hid()))
    }
}

impl<T: Transport> Inverter<T> {
    pub fn with_transport(transport: T, timing: Timing) -> Self {
        Self {
            transport,
            timing,
            last_attempt: Mutex::new(None),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    /// Send `command` and return the decoded payload, or `ACK`.
    pub async fn send_command(&self, command: &str) -> Result<String, InverterError> {
        let command = Command::new(command)?;
        self.execute(&command).await.map(Reply::into_text)
    }

    /// Run one logical command: at most [`MAX_ATTEMPTS`] attempts, retrying
    /// once on NAK, empty response or transport failure.
    pub async fn execute(&self, command: &Command) -> Result<Reply, InverterError> {
        let mut session = self.last_attempt.lock().await;

        for attempt in 1..=MAX_ATTEMPTS {
            let final_attempt = attempt == MAX_ATTEMPTS;
            self.pace(*session).await;

            let outcome = {
                let stamp = AttemptStamp {
                    last_attempt: &mut *session,
                };
                let outcome = self.attempt(command).await;
                drop(stamp);
                outcome
            };

            match outcome {
                Attempt::Reply(reply) => return Ok(reply),
                Attempt::Nak if !final_attempt => {
                    warn!(%command, attempt, "Got NAK, retrying in {:?}", self.timing.nak_backoff);
                    sleep(self.timing.nak_backoff).await;
                }
                Attempt::Nak => {
                    error!(%command, "Command rejected after {} attempts", attempt);
                    return Err(InverterError::UnsupportedCommand {
                        command: command.to_string(),
                    });
                }
                Attempt::Empty if !final_attempt => {
                    warn!(%command, attempt, "No response from inverter, retrying");
                    sleep(self.timing.retry_backoff).await;
                }
                Attempt::Empty => {
                    error!(%command, "No response from inverter after {} attempts", attempt);
                    return Err(InverterError::NoResponse {
                        command: command.to_string(),
                    });
                }
                Attempt::Transport(e) if !final_attempt => {
                    warn!(%command, attempt, "Failed to communicate with inverter: {}", e);
                    sleep(self.timing.retry_backoff).await;
                }
                Attempt::Transport(e) => {
                    error!(%command, "Failed to communicate with inverter after retries: {}", e);
                    return Err(e);
                }
            }
        }

        unreachable!("the final attempt always returns")
    }

    async fn pace(&self, last_attempt: Option<Instant>) {
        if let Some(last) = last_attempt {
            let elapsed = last.elapsed();
            if elapsed < self.timing.min_spacing {
                sleep(self.timing.min_spacing - elapsed).await;
            }
        }
    }

    /// Open, write, read and decode once. The link is dropped on return.
    async fn attempt(&self, command: &Command) -> Attempt {
        let mut link = match self.transport.open().await {
            Ok(link) => link,
            Err(e) => return Attempt::Transport(e),
        };

        let frame = command.frame();
        debug!(%command, bytes = hex::encode(&frame), "Sending command");
        if let Err(e) = link.write(&frame).await {
            return Attempt::Transport(e);
        }
        sleep(self.timing.settle_delay).await;

        let raw = match link.read_until(CR, self.timing.response_timeout).await {
            Ok(raw) => raw,
            Err(e) => return Attempt::Transport(e),
        };
        if raw.is_empty() {
            return Attempt::Empty;
        }

        match decode_response(&raw) {
            Decoded::Ack => Attempt::Reply(Reply::Ack),
            Decoded::Nak => Attempt::Nak,
            Decoded::Payload { text, integrity } => {
                match integrity {
                    Integrity::Verified | Integrity::Unchecked => {}
                    Integrity::Recovered { discarded } => {
                        debug!(%command, discarded, "Checksum scan recovered data, garbage detected at end of response")
                    }
                    Integrity::Unverified { received, computed } => warn!(
                        %command,
                        "CRC mismatch: recv {} vs calc {}, smart scan failed to recover",
                        hex::encode(received),
                        hex::encode(computed)
                    ),
                }
                debug!(%command, response = %text, "Response from inverter");
                Attempt::Reply(Reply::Data(text))
            }
        }
    }

    async fn query(&self, mnemonic: &str) -> Result<String, InverterError> {
        let command = Command::new(mnemonic)?;
        self.execute(&command).await.map(Reply::into_text)
    }

    async fn apply(&self, command: Command) -> Result<bool, InverterError> {
        let reply = self.execute(&command).await?;
        if !reply.is_ack() {
            warn!(%command, ?reply, "Setting not acknowledged");
        }
        Ok(reply.is_ack())
    }

    /// Live status (QPIGS). `None` when the payload cannot be decoded.
    pub async fn get_general_status(&self) -> Result<Option<GeneralStatus>, InverterError> {
        let raw = self.query(Command::QPIGS).await?;
        Ok(soft_decode(Command::QPIGS, &raw, GeneralStatus::parse))
    }

    /// Rated information and current settings (QPIRI).
    pub async fn get_rated_information(&self) -> Result<Option<RatedInformation>, InverterError> {
        let raw = self.query(Command::QPIRI).await?;
        Ok(soft_decode(Command::QPIRI, &raw, RatedInformation::parse))
    }

    /// Warning bits (QPIWS); empty on any failure.
    pub async fn get_warnings(&self) -> WarningFlags {
        match self.query(Command::QPIWS).await {
            Ok(raw) => WarningFlags::new(raw),
            Err(e) => {
                error!("Error getting warnings: {}", e);
                WarningFlags::default()
            }
        }
    }

    /// Operating mode (QMOD).
    pub async fn get_mode(&self) -> Result<DeviceMode, InverterError> {
        let raw = self.query(Command::QMOD).await?;
        Ok(DeviceMode::parse(&raw))
    }

    /// Serial number (QID).
    pub async fn get_device_id(&self) -> Result<String, InverterError> {
        self.query(Command::QID).await
    }

    /// Main CPU firmware version (QVFW), without the `VERFW:` tag.
    pub async fn get_firmware_version(&self) -> Result<String, InverterError> {
        let raw = self.query(Command::QVFW).await?;
        Ok(match raw.split_once("VERFW:") {
            Some((_, version)) => version.trim().to_string(),
            None => raw,
        })
    }

    /// Model code (QGMN), empty on failure.
    pub async fn get_model_id(&self) -> String {
        match self.query(Command::QGMN).await {
            Ok(raw) => raw.replace('(', "").trim().to_string(),
            Err(e) => {
                warn!("Error getting model id: {}", e);
                String::new()
            }
        }
    }

    /// Model name for the QGMN code; unknown codes are returned as-is.
    pub async fn get_model_name(&self) -> String {
        let code = self.get_model_id().await;
        model_name(&code).map(str::to_string).unwrap_or(code)
    }

    pub async fn set_output_source_priority(&self, priority: OutputSourcePriority) -> Result<bool, InverterError> {
        self.apply(Command::with_selector("POP", priority.into())?).await
    }

    pub async fn set_charger_source_priority(&self, priority: ChargerSourcePriority) -> Result<bool, InverterError> {
        self.apply(Command::with_selector("PCP", priority.into())?).await
    }

    pub async fn set_battery_type(&self, battery_type: BatteryType) -> Result<bool, InverterError> {
        self.apply(Command::with_selector("PBT", battery_type.into())?).await
    }

    pub async fn set_ac_input_range(&self, range: AcInputRange) -> Result<bool, InverterError> {
        self.apply(Command::with_selector("PGR", range.into())?).await
    }

    pub async fn set_max_charging_current(&self, amps: u16) -> Result<bool, InverterError> {
        self.apply(Command::with_current("MCHGC", amps)?).await
    }

    pub async fn set_max_utility_charging_current(&self, amps: u16) -> Result<bool, InverterError> {
        self.apply(Command::with_current("MUCHGC", amps)?).await
    }

    pub async fn set_battery_cutoff_voltage(&self, volts: f32) -> Result<bool, InverterError> {
        self.apply(Command::with_voltage("PSDV", volts)?).await
    }

    pub async fn set_battery_bulk_voltage(&self, volts: f32) -> Result<bool, InverterError> {
        self.apply(Command::with_voltage("PCVV", volts)?).await
    }

    pub async fn set_battery_float_voltage(&self, volts: f32) -> Result<bool, InverterError> {
        self.apply(Command::with_voltage("PBFT", volts)?).await
    }
}

fn soft_decode<R>(mnemonic: &str, raw: &str, parse: fn(&str) -> Result<R, DecodeError>) -> Option<R> {
    if raw.is_empty() {
        return None;
    }
    match parse(raw) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!("{} {} | Raw: {}", mnemonic, e, raw);
            None
        }
    }
}
