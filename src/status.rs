use crate::error::DecodeError;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Fields 0..=16 must be present
pub const QPIGS_MIN_FIELDS: usize = 17;

const PV_CHARGING_POWER_INDEX: usize = 19;

/// Live status snapshot (QPIGS).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneralStatus {
    pub grid_voltage: f32,              // V
    pub grid_frequency: f32,            // Hz
    pub ac_output_voltage: f32,         // V
    pub ac_output_frequency: f32,       // Hz
    pub ac_output_apparent_power: u32,  // VA
    pub ac_output_active_power: u32,    // W
    pub output_load_percent: u32,       // %
    pub bus_voltage: u32,               // V
    pub battery_voltage: f32,           // V
    pub battery_charging_current: u32,  // A
    pub battery_capacity: u32,          // %
    pub heat_sink_temperature: i32,     // °C
    pub pv_input_current: f32,          // A
    pub pv_input_voltage: f32,          // V
    pub scc_voltage: f32,               // V
    pub battery_discharge_current: u32, // A
    /// Raw charge/fault flag bits, left as sent
    pub status_binary: String,
    /// Only reported by newer firmware
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pv_charging_power: Option<u32>, // W
}

impl GeneralStatus {
    /// Parse the whitespace-separated QPIGS payload.
    pub fn parse(payload: &str) -> Result<Self, DecodeError> {
        let fields = Fields::split(payload, QPIGS_MIN_FIELDS)?;

        Ok(Self {
            grid_voltage: fields.required(0, "grid_voltage")?,
            grid_frequency: fields.required(1, "grid_frequency")?,
            ac_output_voltage: fields.required(2, "ac_output_voltage")?,
            ac_output_frequency: fields.required(3, "ac_output_frequency")?,
            ac_output_apparent_power: fields.required(4, "ac_output_apparent_power")?,
            ac_output_active_power: fields.required(5, "ac_output_active_power")?,
            output_load_percent: fields.required(6, "output_load_percent")?,
            bus_voltage: fields.required(7, "bus_voltage")?,
            battery_voltage: fields.required(8, "battery_voltage")?,
            battery_charging_current: fields.required(9, "battery_charging_current")?,
            battery_capacity: fields.required(10, "battery_capacity")?,
            heat_sink_temperature: fields.required(11, "heat_sink_temperature")?,
            pv_input_current: fields.required(12, "pv_input_current")?,
            pv_input_voltage: fields.required(13, "pv_input_voltage")?,
            scc_voltage: fields.required(14, "scc_voltage")?,
            battery_discharge_current: fields.required(15, "battery_discharge_current")?,
            status_binary: fields.raw(16).to_string(),
            pv_charging_power: fields.optional(PV_CHARGING_POWER_INDEX, "pv_charging_power"),
        })
    }

    /// PV input power as reported, or estimated from voltage and current.
    pub fn pv_power_w(&self) -> f32 {
        match self.pv_charging_power {
            Some(watts) => watts as f32,
            None => self.pv_input_voltage * self.pv_input_current,
        }
    }
}

impl fmt::Display for GeneralStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "┌─ Grid / Output ─────────────────────────────────────┐")?;
        writeln!(
            f,
            "│ Grid:   {:>6.1} V {:>5.1} Hz | Out: {:>6.1} V {:>5.1} Hz │",
            self.grid_voltage, self.grid_frequency, self.ac_output_voltage, self.ac_output_frequency
        )?;
        writeln!(
            f,
            "│ Load:   {:>5} VA {:>5} W  | {:>3} %  Bus: {:>4} V    │",
            self.ac_output_apparent_power, self.ac_output_active_power, self.output_load_percent, self.bus_voltage
        )?;
        writeln!(f, "├─ Battery ───────────────────────────────────────────┤")?;
        writeln!(
            f,
            "│ {:>6.2} V  {:>3} %  chg {:>3} A  dis {:>3} A  SCC {:>5.2} V │",
            self.battery_voltage,
            self.battery_capacity,
            self.battery_charging_current,
            self.battery_discharge_current,
            self.scc_voltage
        )?;
        writeln!(f, "├─ PV ────────────────────────────────────────────────┤")?;
        writeln!(
            f,
            "│ {:>6.1} V  {:>5.1} A  {:>6.0} W   Heat sink {:>3} °C     │",
            self.pv_input_voltage,
            self.pv_input_current,
            self.pv_power_w(),
            self.heat_sink_temperature
        )?;
        writeln!(f, "│ Status bits: {:<38} │", self.status_binary)?;
        writeln!(f, "└─────────────────────────────────────────────────────┘")
    }
}

/// Positional fields of a whitespace-delimited payload.
pub(crate) struct Fields<'a> {
    parts: Vec<&'a str>,
}

impl<'a> Fields<'a> {
    pub(crate) fn split(payload: &'a str, min_fields: usize) -> Result<Self, DecodeError> {
        let parts: Vec<&str> = payload.split_whitespace().collect();
        if parts.len() < min_fields {
            return Err(DecodeError::TooShort {
                expected: min_fields,
                actual: parts.len(),
            });
        }
        Ok(Self { parts })
    }

    /// Field text; callers only ask for indices below the checked minimum.
    pub(crate) fn raw(&self, index: usize) -> &'a str {
        self.parts.get(index).copied().unwrap_or_default()
    }

    pub(crate) fn required<T: FromStr>(&self, index: usize, name: &'static str) -> Result<T, DecodeError> {
        let value = self.raw(index);
        value.parse().map_err(|_| DecodeError::InvalidField {
            index,
            name,
            value: value.to_string(),
        })
    }

    /// Present and parseable, or `None`.
    pub(crate) fn optional<T: FromStr>(&self, index: usize, name: &'static str) -> Option<T> {
        let value = self.parts.get(index)?;
        match value.parse() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                tracing::debug!(index, name, value, "Ignoring unparseable optional field");
                None
            }
        }
    }
}
