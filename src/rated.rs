use crate::error::DecodeError;
use crate::status::Fields;
use clap::ValueEnum;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;
use std::fmt;
use strum_macros::Display;

/// Fields 0..=16 must be present
pub const QPIRI_MIN_FIELDS: usize = 17;

/// Output source priority, set with `POPnn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, TryFromPrimitive, IntoPrimitive, Serialize, ValueEnum)]
#[repr(u8)]
#[serde(rename_all = "snake_case")]
pub enum OutputSourcePriority {
    #[strum(to_string = "Utility first")]
    UtilityFirst = 0,
    #[strum(to_string = "Solar first")]
    SolarFirst = 1,
    #[strum(to_string = "SBU priority")]
    SbuPriority = 2,
}

/// Charger source priority, set with `PCPnn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, TryFromPrimitive, IntoPrimitive, Serialize, ValueEnum)]
#[repr(u8)]
#[serde(rename_all = "snake_case")]
pub enum ChargerSourcePriority {
    #[strum(to_string = "Utility first")]
    UtilityFirst = 0,
    #[strum(to_string = "Solar first")]
    SolarFirst = 1,
    #[strum(to_string = "Solar and utility")]
    SolarAndUtility = 2,
    #[strum(to_string = "Only solar")]
    OnlySolar = 3,
}

/// Set with `PBTnn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, TryFromPrimitive, IntoPrimitive, Serialize, ValueEnum)]
#[repr(u8)]
#[serde(rename_all = "snake_case")]
pub enum BatteryType {
    #[strum(to_string = "AGM")]
    Agm = 0,
    Flooded = 1,
    User = 2,
}

/// Set with `PGRnn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, TryFromPrimitive, IntoPrimitive, Serialize, ValueEnum)]
#[repr(u8)]
#[serde(rename_all = "snake_case")]
pub enum AcInputRange {
    Appliance = 0,
    #[strum(to_string = "UPS")]
    Ups = 1,
}

/// Ratings and current settings (QPIRI).
///
/// Only the ratings are guaranteed; settings beyond index 7 vary between
/// firmware revisions and are `None` when missing or unparseable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatedInformation {
    pub grid_rating_voltage: f32,
    pub grid_rating_current: f32,
    pub ac_output_rating_voltage: f32,
    pub ac_output_rating_frequency: f32,
    pub ac_output_rating_current: f32,
    pub ac_output_rating_apparent_power: u32,
    pub ac_output_rating_active_power: u32,
    pub battery_rating_voltage: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_recharge_voltage: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_under_voltage: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_bulk_voltage: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_float_voltage: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_type: Option<BatteryType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_ac_charging_current: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_charging_current: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ac_input_range: Option<AcInputRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_source_priority: Option<OutputSourcePriority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charger_source_priority: Option<ChargerSourcePriority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_redischarge_voltage: Option<f32>,
}

impl RatedInformation {
    pub fn parse(payload: &str) -> Result<Self, DecodeError> {
        let fields = Fields::split(payload, QPIRI_MIN_FIELDS)?;

        Ok(Self {
            grid_rating_voltage: fields.required(0, "grid_rating_voltage")?,
            grid_rating_current: fields.required(1, "grid_rating_current")?,
            ac_output_rating_voltage: fields.required(2, "ac_output_rating_voltage")?,
            ac_output_rating_frequency: fields.required(3, "ac_output_rating_frequency")?,
            ac_output_rating_current: fields.required(4, "ac_output_rating_current")?,
            ac_output_rating_apparent_power: fields.required(5, "ac_output_rating_apparent_power")?,
            ac_output_rating_active_power: fields.required(6, "ac_output_rating_active_power")?,
            battery_rating_voltage: fields.required(7, "battery_rating_voltage")?,
            battery_recharge_voltage: fields.optional(8, "battery_recharge_voltage"),
            battery_under_voltage: fields.optional(9, "battery_under_voltage"),
            battery_bulk_voltage: fields.optional(10, "battery_bulk_voltage"),
            battery_float_voltage: fields.optional(11, "battery_float_voltage"),
            battery_type: selector(&fields, 12, "battery_type"),
            max_ac_charging_current: fields.optional(13, "max_ac_charging_current"),
            max_charging_current: fields.optional(14, "max_charging_current"),
            ac_input_range: selector(&fields, 15, "ac_input_range"),
            output_source_priority: selector(&fields, 16, "output_source_priority"),
            charger_source_priority: selector(&fields, 17, "charger_source_priority"),
            battery_redischarge_voltage: fields.optional(22, "battery_redischarge_voltage"),
        })
    }
}

impl fmt::Display for RatedInformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Grid rating:      {:.1} V {:.1} A", self.grid_rating_voltage, self.grid_rating_current)?;
        writeln!(
            f,
            "Output rating:    {:.1} V {:.1} Hz {:.1} A {} VA {} W",
            self.ac_output_rating_voltage,
            self.ac_output_rating_frequency,
            self.ac_output_rating_current,
            self.ac_output_rating_apparent_power,
            self.ac_output_rating_active_power
        )?;
        write!(f, "Battery rating:   {:.1} V", self.battery_rating_voltage)?;

        let volts = |v: Option<f32>| v.map(|v| format!("{:.1} V", v));
        let amps = |a: Option<u32>| a.map(|a| format!("{} A", a));
        let settings = [
            ("Recharge voltage", volts(self.battery_recharge_voltage)),
            ("Cutoff voltage", volts(self.battery_under_voltage)),
            ("Bulk voltage", volts(self.battery_bulk_voltage)),
            ("Float voltage", volts(self.battery_float_voltage)),
            ("Battery type", self.battery_type.map(|v| v.to_string())),
            ("Max AC charging", amps(self.max_ac_charging_current)),
            ("Max charging", amps(self.max_charging_current)),
            ("AC input range", self.ac_input_range.map(|v| v.to_string())),
            ("Output priority", self.output_source_priority.map(|v| v.to_string())),
            ("Charger priority", self.charger_source_priority.map(|v| v.to_string())),
            ("Re-discharge", volts(self.battery_redischarge_voltage)),
        ];
        for (label, value) in settings {
            if let Some(value) = value {
                write!(f, "\n{:<18}{}", format!("{}:", label), value)?;
            }
        }
        Ok(())
    }
}

/// Optional numeric code mapped onto one of the setting enums.
fn selector<E: TryFromPrimitive<Primitive = u8>>(fields: &Fields<'_>, index: usize, name: &'static str) -> Option<E> {
    let code: u8 = fields.optional(index, name)?;
    match E::try_from_primitive(code) {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::debug!(index, name, code, "Unknown setting code");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = "230.0 21.7 230.0 50.0 21.7 5000 4000 48.0 46.0 42.0 56.4 54.0 2 02 060 1 0 2 9 01 0 0 54.0 0 1 000";

    #[test]
    fn test_parse_full_payload() {
        let rated = RatedInformation::parse(FULL).unwrap();
        assert_eq!(rated.grid_rating_voltage, 230.0);
        assert_eq!(rated.ac_output_rating_apparent_power, 5000);
        assert_eq!(rated.ac_output_rating_active_power, 4000);
        assert_eq!(rated.battery_rating_voltage, 48.0);
        assert_eq!(rated.battery_under_voltage, Some(42.0));
        assert_eq!(rated.battery_bulk_voltage, Some(56.4));
        assert_eq!(rated.battery_float_voltage, Some(54.0));
        assert_eq!(rated.battery_type, Some(BatteryType::User));
        assert_eq!(rated.max_ac_charging_current, Some(2));
        assert_eq!(rated.max_charging_current, Some(60));
        assert_eq!(rated.ac_input_range, Some(AcInputRange::Ups));
        assert_eq!(rated.output_source_priority, Some(OutputSourcePriority::UtilityFirst));
        assert_eq!(rated.charger_source_priority, Some(ChargerSourcePriority::SolarAndUtility));
        assert_eq!(rated.battery_redischarge_voltage, Some(54.0));
    }

    #[test]
    fn test_minimum_payload_has_output_priority_only() {
        let payload = FULL.split_whitespace().take(17).collect::<Vec<_>>().join(" ");
        let rated = RatedInformation::parse(&payload).unwrap();
        assert_eq!(rated.output_source_priority, Some(OutputSourcePriority::UtilityFirst));
        assert_eq!(rated.charger_source_priority, None);
        assert_eq!(rated.battery_redischarge_voltage, None);

        let json = serde_json::to_value(&rated).unwrap();
        assert_eq!(json["output_source_priority"], "utility_first");
        assert!(json.get("charger_source_priority").is_none());
    }

    #[test]
    fn test_too_short() {
        let payload = FULL.split_whitespace().take(16).collect::<Vec<_>>().join(" ");
        assert_eq!(
            RatedInformation::parse(&payload),
            Err(DecodeError::TooShort {
                expected: 17,
                actual: 16
            })
        );
    }

    #[test]
    fn test_unknown_codes_are_absent() {
        let payload = FULL.replacen(" 1 0 2 9", " 7 9 8 9", 1);
        let rated = RatedInformation::parse(&payload).unwrap();
        assert_eq!(rated.ac_input_range, None);
        assert_eq!(rated.output_source_priority, None);
        assert_eq!(rated.charger_source_priority, None);
    }

    #[test]
    fn test_setting_codes() {
        assert_eq!(u8::from(OutputSourcePriority::SbuPriority), 2);
        assert_eq!(u8::from(ChargerSourcePriority::OnlySolar), 3);
        assert_eq!(u8::from(BatteryType::Flooded), 1);
        assert_eq!(u8::from(AcInputRange::Ups), 1);
        assert_eq!(ChargerSourcePriority::try_from(1u8).unwrap(), ChargerSourcePriority::SolarFirst);
        assert!(OutputSourcePriority::try_from(3u8).is_err());
        assert_eq!(OutputSourcePriority::SbuPriority.to_string(), "SBU priority");
    }

    #[test]
    fn test_display_skips_missing_settings() {
        let payload = FULL.split_whitespace().take(17).collect::<Vec<_>>().join(" ");
        let text = RatedInformation::parse(&payload).unwrap().to_string();
        assert!(text.contains("Output priority:  Utility first"));
        assert!(!text.contains("Charger priority"));
    }
}
