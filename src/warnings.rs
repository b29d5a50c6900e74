//! Warning bits (QPIWS), operating mode (QMOD) and model codes (QGMN).

use num_enum::{FromPrimitive, IntoPrimitive, TryFromPrimitive};
use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;
use std::fmt;
use strum_macros::Display;

/// A named QPIWS bit; the discriminant is its position in the bit string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, TryFromPrimitive, Serialize)]
#[repr(u8)]
#[serde(rename_all = "snake_case")]
pub enum Warning {
    // 0 is reserved
    #[strum(to_string = "Inverter Fault")]
    InverterFault = 1,
    #[strum(to_string = "Bus Over")]
    BusOver = 2,
    #[strum(to_string = "Bus Under")]
    BusUnder = 3,
    #[strum(to_string = "Bus Soft Fail")]
    BusSoftFail = 4,
    #[strum(to_string = "Line Fail")]
    LineFail = 5,
    #[strum(to_string = "OPV Short")]
    OpvShort = 6,
    #[strum(to_string = "Inverter Voltage Too Low")]
    InverterVoltageTooLow = 7,
    #[strum(to_string = "Inverter Voltage Too High")]
    InverterVoltageTooHigh = 8,
    #[strum(to_string = "Over Temperature")]
    OverTemperature = 9,
    #[strum(to_string = "Fan Locked")]
    FanLocked = 10,
    #[strum(to_string = "Battery Voltage High")]
    BatteryVoltageHigh = 11,
    #[strum(to_string = "Battery Low Alarm")]
    BatteryLowAlarm = 12,
    // 13 is reserved
    #[strum(to_string = "Battery Under Shutdown")]
    BatteryUnderShutdown = 14,
    // 15 is reserved
    #[strum(to_string = "Over Load")]
    OverLoad = 16,
    #[strum(to_string = "EEPROM Fault")]
    EepromFault = 17,
    #[strum(to_string = "Inverter Over Current")]
    InverterOverCurrent = 18,
    #[strum(to_string = "Inverter Soft Fail")]
    InverterSoftFail = 19,
    #[strum(to_string = "Self Test Fail")]
    SelfTestFail = 20,
    #[strum(to_string = "OP DC Voltage Over")]
    OpDcVoltageOver = 21,
    #[strum(to_string = "Battery Open")]
    BatteryOpen = 22,
    #[strum(to_string = "Current Sensor Fail")]
    CurrentSensorFail = 23,
    #[strum(to_string = "Battery Short")]
    BatteryShort = 24,
    #[strum(to_string = "Power Limit")]
    PowerLimit = 25,
    #[strum(to_string = "PV Voltage High")]
    PvVoltageHigh = 26,
    #[strum(to_string = "MPPT Overload")]
    MpptOverload = 27,
    #[strum(to_string = "MPPT Over Temperature")]
    MpptOverTemperature = 28,
    #[strum(to_string = "Battery Too Low To Charge")]
    BatteryTooLowToCharge = 29,
    // 30 and 31 are reserved
}

impl Warning {
    pub fn index(self) -> usize {
        self as usize
    }
}

/// The raw QPIWS bit string; empty when the query failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarningFlags(String);

impl WarningFlags {
    pub fn new(bits: impl Into<String>) -> Self {
        Self(bits.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `None` when the string is too short to carry this bit.
    pub fn is_active(&self, warning: Warning) -> Option<bool> {
        self.0.as_bytes().get(warning.index()).map(|&bit| bit == b'1')
    }

    /// Named warnings whose bit is set, in bit order.
    pub fn active(&self) -> Vec<Warning> {
        self.0
            .bytes()
            .enumerate()
            .filter(|&(_, bit)| bit == b'1')
            .filter_map(|(index, _)| u8::try_from(index).ok())
            .filter_map(|index| Warning::try_from(index).ok())
            .collect()
    }
}

impl fmt::Display for WarningFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let active = self.active();
        if self.is_empty() {
            write!(f, "Warnings unavailable")
        } else if active.is_empty() {
            write!(f, "No active warnings ({})", self.0)
        } else {
            let names: Vec<String> = active.iter().map(ToString::to_string).collect();
            write!(f, "{} ({})", names.join(", "), self.0)
        }
    }
}

impl Serialize for WarningFlags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("WarningFlags", 2)?;
        state.serialize_field("bits", &self.0)?;
        state.serialize_field("active", &self.active())?;
        state.end()
    }
}

/// Operating mode reported by QMOD as a single letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum DeviceMode {
    PowerOn = b'P',
    Standby = b'S',
    Line = b'L',
    Battery = b'B',
    Fault = b'F',
    PowerSaving = b'H',
    Shutdown = b'D',

    #[num_enum(catch_all)]
    Unknown(u8),
}

impl DeviceMode {
    /// Mode from the QMOD payload (`L`, or `(L` if the prefix survived).
    pub fn parse(payload: &str) -> Self {
        let code = payload.trim().trim_start_matches('(').bytes().next().unwrap_or(0);
        Self::from(code)
    }

    pub fn code(self) -> char {
        char::from(u8::from(self))
    }
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceMode::PowerOn => write!(f, "Power On"),
            DeviceMode::Standby => write!(f, "Standby"),
            DeviceMode::Line => write!(f, "Line"),
            DeviceMode::Battery => write!(f, "Battery"),
            DeviceMode::Fault => write!(f, "Fault"),
            DeviceMode::PowerSaving => write!(f, "Power Saving"),
            DeviceMode::Shutdown => write!(f, "Shutdown"),
            DeviceMode::Unknown(0) => write!(f, "Unknown"),
            DeviceMode::Unknown(code) => write!(f, "Unknown ({})", char::from(*code)),
        }
    }
}

impl Serialize for DeviceMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Model name for a QGMN code such as `"023"`.
pub fn model_name(code: &str) -> Option<&'static str> {
    let name = match code {
        "001" => "VP-5000",
        "002" => "VM-5000",
        "003" => "VP-3000",
        "004" => "VM-3000",
        "005" => "MKS+-2000-48-LV-LY",
        "006" => "Axpert MLV 3K-24",
        "007" => "Axpert PLV 3K-24",
        "008" => "Axpert MKS 3KP",
        "009" => "Axpert KS 3KP",
        "010" => "Axpert MKS 5KP",
        "011" => "Axpert KS 5KP",
        "012" => "Axpert MKS 4K/5K 64VDC",
        "013" => "Axpert KS 4K/5K 64VDC",
        "014" => "Axpert MKS 4K/5K",
        "015" => "Axpert KS 4K/5K",
        "016" => "ALFA M-5000",
        "017" => "ALFA P-5000",
        "018" => "Axpert Plus Duo/Tri 5KVA",
        "019" => "Axpert EPS 5KW",
        "020" => "Axpert EPS M-5KW",
        "021" => "Axpert EPS 33-5KW",
        "022" => "Axpert MKS II 5KW",
        "023" => "AXPERT KING 5KW",
        "024" => "AXPERT KING 3KW",
        "025" => "APT MKS II 5KW (Feed-in grid)",
        "026" => "Axpert MLV 5KW-48V",
        "027" => "AXPERT VMIII",
        "028" => "APT VMIII 3.2KW (Feed-in grid)",
        "029" => "AXPERT VMII",
        "030" => "Fusion VMII (Feed-in grid)",
        "031" => "Phocos MKS II 5KW",
        "032" => "Axpert MKS Zero LV 0.7KW",
        "033" => "Axpert MKS Zero LV 1.4KW",
        "034" => "Axpert MKS Zero LV 2.6KW",
        "035" => "AXPERT KING 5KW (Energy)",
        "036" => "AXPERT KING 3KW (Energy)",
        "037" => "AXPERT VMIII (Energy)",
        "038" => "Phocos MKS II 5KW (Energy)",
        "039" => "Phocos MKS II 5KW LV",
        "040" => "Axpert SE 3.5K",
        "041" => "Axpert SE 5.5K",
        "042" => "AXPERT MKS III 5KW",
        "043" => "MAX 3.6K",
        "044" => "MAX 7.2K",
        "045" => "MAX 5K LV",
        _ => return None,
    };
    Some(name)
}
