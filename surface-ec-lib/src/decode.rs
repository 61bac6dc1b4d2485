//! Payload decoding for EC responses.
//!
//! Each request kind has a fixed layout table: field name, byte offset, width
//! and encoding. A single routine, [`decode`], walks a table over the raw
//! response payload. The layouts follow the ACPI objects the EC mirrors
//! (`_PSR`, `_STA`, `_BST`, `_BIX`); integers are little-endian and read with
//! the width the EC firmware fills in, which for most 32-bit ACPI fields is
//! only the low 3 bytes.

use crate::error::ECError;
use byteorder::{ByteOrder, LittleEndian};
use num_enum::TryFromPrimitive;
use std::fmt;
use strum_macros::Display;

/// How the bytes of a field are turned into a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Little-endian unsigned integer, as wide as the field (at most 8 bytes).
    UnsignedLe,
    /// ASCII text padded with trailing NUL bytes.
    Ascii,
}

/// One entry of a layout table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub offset: usize,
    pub width: usize,
    pub encoding: Encoding,
}

impl FieldSpec {
    const fn uint(name: &'static str, offset: usize, width: usize) -> Self {
        Self {
            name,
            offset,
            width,
            encoding: Encoding::UnsignedLe,
        }
    }

    const fn ascii(name: &'static str, offset: usize, width: usize) -> Self {
        Self {
            name,
            offset,
            width,
            encoding: Encoding::Ascii,
        }
    }

    /// Payload length this field needs to be present.
    pub fn end(&self) -> usize {
        self.offset + self.width
    }
}

/// Field names shared between the layout tables and their consumers.
pub mod field {
    pub const BASE_STATUS: &str = "Base Status";
    pub const POWER_SOURCE: &str = "Power Source";
    pub const BATTERY_STATUS: &str = "Battery Status";

    pub const STATE: &str = "State";
    pub const PRESENT_RATE: &str = "Present Rate";
    pub const REMAINING_CAPACITY: &str = "Remaining Capacity";
    pub const PRESENT_VOLTAGE: &str = "Present Voltage";

    pub const REVISION: &str = "Revision";
    pub const POWER_UNIT: &str = "Power Unit";
    pub const DESIGN_CAPACITY: &str = "Design Capacity";
    pub const LAST_FULL_CAPACITY: &str = "Last Full Charge Capacity";
    pub const BAT_PRESENT: &str = "Bat Present";
    pub const DESIGN_VOLTAGE: &str = "Design Voltage";
    pub const DESIGN_CAPACITY_WARNING: &str = "Design Capacity of Warning";
    pub const DESIGN_CAPACITY_LOW: &str = "Design Capacity of Low";
    pub const CYCLE_COUNT: &str = "Cycle Count";
    pub const MEASUREMENT_ACCURACY: &str = "Measurement Accuracy";
    pub const MAX_SAMPLING_TIME: &str = "Max Sampling Time";
    pub const MIN_SAMPLING_TIME: &str = "Min Sampling Time";
    pub const MAX_AVERAGING_INTERVAL: &str = "Max Averaging Interval";
    pub const MIN_AVERAGING_INTERVAL: &str = "Min Averaging Interval";
    pub const CAPACITY_GRANULARITY_1: &str = "Capacity Granularity 1";
    pub const CAPACITY_GRANULARITY_2: &str = "Capacity Granularity 2";
    pub const MODEL_NUMBER: &str = "Model Number";
    pub const SERIAL_NUMBER: &str = "Serial Number";
    pub const TECHNOLOGY: &str = "Technology";
    pub const MANUFACTURER: &str = "Manufacturer";
}

/// `GBOS`: base (clipboard) attach status.
pub const BASE_STATUS_LAYOUT: &[FieldSpec] = &[FieldSpec::uint(field::BASE_STATUS, 0, 1)];

/// `_PSR`: AC adapter online.
pub const POWER_SOURCE_LAYOUT: &[FieldSpec] = &[FieldSpec::uint(field::POWER_SOURCE, 0, 3)];

/// `_STA`: battery device status.
pub const BATTERY_STATUS_LAYOUT: &[FieldSpec] = &[FieldSpec::uint(field::BATTERY_STATUS, 0, 3)];

/// `_BST`: dynamic battery information.
pub const BATTERY_DYNAMIC_LAYOUT: &[FieldSpec] = &[
    FieldSpec::uint(field::STATE, 0, 3),
    FieldSpec::uint(field::PRESENT_RATE, 4, 3),
    FieldSpec::uint(field::REMAINING_CAPACITY, 8, 3),
    FieldSpec::uint(field::PRESENT_VOLTAGE, 12, 3),
];

/// `_BIX`: static battery information.
#[rustfmt::skip]
pub const BATTERY_STATIC_LAYOUT: &[FieldSpec] = &[
    FieldSpec::uint(field::REVISION, 0, 1),
    FieldSpec::uint(field::POWER_UNIT, 1, 3),
    FieldSpec::uint(field::DESIGN_CAPACITY, 5, 3),
    FieldSpec::uint(field::LAST_FULL_CAPACITY, 9, 3),
    FieldSpec::uint(field::BAT_PRESENT, 13, 3),
    FieldSpec::uint(field::DESIGN_VOLTAGE, 17, 3),
    FieldSpec::uint(field::DESIGN_CAPACITY_WARNING, 21, 3),
    FieldSpec::uint(field::DESIGN_CAPACITY_LOW, 25, 3),
    FieldSpec::uint(field::CYCLE_COUNT, 29, 3),
    FieldSpec::uint(field::MEASUREMENT_ACCURACY, 33, 3),
    FieldSpec::uint(field::MAX_SAMPLING_TIME, 37, 3),
    FieldSpec::uint(field::MIN_SAMPLING_TIME, 41, 3),
    FieldSpec::uint(field::MAX_AVERAGING_INTERVAL, 45, 3),
    FieldSpec::uint(field::MIN_AVERAGING_INTERVAL, 49, 3),
    FieldSpec::uint(field::CAPACITY_GRANULARITY_1, 53, 3),
    FieldSpec::uint(field::CAPACITY_GRANULARITY_2, 57, 3),
    FieldSpec::ascii(field::MODEL_NUMBER, 61, 20),
    FieldSpec::ascii(field::SERIAL_NUMBER, 82, 10),
    FieldSpec::ascii(field::TECHNOLOGY, 93, 4),
    FieldSpec::ascii(field::MANUFACTURER, 98, 20),
];

/// A decoded field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Unsigned(u64),
    Text(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Unsigned(v) => write!(f, "{:#x}", v),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

/// Decoded fields of one response, in layout order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecodedPayload {
    fields: Vec<(&'static str, FieldValue)>,
}

impl DecodedPayload {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    /// Integer value of `name`, or `None` when missing or not an integer field.
    pub fn unsigned(&self, name: &str) -> Option<u64> {
        match self.get(name)? {
            FieldValue::Unsigned(v) => Some(*v),
            FieldValue::Text(_) => None,
        }
    }

    /// Text value of `name`, or `None` when missing or not a text field.
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            FieldValue::Text(s) => Some(s.as_str()),
            FieldValue::Unsigned(_) => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &FieldValue)> {
        self.fields.iter().map(|(n, v)| (*n, v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl fmt::Display for DecodedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.iter() {
            writeln!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}

/// Decode `payload` according to `layout`.
///
/// Bytes past the last field are ignored. A payload too short for any field
/// is a firmware contract violation and yields [`ECError::OutOfRange`].
pub fn decode(layout: &[FieldSpec], payload: &[u8]) -> Result<DecodedPayload, ECError> {
    let mut fields = Vec::with_capacity(layout.len());
    for entry in layout {
        let bytes = payload.get(entry.offset..entry.end()).ok_or(ECError::OutOfRange {
            field: entry.name,
            needed: entry.end(),
            actual: payload.len(),
        })?;
        let value = match entry.encoding {
            Encoding::UnsignedLe => FieldValue::Unsigned(LittleEndian::read_uint(bytes, entry.width)),
            Encoding::Ascii => FieldValue::Text(String::from_utf8_lossy(bytes).trim_end_matches('\0').to_string()),
        };
        fields.push((entry.name, value));
    }
    Ok(DecodedPayload { fields })
}

/// Battery state as reported in `_BST`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, TryFromPrimitive)]
#[repr(u8)]
pub enum BatteryState {
    #[strum(to_string = "None")]
    Idle = 0,
    #[strum(to_string = "Discharging")]
    Discharging = 1,
    #[strum(to_string = "Charging")]
    Charging = 2,
    #[strum(to_string = "Critical")]
    Critical = 4,
    #[strum(to_string = "Critical (Discharging)")]
    CriticalDischarging = 5,
    #[strum(to_string = "Critical (Charging)")]
    CriticalCharging = 6,
}

impl BatteryState {
    pub fn from_code(code: u64) -> Result<Self, ECError> {
        u8::try_from(code)
            .ok()
            .and_then(|c| BatteryState::try_from_primitive(c).ok())
            .ok_or(ECError::UnknownStateCode(code))
    }
}

/// Remaining charge in percent of the last full charge, 0 when unknown.
pub fn remaining_percentage(remaining_capacity: u64, last_full_capacity: u64) -> u64 {
    if last_full_capacity == 0 {
        return 0;
    }
    remaining_capacity * 100 / last_full_capacity
}

/// Combined view of a battery's `_BIX` and `_BST` responses.
#[derive(Debug, Clone, PartialEq)]
pub struct BatterySummary {
    pub state: BatteryState,
    pub present: u64,
    pub technology: String,
    pub cycle_count: u64,
    pub design_voltage_mv: u64,
    pub voltage_mv: u64,
    pub present_rate: u64,
    pub design_capacity: u64,
    pub last_full_capacity: u64,
    pub remaining_capacity: u64,
    pub low_capacity: u64,
    pub percentage: u64,
    pub model: String,
    pub serial: String,
    pub manufacturer: String,
}

fn require_unsigned(payload: &DecodedPayload, name: &'static str) -> Result<u64, ECError> {
    payload.unsigned(name).ok_or(ECError::OutOfRange {
        field: name,
        needed: 1,
        actual: 0,
    })
}

fn require_text(payload: &DecodedPayload, name: &'static str) -> Result<String, ECError> {
    payload.text(name).map(str::to_string).ok_or(ECError::OutOfRange {
        field: name,
        needed: 1,
        actual: 0,
    })
}

impl BatterySummary {
    /// Derive the summary from decoded static (`_BIX`) and dynamic (`_BST`) info.
    pub fn from_payloads(static_info: &DecodedPayload, dynamic_info: &DecodedPayload) -> Result<Self, ECError> {
        let state = BatteryState::from_code(require_unsigned(dynamic_info, field::STATE)?)?;
        let last_full_capacity = require_unsigned(static_info, field::LAST_FULL_CAPACITY)?;
        let remaining_capacity = require_unsigned(dynamic_info, field::REMAINING_CAPACITY)?;

        Ok(Self {
            state,
            present: require_unsigned(static_info, field::BAT_PRESENT)?,
            technology: require_text(static_info, field::TECHNOLOGY)?,
            cycle_count: require_unsigned(static_info, field::CYCLE_COUNT)?,
            design_voltage_mv: require_unsigned(static_info, field::DESIGN_VOLTAGE)?,
            voltage_mv: require_unsigned(dynamic_info, field::PRESENT_VOLTAGE)?,
            present_rate: require_unsigned(dynamic_info, field::PRESENT_RATE)?,
            design_capacity: require_unsigned(static_info, field::DESIGN_CAPACITY)?,
            last_full_capacity,
            remaining_capacity,
            low_capacity: require_unsigned(static_info, field::DESIGN_CAPACITY_LOW)?,
            percentage: remaining_percentage(remaining_capacity, last_full_capacity),
            model: require_text(static_info, field::MODEL_NUMBER)?,
            serial: require_text(static_info, field::SERIAL_NUMBER)?,
            manufacturer: require_text(static_info, field::MANUFACTURER)?,
        })
    }

    /// Hours left at the present rate, `None` when idle or the rate is zero.
    pub fn remaining_hours(&self) -> Option<f64> {
        if self.state == BatteryState::Idle || self.present_rate == 0 {
            return None;
        }
        Some(self.remaining_capacity as f64 / self.present_rate as f64)
    }
}
