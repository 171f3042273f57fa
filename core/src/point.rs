//! Time-series point and builder
//!
//! A point carries a constant measurement name, static tags attached once at
//! boot, and fields that are cleared and repopulated every cycle. A field is
//! present only when its reading was valid in the current cycle; nothing is
//! ever zero-filled.
//!
//! Points serialise to InfluxDB line protocol without a timestamp, so the
//! server assigns its own receive time.

use core::fmt::{self, Write};

use heapless::{String, Vec};

use crate::config::truncated;
use crate::sensors::{fahrenheit, ReadingKind, Sample};

/// Measurement name of every published point
pub const MEASUREMENT: &str = "airgradient";

/// Field keys
pub mod field {
    pub const PM25: &str = "pm2.5";
    pub const CO2: &str = "co2";
    pub const TEMP_C: &str = "temp_c";
    pub const TEMP_F: &str = "temp_f";
    pub const HUMIDITY: &str = "humidity";
    pub const RSSI: &str = "rssi";
}

/// Tag keys
pub mod tag {
    /// Hardware class
    pub const DEVICE: &str = "device";
    /// Unique device identity
    pub const ID: &str = "id";
    /// Configured device name
    pub const DEVICE_NAME: &str = "device_name";
}

const MAX_TAGS: usize = 4;
const MAX_FIELDS: usize = 8;

/// Maximum tag value length in bytes
pub const TAG_VALUE_MAX: usize = 48;

/// Numeric field value
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FieldValue {
    Integer(i64),
    Float(f32),
}

/// Point construction errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PointError {
    /// No room for another tag or field
    Full,
    /// Tag value longer than `TAG_VALUE_MAX`
    ValueTooLong,
}

impl fmt::Display for PointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "point is full"),
            Self::ValueTooLong => write!(f, "tag value too long"),
        }
    }
}

impl core::error::Error for PointError {}

/// One time-series record
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryPoint {
    measurement: &'static str,
    tags: Vec<(&'static str, String<TAG_VALUE_MAX>), MAX_TAGS>,
    fields: Vec<(&'static str, FieldValue), MAX_FIELDS>,
}

impl TelemetryPoint {
    pub const fn new(measurement: &'static str) -> Self {
        Self {
            measurement,
            tags: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn measurement(&self) -> &str {
        self.measurement
    }

    /// Attach a tag, replacing any earlier value for the same key
    pub fn add_tag(&mut self, key: &'static str, value: &str) -> Result<(), PointError> {
        let value = String::try_from(value).map_err(|_| PointError::ValueTooLong)?;
        if let Some(slot) = self.tags.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
            return Ok(());
        }
        self.tags.push((key, value)).map_err(|_| PointError::Full)
    }

    /// Set a field, replacing any earlier value for the same key
    pub fn add_field(&mut self, key: &'static str, value: FieldValue) -> Result<(), PointError> {
        if let Some(slot) = self.fields.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
            return Ok(());
        }
        self.fields.push((key, value)).map_err(|_| PointError::Full)
    }

    /// Drop every field; tags are kept
    pub fn clear_fields(&mut self) {
        self.fields.clear();
    }

    pub fn has_fields(&self) -> bool {
        !self.fields.is_empty()
    }

    pub fn field(&self, key: &str) -> Option<FieldValue> {
        self.fields.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&'static str, FieldValue)> + '_ {
        self.fields.iter().copied()
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Serialise as one line of InfluxDB line protocol (no trailing newline)
    ///
    /// Tags with empty values are skipped since the server rejects them.
    /// Line breaks cannot be escaped in line protocol and are dropped.
    pub fn write_line_protocol<W: Write>(&self, out: &mut W) -> fmt::Result {
        write_escaped(out, self.measurement, MEASUREMENT_SPECIAL)?;

        for (key, value) in self.tags.iter().filter(|(_, v)| !v.is_empty()) {
            out.write_char(',')?;
            write_escaped(out, key, KEY_SPECIAL)?;
            out.write_char('=')?;
            write_escaped(out, value, KEY_SPECIAL)?;
        }

        for (i, (key, value)) in self.fields.iter().enumerate() {
            out.write_char(if i == 0 { ' ' } else { ',' })?;
            write_escaped(out, key, KEY_SPECIAL)?;
            out.write_char('=')?;
            match value {
                FieldValue::Integer(v) => write!(out, "{}i", v)?,
                FieldValue::Float(v) => write!(out, "{}", v)?,
            }
        }

        Ok(())
    }
}

/// Characters escaped in the measurement name
const MEASUREMENT_SPECIAL: &[char] = &['\\', ',', ' '];

/// Characters escaped in tag keys, tag values and field keys
const KEY_SPECIAL: &[char] = &['\\', ',', '=', ' '];

fn is_line_break(c: char) -> bool {
    c == '\n' || c == '\r'
}

fn write_escaped<W: Write>(out: &mut W, s: &str, special: &[char]) -> fmt::Result {
    for c in s.chars().filter(|c| !is_line_break(*c)) {
        if special.contains(&c) {
            out.write_char('\\')?;
        }
        out.write_char(c)?;
    }
    Ok(())
}

/// Tag value source with line breaks removed
///
/// Keeps one byte past `TAG_VALUE_MAX` so an over-long value is still seen
/// as such by the caller.
fn single_line(value: &str) -> String<{ TAG_VALUE_MAX + 1 }> {
    let mut out = String::new();
    for c in value.chars().filter(|c| !is_line_break(*c)) {
        if out.push(c).is_err() {
            break;
        }
    }
    if value.contains(is_line_break) {
        warn!("Line break removed from tag value");
    }
    out
}

/// Owns the shared point and repopulates it every cycle
pub struct TelemetryPointBuilder {
    point: TelemetryPoint,
}

impl TelemetryPointBuilder {
    /// Create the point and attach the static tags
    ///
    /// Line breaks are stripped and values longer than `TAG_VALUE_MAX` are
    /// truncated.
    pub fn new(device_class: &str, device_id: &str, device_name: &str) -> Self {
        let mut point = TelemetryPoint::new(MEASUREMENT);
        for (key, value) in [
            (tag::DEVICE, device_class),
            (tag::ID, device_id),
            (tag::DEVICE_NAME, device_name),
        ] {
            let value = single_line(value);
            if value.len() > TAG_VALUE_MAX {
                warn!("Tag {} longer than {} bytes, truncating", key, TAG_VALUE_MAX);
            }
            let value: String<TAG_VALUE_MAX> = truncated(&value);
            // Cannot fail: three tags, each within capacity
            let _ = point.add_tag(key, &value);
        }
        Self { point }
    }

    pub fn point(&self) -> &TelemetryPoint {
        &self.point
    }

    /// Clear the previous cycle's fields
    pub fn begin_cycle(&mut self) {
        self.point.clear_fields();
    }

    /// Fill the point from this cycle's valid readings plus signal strength
    pub fn build(&mut self, sample: &Sample, rssi: i32) -> &TelemetryPoint {
        self.point.clear_fields();

        for reading in sample.valid() {
            let Some(value) = reading.value() else {
                continue;
            };
            let result = match (reading.kind(), value) {
                (ReadingKind::Particulate, _) => self.point.add_field(field::PM25, value),
                (ReadingKind::Co2, _) => self.point.add_field(field::CO2, value),
                (ReadingKind::Temperature, FieldValue::Float(celsius)) => self
                    .point
                    .add_field(field::TEMP_C, value)
                    .and_then(|_| {
                        self.point
                            .add_field(field::TEMP_F, FieldValue::Float(fahrenheit(celsius)))
                    }),
                (ReadingKind::Temperature, FieldValue::Integer(_)) => {
                    self.point.add_field(field::TEMP_C, value)
                }
                (ReadingKind::Humidity, _) => self.point.add_field(field::HUMIDITY, value),
            };
            if let Err(e) = result {
                error!("Failed to add field: {}", e);
            }
        }

        if let Err(e) = self
            .point
            .add_field(field::RSSI, FieldValue::Integer(rssi.into()))
        {
            error!("Failed to add rssi field: {}", e);
        }

        &self.point
    }
}
