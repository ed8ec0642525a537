//! ==============================================================================
//! decoder.rs - antares telemetry decoder
//! ==============================================================================
//!
//! purpose:
//! ```text
//!     turns the content instance reported by the hydroponic node into a
//!     normalized (temperature, ph, tds) triple.
//! ```
//!
//! payload shapes (see RawPayload):
//! ```text
//!     - bare hex string             "010B004601F4"
//!     - json with embedded hex      {"data":"010B004601F4"}
//!     - json with direct values     {"temperature":25,"ph":7.2,"tdsLevel":450}
//! ```
//!
//! hex layout (12 hex chars, big endian, extra trailing chars ignored):
//!
//! ```text
//!     ┌──────┬──────┬──────┐
//!     │ TTTT │ PPPP │ SSSS │
//!     └──────┴──────┴──────┘
//!       temp   ph     tds
//!       ×10    ×10    ppm
//!
//!     "010B004601F4" -> 0x010B = 267 -> 26.7°C
//!                       0x0046 =  70 ->  7.0 pH
//!                       0x01F4 = 500 -> 500 ppm
//! ```
//!
//! relationships:
//! ```text
//!     - used by: sync.rs (one decode per sync cycle / history entry)
//!     - depends on: nothing else in this crate
//! ```
//!
//! the decoder never logs. everything a caller may want to print comes back
//! as Diagnostics alongside the reading.
//!
//! a content string that is valid json but only a number (e.g. "123456789012")
//! is not dropped: it goes down the hex path like any other bare string.
//! an empty `data` field counts as absent.
//!
//! ==============================================================================

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// number of hex digits that carry the three measurements
pub const HEX_PAYLOAD_LEN: usize = 12;

const FIELD_WIDTH: usize = 4;

/// plausible operating window for a calibrated node
pub const TEMPERATURE_RANGE: (f64, f64) = (0.0, 60.0);
pub const PH_RANGE: (f64, f64) = (0.0, 14.0);
pub const TDS_RANGE: (f64, f64) = (0.0, 5000.0);

const TEMPERATURE_KEYS: &[&str] = &["temperature", "temp"];
const PH_KEYS: &[&str] = &["ph", "pH"];
const TDS_KEYS: &[&str] = &["tds", "TDS", "tdsLevel", "waterLevel"];

// ==============================================================================
// types
// ==============================================================================

/// the three shapes a content instance can take once classified
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    /// bare hex digits, whitespace already stripped
    Hex(String),
    /// `{"data": "<hex>"}`
    EmbeddedHex(String),
    /// direct fields, kept as raw json until coercion
    Direct {
        temperature: Option<Value>,
        ph: Option<Value>,
        tds: Option<Value>,
    },
}

/// normalized reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedReading {
    /// degrees celsius
    pub temperature: f64,
    pub ph: f64,
    /// parts per million
    pub tds_level: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Temperature,
    Ph,
    Tds,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Temperature => write!(f, "temperature"),
            Self::Ph => write!(f, "ph"),
            Self::Tds => write!(f, "tds"),
        }
    }
}

/// a decoded value outside the window a calibrated sensor would report.
/// advisory only: the reading is still returned.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RangeWarning {
    pub field: Field,
    pub value: f64,
    pub min: f64,
    pub max: f64,
}

impl fmt::Display for RangeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} out of range: {} (expected {}..={}, sensor not calibrated?)",
            self.field, self.value, self.min, self.max
        )
    }
}

/// which branch produced the reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadSource {
    Hex,
    EmbeddedHex,
    Direct,
}

/// one 4-digit slice of the hex payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldTrace {
    pub field: Field,
    pub hex: String,
    pub raw: u16,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostics {
    pub source: PayloadSource,
    /// cleaned input (upper-cased hex, or the json object for direct values)
    pub input: String,
    /// empty for direct values
    pub fields: Vec<FieldTrace>,
}

/// successful decode
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decoded {
    pub reading: DecodedReading,
    pub warnings: Vec<RangeWarning>,
    pub diagnostics: Diagnostics,
}

impl Decoded {
    /// true when any value fell outside the calibrated window
    pub fn uncalibrated(&self) -> bool {
        !self.warnings.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid hex length: {len}, expected at least 12")]
    InvalidLength { len: usize },

    #[error("invalid hex in {field} field: {slice:?}")]
    InvalidHexField { field: Field, slice: String },

    #[error("unrecognized payload format")]
    UnrecognizedFormat,
}

pub type Result<T> = std::result::Result<T, DecodeError>;

// ==============================================================================
// normalization
// ==============================================================================

impl RawPayload {
    /// classify a raw string.
    ///
    /// json is tried first. a string that does not parse, or that parses to
    /// something other than an object, is considered for the hex path.
    pub fn from_text(text: &str) -> Result<Self> {
        if let Ok(value) = serde_json::from_str::<Value>(text) {
            match value {
                Value::Object(map) => return Self::from_object(&map),
                Value::String(inner) => return Self::from_text(&inner),
                _ => {}
            }
        }

        let cleaned = strip_whitespace(text);
        if is_hex(&cleaned) {
            Ok(Self::Hex(cleaned))
        } else {
            Err(DecodeError::UnrecognizedFormat)
        }
    }

    /// classify an already parsed json value
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(text) => Self::from_text(text),
            Value::Object(map) => Self::from_object(map),
            _ => Err(DecodeError::UnrecognizedFormat),
        }
    }

    fn from_object(map: &Map<String, Value>) -> Result<Self> {
        match map.get("data") {
            Some(Value::String(data)) if !data.is_empty() => {
                return Ok(Self::EmbeddedHex(data.clone()));
            }
            _ => {}
        }

        let temperature = first_present(map, TEMPERATURE_KEYS);
        let ph = first_present(map, PH_KEYS);
        let tds = first_present(map, TDS_KEYS);

        if temperature.is_none() && ph.is_none() && tds.is_none() {
            return Err(DecodeError::UnrecognizedFormat);
        }

        Ok(Self::Direct { temperature, ph, tds })
    }
}

fn first_present(map: &Map<String, Value>, keys: &[&str]) -> Option<Value> {
    keys.iter()
        .filter_map(|key| map.get(*key))
        .find(|value| !value.is_null())
        .cloned()
}

fn strip_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

fn is_hex(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c.is_ascii_hexdigit())
}

// ==============================================================================
// decoding
// ==============================================================================

/// decode a raw content string (json or bare hex)
pub fn decode_str(text: &str) -> Result<Decoded> {
    decode(&RawPayload::from_text(text)?)
}

/// decode a content value as found in the `m2m:cin.con` field
pub fn decode_value(value: &Value) -> Result<Decoded> {
    decode(&RawPayload::from_value(value)?)
}

/// decode a classified payload
pub fn decode(payload: &RawPayload) -> Result<Decoded> {
    match payload {
        RawPayload::Hex(hex) => decode_hex(hex, PayloadSource::Hex),
        RawPayload::EmbeddedHex(hex) => decode_hex(hex, PayloadSource::EmbeddedHex),
        RawPayload::Direct { temperature, ph, tds } => Ok(decode_direct(
            temperature.as_ref(),
            ph.as_ref(),
            tds.as_ref(),
        )),
    }
}

fn decode_hex(input: &str, source: PayloadSource) -> Result<Decoded> {
    let cleaned = strip_whitespace(input).to_ascii_uppercase();

    if cleaned.len() < HEX_PAYLOAD_LEN {
        return Err(DecodeError::InvalidLength { len: cleaned.len() });
    }

    let temperature = parse_field(&cleaned, 0, Field::Temperature)?;
    let ph = parse_field(&cleaned, 1, Field::Ph)?;
    let tds = parse_field(&cleaned, 2, Field::Tds)?;

    let reading = DecodedReading {
        temperature: round_to(f64::from(temperature.raw) / 10.0, 1),
        ph: round_to(f64::from(ph.raw) / 10.0, 2),
        tds_level: f64::from(tds.raw),
    };

    let fields = vec![
        FieldTrace { value: reading.temperature, ..temperature },
        FieldTrace { value: reading.ph, ..ph },
        FieldTrace { value: reading.tds_level, ..tds },
    ];

    Ok(Decoded {
        warnings: range_warnings(&reading),
        reading,
        diagnostics: Diagnostics { source, input: cleaned, fields },
    })
}

/// parse the `index`th 4-digit slice as a big endian u16
fn parse_field(hex: &str, index: usize, field: Field) -> Result<FieldTrace> {
    let start = index * FIELD_WIDTH;
    let slice = hex
        .get(start..start + FIELD_WIDTH)
        .ok_or_else(|| DecodeError::InvalidHexField { field, slice: String::new() })?;

    let mut bytes = [0u8; 2];
    hex::decode_to_slice(slice, &mut bytes).map_err(|_| DecodeError::InvalidHexField {
        field,
        slice: slice.to_string(),
    })?;

    Ok(FieldTrace {
        field,
        hex: slice.to_string(),
        raw: u16::from_be_bytes(bytes),
        value: 0.0,
    })
}

fn decode_direct(temperature: Option<&Value>, ph: Option<&Value>, tds: Option<&Value>) -> Decoded {
    let reading = DecodedReading {
        temperature: coerce(temperature),
        ph: coerce(ph),
        tds_level: coerce(tds),
    };

    let input = serde_json::json!({
        "temperature": temperature,
        "ph": ph,
        "tds": tds,
    })
    .to_string();

    Decoded {
        reading,
        warnings: Vec::new(),
        diagnostics: Diagnostics {
            source: PayloadSource::Direct,
            input,
            fields: Vec::new(),
        },
    }
}

/// lenient number coercion: numbers and numeric strings pass, anything
/// else (including non-finite values) becomes 0.0
fn coerce(value: Option<&Value>) -> f64 {
    let number = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    number.filter(|n| n.is_finite()).unwrap_or(0.0)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// advisory range check for hex-decoded readings
pub fn range_warnings(reading: &DecodedReading) -> Vec<RangeWarning> {
    [
        (Field::Temperature, reading.temperature, TEMPERATURE_RANGE),
        (Field::Ph, reading.ph, PH_RANGE),
        (Field::Tds, reading.tds_level, TDS_RANGE),
    ]
    .into_iter()
    .filter(|(_, value, (min, max))| value < min || value > max)
    .map(|(field, value, (min, max))| RangeWarning { field, value, min, max })
    .collect()
}

// ==============================================================================
// encoding
// ==============================================================================

/// inverse of the hex path: temperature×10, ph×10, tds as-is.
/// values are clamped into u16.
pub fn encode_hex(reading: &DecodedReading) -> String {
    let to_raw = |value: f64| value.round().clamp(0.0, f64::from(u16::MAX)) as u16;

    let mut bytes = Vec::with_capacity(HEX_PAYLOAD_LEN / 2);
    bytes.extend_from_slice(&to_raw(reading.temperature * 10.0).to_be_bytes());
    bytes.extend_from_slice(&to_raw(reading.ph * 10.0).to_be_bytes());
    bytes.extend_from_slice(&to_raw(reading.tds_level).to_be_bytes());

    hex::encode_upper(bytes)
}

// ==============================================================================
// tests
// ==============================================================================
