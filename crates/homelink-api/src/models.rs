// Wire models
//
// The cloud API speaks in `{ "data": { ... } }` envelopes whose values are
// loosely typed JSON scalars. `Value` keeps the scalar as a string and
// converts on demand; program and appliance types mirror the response
// shapes the client consumes.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, json};

use crate::error::Error;
use crate::resource::ValueKind;

// ── Value ────────────────────────────────────────────────────────────

/// An untyped `{key, value, unit}` triple as sent and received on the wire.
///
/// Accessors convert the raw string on demand. An absent value converts to
/// zero (or `false`, or an empty byte string); only a present value that
/// does not parse yields [`Error::Parse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value {
    pub key: String,
    #[serde(
        rename = "value",
        default,
        deserialize_with = "scalar_as_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub raw_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl Value {
    pub fn new(key: impl Into<String>, raw_value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            raw_value: Some(raw_value.into()),
            unit: None,
        }
    }

    /// A value carrying only a key, e.g. a program key to start.
    pub fn key_only(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            raw_value: None,
            unit: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn raw(&self) -> Option<&str> {
        self.raw_value.as_deref()
    }

    /// `"true"` (any case) is true; anything else, including absence, is false.
    pub fn as_bool(&self) -> bool {
        self.raw_value
            .as_deref()
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    }

    pub fn as_double(&self) -> Result<f64, Error> {
        self.number("double")
    }

    #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
    pub fn as_float(&self) -> Result<f32, Error> {
        self.number("float").map(|n| n as f32)
    }

    /// Parsed as a decimal and truncated toward zero, so `"21.6"` yields 21.
    #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
    pub fn as_int(&self) -> Result<i32, Error> {
        self.number("int").map(|n| n as i32)
    }

    #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
    pub fn as_long(&self) -> Result<i64, Error> {
        self.number("long").map(|n| n as i64)
    }

    #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
    pub fn as_short(&self) -> Result<i16, Error> {
        self.number("short").map(|n| n as i16)
    }

    #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
    pub fn as_byte(&self) -> Result<i8, Error> {
        self.number("byte").map(|n| n as i8)
    }

    /// UTF-8 bytes of the raw value.
    pub fn as_bytes(&self) -> Vec<u8> {
        self.raw_value
            .as_deref()
            .map(|v| v.as_bytes().to_vec())
            .unwrap_or_default()
    }

    fn number(&self, target: &'static str) -> Result<f64, Error> {
        let Some(raw) = self.raw_value.as_deref() else {
            return Ok(0.0);
        };
        raw.trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .ok_or_else(|| Error::Parse {
                value: raw.to_owned(),
                target,
            })
    }

    /// The `{key, value?, unit?}` object sent in PUT envelopes, with the
    /// value encoded per `kind`.
    pub(crate) fn wire_json(&self, kind: ValueKind) -> Result<serde_json::Value, Error> {
        let mut obj = Map::new();
        obj.insert("key".into(), json!(self.key));
        if let Some(raw) = self.raw_value.as_deref() {
            let value = match kind {
                ValueKind::Bool => json!(self.as_bool()),
                ValueKind::Int | ValueKind::Long | ValueKind::Short | ValueKind::Byte => {
                    json!(self.as_long()?)
                }
                ValueKind::Double | ValueKind::Float => json!(self.as_double()?),
                ValueKind::String | ValueKind::ByteArray => json!(raw),
            };
            obj.insert("value".into(), value);
        }
        if let Some(unit) = self.unit.as_deref() {
            obj.insert("unit".into(), json!(unit));
        }
        Ok(serde_json::Value::Object(obj))
    }
}

/// Accept any JSON scalar for `value` and keep its textual form.
fn scalar_as_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<serde_json::Value>::deserialize(d)? {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

// ── Programs ─────────────────────────────────────────────────────────

/// An active or selected program with its current option values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub key: String,
    #[serde(default)]
    pub options: Vec<Value>,
}

impl Program {
    pub fn option(&self, key: &str) -> Option<&Value> {
        self.options.iter().find(|o| o.key.eq_ignore_ascii_case(key))
    }
}

/// A program the appliance offers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailableProgram {
    pub key: String,
    pub available: bool,
    /// e.g. `"selectonly"`, `"startonly"`, `"selectandstart"`.
    pub execution: String,
}

/// An option of an available program and its permitted values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgramOption {
    pub key: String,
    pub allowed_values: Vec<String>,
}

// ── Appliances ───────────────────────────────────────────────────────

/// A paired appliance as listed by `/api/homeappliances`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HomeAppliance {
    #[serde(rename = "haId")]
    pub ha_id: String,
    pub name: String,
    pub brand: String,
    pub vib: String,
    pub connected: bool,
    #[serde(rename = "type")]
    pub kind: String,
    pub enumber: String,
}

// ── Envelopes ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct DataEnvelope<T> {
    pub data: T,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApplianceList {
    pub homeappliances: Vec<HomeAppliance>,
}

/// Parse a single-entity envelope, mapping shape errors to
/// [`Error::Deserialization`].
pub(crate) fn parse_data<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, Error> {
    serde_json::from_str::<DataEnvelope<T>>(body)
        .map(|env| env.data)
        .map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: body.to_owned(),
        })
}

/// Lenient `data.programs[]` parser: entries without a key or an execution
/// kind are dropped. `None` means the envelope itself had the wrong shape.
pub(crate) fn parse_available_programs(body: &str) -> Option<Vec<AvailableProgram>> {
    let root: serde_json::Value = serde_json::from_str(body).ok()?;
    let programs = root.get("data")?.get("programs")?.as_array()?;
    Some(
        programs
            .iter()
            .filter_map(|entry| {
                let key = entry.get("key")?.as_str()?;
                let constraints = entry.get("constraints");
                let execution = constraints
                    .and_then(|c| c.get("execution"))
                    .and_then(serde_json::Value::as_str)?;
                let available = constraints
                    .and_then(|c| c.get("available"))
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                Some(AvailableProgram {
                    key: key.to_owned(),
                    available,
                    execution: execution.to_owned(),
                })
            })
            .collect(),
    )
}

/// Lenient `data.options[]` parser collecting each option's
/// `constraints.allowedvalues[]`. Options without a key are dropped.
pub(crate) fn parse_program_options(body: &str) -> Option<Vec<ProgramOption>> {
    let root: serde_json::Value = serde_json::from_str(body).ok()?;
    let options = root.get("data")?.get("options")?.as_array()?;
    Some(
        options
            .iter()
            .filter_map(|entry| {
                let key = entry.get("key")?.as_str()?;
                let allowed_values = entry
                    .get("constraints")
                    .and_then(|c| c.get("allowedvalues"))
                    .and_then(serde_json::Value::as_array)
                    .map(|values| {
                        values
                            .iter()
                            .map(|v| match v {
                                serde_json::Value::String(s) => s.clone(),
                                other => other.to_string(),
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Some(ProgramOption {
                    key: key.to_owned(),
                    allowed_values,
                })
            })
            .collect(),
    )
}
