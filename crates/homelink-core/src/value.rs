// ── Typed channel values ──
//
// The host side works with typed values; the wire carries strings. A
// `TypedValue` is built from a wire `Value` plus the resource's kind and
// turns back into a raw string for writes.

use std::fmt;

use homelink_api::{Value, ValueKind};

use crate::error::CoreError;

/// A strongly typed channel value.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    String(String),
    Int(i32),
    Bool(bool),
    Double(f64),
    Float(f32),
    Long(i64),
    Short(i16),
    Byte(i8),
    ByteArray(Vec<u8>),
}

impl TypedValue {
    /// Convert a wire value according to `kind`.
    ///
    /// An absent raw value yields the kind's zero (empty string, `false`, 0).
    /// A present but malformed number is a decoding error.
    pub fn from_wire(value: &Value, kind: ValueKind) -> Result<Self, CoreError> {
        let typed = match kind {
            ValueKind::String => Self::String(value.raw().unwrap_or_default().to_owned()),
            ValueKind::Bool => Self::Bool(value.as_bool()),
            ValueKind::Int => Self::Int(value.as_int()?),
            ValueKind::Double => Self::Double(value.as_double()?),
            ValueKind::Float => Self::Float(value.as_float()?),
            ValueKind::Long => Self::Long(value.as_long()?),
            ValueKind::Short => Self::Short(value.as_short()?),
            ValueKind::Byte => Self::Byte(value.as_byte()?),
            ValueKind::ByteArray => Self::ByteArray(value.as_bytes()),
        };
        Ok(typed)
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Self::String(_) => ValueKind::String,
            Self::Int(_) => ValueKind::Int,
            Self::Bool(_) => ValueKind::Bool,
            Self::Double(_) => ValueKind::Double,
            Self::Float(_) => ValueKind::Float,
            Self::Long(_) => ValueKind::Long,
            Self::Short(_) => ValueKind::Short,
            Self::Byte(_) => ValueKind::Byte,
            Self::ByteArray(_) => ValueKind::ByteArray,
        }
    }

    /// Wire value keyed by `key`, optionally carrying `unit`.
    pub fn to_wire(&self, key: &str, unit: Option<&str>) -> Value {
        let value = Value::new(key, self.to_string());
        match unit {
            Some(unit) => value.with_unit(unit),
            None => value,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Int(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Double(n) => f.write_str(&format_decimal(*n)),
            Self::Float(n) => f.write_str(&format_decimal(f64::from(*n))),
            Self::Long(n) => write!(f, "{n}"),
            Self::Short(n) => write!(f, "{n}"),
            Self::Byte(n) => write!(f, "{n}"),
            Self::ByteArray(bytes) => f.write_str(&String::from_utf8_lossy(bytes)),
        }
    }
}

/// Decimal text that always keeps a fractional part: `20` → `"20.0"`,
/// `20.125` → `"20.125"`.
#[allow(clippy::float_cmp)]
pub fn format_decimal(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 {
        format!("{n:.1}")
    } else {
        n.to_string()
    }
}
