//! Typed feature values and the unit conversions between the two sides.
//!
//! The gateway carries every feature as `{key, value: {type, <type>_value}}`.
//! Values the bridge cannot interpret are skipped by callers, never defaulted:
//! a missing key downstream means "unknown", not "false".

use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

/// One feature entry of a status or command document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateValue {
    pub key: String,
    pub value: TypedValue,
}

/// Tagged value carrying exactly one of the typed slots.
///
/// The tag is kept as a plain string so an unknown type in an inbound
/// command degrades to a logged skip instead of failing the whole document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypedValue {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bool_value: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integer_value: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_value: Option<String>,
}

/// A decoded inbound value.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedValue {
    Bool(bool),
    Integer(i64),
    Enum(String),
}

impl StateValue {
    pub fn bool(key: impl Into<String>, value: bool) -> Self {
        Self {
            key: key.into(),
            value: TypedValue {
                kind: "BOOL".to_string(),
                bool_value: Some(value),
                ..TypedValue::default()
            },
        }
    }

    pub fn integer(key: impl Into<String>, value: i64) -> Self {
        Self {
            key: key.into(),
            value: TypedValue {
                kind: "INTEGER".to_string(),
                integer_value: Some(value),
                ..TypedValue::default()
            },
        }
    }

    pub fn enumeration(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: TypedValue {
                kind: "ENUM".to_string(),
                enum_value: Some(value.into()),
                ..TypedValue::default()
            },
        }
    }

    /// Decode the typed slot. Missing slots take the wire default for their
    /// type; an unknown type yields `None` with a warning.
    pub fn decode(&self) -> Option<DecodedValue> {
        match self.value.kind.as_str() {
            "BOOL" => Some(DecodedValue::Bool(self.value.bool_value.unwrap_or(false))),
            "INTEGER" => Some(DecodedValue::Integer(self.value.integer_value.unwrap_or(0))),
            "ENUM" => Some(DecodedValue::Enum(
                self.value.enum_value.clone().unwrap_or_default(),
            )),
            other => {
                warn!("unknown value type {:?} for feature {}", other, self.key);
                None
            }
        }
    }
}

/// Hub brightness [0,255] to gateway brightness [50,1000].
pub fn brightness_to_gateway(value: i64) -> i64 {
    ((value as f64 / 2.55 * 10.0).round() as i64).clamp(50, 1000)
}

/// Gateway brightness [50,1000] back to hub brightness [0,255].
///
/// Rounded, not truncated, so a value produced by `brightness_to_gateway`
/// maps back onto the original within one step.
pub fn brightness_to_hub(value: i64) -> i64 {
    ((value as f64 / 10.0 * 2.55).round() as i64).clamp(0, 255)
}

/// Gateway integer temperatures carry one implied decimal digit.
pub fn temperature_to_gateway(value: f64) -> i64 {
    (value * 10.0) as i64
}
