//! Property values and their serialized form.
//!
//! A property-value query compares a named field of a snapshot's state
//! against a caller-supplied value. The value is encoded with the same
//! serializer used when snapshot state is persisted, so that both sides
//! agree on the textual representation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A value a snapshot property is matched against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// JSON `null`
    Null,
    /// Boolean
    Bool(bool),
    /// Signed integer
    Integer(i64),
    /// Floating point, must be finite
    Float(f64),
    /// Text
    Text(String),
    /// Nested object or array, or an integer outside the `i64` range
    Json(Value),
}

impl PropertyValue {
    /// Convert to a JSON value.
    ///
    /// # Errors
    ///
    /// Returns error if the value has no JSON representation.
    pub fn to_json(&self) -> Result<Value, SerializationError> {
        match self {
            PropertyValue::Null => Ok(Value::Null),
            PropertyValue::Bool(b) => Ok(Value::Bool(*b)),
            PropertyValue::Integer(i) => Ok(Value::from(*i)),
            PropertyValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .ok_or(SerializationError::NonFiniteFloat(*f)),
            PropertyValue::Text(s) => Ok(Value::String(s.clone())),
            PropertyValue::Json(v) => Ok(v.clone()),
        }
    }
}

impl From<Value> for PropertyValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => PropertyValue::Null,
            Value::Bool(b) => PropertyValue::Bool(b),
            Value::String(s) => PropertyValue::Text(s),
            Value::Number(n) => match n.as_i64() {
                Some(i) => PropertyValue::Integer(i),
                // Unsigned values above i64::MAX keep their exact form
                None if n.is_u64() => PropertyValue::Json(Value::Number(n)),
                None => match n.as_f64() {
                    Some(f) => PropertyValue::Float(f),
                    None => PropertyValue::Json(Value::Number(n)),
                },
            },
            other => PropertyValue::Json(other),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Text(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Integer(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Integer(i64::from(value))
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}

/// Encodes property values into the text stored in snapshot state.
pub trait ValueSerializer: Send + Sync {
    /// Serialize a value to text.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be encoded.
    fn serialize(&self, value: &PropertyValue) -> Result<String, SerializationError>;
}

/// `serde_json`-backed serializer, matching how snapshot state is stored.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonValueSerializer;

impl ValueSerializer for JsonValueSerializer {
    fn serialize(&self, value: &PropertyValue) -> Result<String, SerializationError> {
        let json = value.to_json()?;
        serde_json::to_string(&json).map_err(|e| SerializationError::Json(e.to_string()))
    }
}

/// Errors that can occur while encoding a property value.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SerializationError {
    /// NaN and infinities have no JSON form
    #[error("cannot serialize non-finite float {0}")]
    NonFiniteFloat(f64),
    /// Encoder failure
    #[error("JSON encode error: {0}")]
    Json(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_serializer_matches_state_encoding() {
        let ser = JsonValueSerializer;
        assert_eq!(ser.serialize(&"London".into()).unwrap(), "\"London\"");
        assert_eq!(ser.serialize(&PropertyValue::Integer(42)).unwrap(), "42");
        assert_eq!(ser.serialize(&PropertyValue::Bool(true)).unwrap(), "true");
        assert_eq!(ser.serialize(&PropertyValue::Null).unwrap(), "null");
        assert_eq!(
            ser.serialize(&PropertyValue::Json(json!({"city": "Paris"})))
                .unwrap(),
            r#"{"city":"Paris"}"#
        );
    }

    #[test]
    fn non_finite_float_fails() {
        let err = JsonValueSerializer
            .serialize(&PropertyValue::Float(f64::NAN))
            .unwrap_err();
        assert!(matches!(err, SerializationError::NonFiniteFloat(_)));
    }

    #[test]
    fn from_json_picks_narrowest_variant() {
        assert_eq!(PropertyValue::from(json!(7)), PropertyValue::Integer(7));
        assert_eq!(PropertyValue::from(json!(1.5)), PropertyValue::Float(1.5));
        assert_eq!(
            PropertyValue::from(json!("x")),
            PropertyValue::Text("x".to_string())
        );
        assert_eq!(
            PropertyValue::from(json!([1, 2])),
            PropertyValue::Json(json!([1, 2]))
        );
    }

    #[test]
    fn large_unsigned_stays_exact() {
        let value = PropertyValue::from(json!(u64::MAX));
        assert_eq!(value, PropertyValue::Json(json!(u64::MAX)));
        assert_eq!(
            JsonValueSerializer.serialize(&value).unwrap(),
            "18446744073709551615"
        );
    }
}
