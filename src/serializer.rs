//! Payload serialization.
//!
//! The engine only ever handles payloads as strings. An empty string means
//! "no value" and decodes as JSON `null`; a `null` value encodes as "".

use crate::error::WorkflowError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Pluggable payload format. Object safe so a worker can hold `Arc<dyn WorkflowSerializer>`.
pub trait WorkflowSerializer: Send + Sync {
    fn serialize_value(&self, value: &Value) -> Result<String, WorkflowError>;
    fn deserialize_value(&self, data: &str) -> Result<Value, WorkflowError>;
}

/// Default serializer backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl WorkflowSerializer for JsonSerializer {
    fn serialize_value(&self, value: &Value) -> Result<String, WorkflowError> {
        if value.is_null() {
            return Ok(String::new());
        }
        Ok(serde_json::to_string(value)?)
    }

    fn deserialize_value(&self, data: &str) -> Result<Value, WorkflowError> {
        if data.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(data)?)
    }
}

pub(crate) fn encode<T: Serialize + ?Sized>(
    serializer: &dyn WorkflowSerializer,
    value: &T,
) -> Result<String, WorkflowError> {
    let value = serde_json::to_value(value)?;
    serializer.serialize_value(&value)
}

/// Decode a payload; `None` and "" both decode from `null`.
pub(crate) fn decode<T: DeserializeOwned>(
    serializer: &dyn WorkflowSerializer,
    data: Option<&str>,
) -> Result<T, WorkflowError> {
    let value = match data {
        Some(s) if !s.is_empty() => serializer.deserialize_value(s)?,
        _ => Value::Null,
    };
    Ok(serde_json::from_value(value)?)
}
