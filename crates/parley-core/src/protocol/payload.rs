//! Key-value payload carried by requests and responses
//!
//! A payload is a JSON object. An absent key and a key bound to `null` mean
//! different things: absence says "filter omitted", `null` says "explicitly
//! nothing". Accessors keep that distinction visible.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{ParleyError, Result};

/// Ordered string-to-value mapping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style insert
    pub fn with<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Builder-style insert that leaves the key absent when `value` is `None`
    pub fn with_opt<K: Into<String>, V: Into<Value>>(self, key: K, value: Option<V>) -> Self {
        match value {
            Some(value) => self.with(key, value),
            None => self,
        }
    }

    /// Serialize `value` and insert it under `key`
    pub fn with_serialized<K: Into<String>, T: Serialize>(
        mut self,
        key: K,
        value: &T,
    ) -> Result<Self> {
        self.0.insert(key.into(), serde_json::to_value(value)?);
        Ok(self)
    }

    pub fn insert<K: Into<String>, V: Into<Value>>(&mut self, key: K, value: V) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Raw value; `None` means absent, `Some(Value::Null)` means explicit null
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_null(&self, key: &str) -> bool {
        matches!(self.0.get(key), Some(Value::Null))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// String value, absent or null yields `None`
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    /// String value that must be present and non-null
    pub fn require_str(&self, key: &str) -> Result<&str> {
        match self.0.get(key) {
            None | Some(Value::Null) => Err(ParleyError::missing_key(key)),
            Some(Value::String(s)) => Ok(s),
            Some(other) => Err(ParleyError::invalid_value(
                key,
                format!("expected string, got {}", kind_of(other)),
            )),
        }
    }

    /// Integer value that must be present and non-null
    pub fn require_i64(&self, key: &str) -> Result<i64> {
        match self.0.get(key) {
            None | Some(Value::Null) => Err(ParleyError::missing_key(key)),
            Some(value) => value.as_i64().ok_or_else(|| {
                ParleyError::invalid_value(key, format!("expected integer, got {}", kind_of(value)))
            }),
        }
    }

    /// Deserialize the value under `key`; absent and null both yield `None`
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| ParleyError::invalid_value(key, e.to_string())),
        }
    }

    /// Deserialize the value under `key`, which must be present
    pub fn require_as<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.get_as(key)?.ok_or_else(|| ParleyError::missing_key(key))
    }

    /// Deserialize the whole payload as one record
    pub fn to_record<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.0.clone()))?)
    }

    /// Build a payload from a record that serializes to a JSON object
    pub fn from_record<T: Serialize>(record: &T) -> Result<Self> {
        match serde_json::to_value(record)? {
            Value::Object(map) => Ok(Self(map)),
            other => Err(ParleyError::invalid_value(
                "<record>",
                format!("expected object, got {}", kind_of(&other)),
            )),
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Payload {
    type Error = ParleyError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::new()),
            other => Err(ParleyError::invalid_value(
                "<payload>",
                format!("expected object, got {}", kind_of(&other)),
            )),
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_and_null_are_distinct() {
        let payload = Payload::new().with("group_id", Value::Null);

        assert!(payload.contains_key("group_id"));
        assert!(payload.is_null("group_id"));
        assert!(!payload.contains_key("recipient"));
        assert_eq!(payload.get("recipient"), None);
        assert_eq!(payload.get("group_id"), Some(&Value::Null));
    }

    #[test]
    fn test_with_opt_omits_none() {
        let payload = Payload::new()
            .with_opt("since", None::<i64>)
            .with_opt("limit", Some(20));

        assert!(!payload.contains_key("since"));
        assert_eq!(payload.get_i64("limit"), Some(20));
    }

    #[test]
    fn test_require_reports_missing_and_mistyped_keys() {
        let payload = Payload::new().with("user_id", "seven");

        assert!(matches!(
            payload.require_str("token"),
            Err(ParleyError::Protocol(crate::ProtocolError::MissingKey { .. }))
        ));
        assert!(matches!(
            payload.require_i64("user_id"),
            Err(ParleyError::Protocol(crate::ProtocolError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn test_null_payload_value_becomes_empty_payload() {
        let payload = Payload::try_from(Value::Null).unwrap();
        assert!(payload.is_empty());
        assert!(Payload::try_from(Value::from(3)).is_err());
    }
}
