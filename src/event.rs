//! Value events
//!
//! A [`ValueEvent`] is the unit of data flowing through every subscription
//! chain: a JSON object with a handful of documented keys. Stages only touch
//! the keys they own; anything else rides along untouched.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::CoercionError;

/// Current reading
pub const VALUE: &str = "value";
/// Display string for the current reading
pub const CHAR_VALUE: &str = "char_value";
/// Engineering units
pub const UNITS: &str = "units";
/// Display precision in digits
pub const PRECISION: &str = "precision";
/// Display name
pub const NAME: &str = "name";
/// Seconds since the Unix epoch
pub const TIMESTAMP: &str = "timestamp";
/// Liveness of the upstream source
pub const CONNECTED: &str = "connected";

/// Encode a float as JSON, mapping non-finite values to strings
pub fn number_to_json(v: f64) -> Value {
    match Number::from_f64(v) {
        Some(n) => Value::Number(n),
        None if v.is_nan() => Value::String("NaN".into()),
        None if v > 0.0 => Value::String("Infinity".into()),
        None => Value::String("-Infinity".into()),
    }
}

/// Render a number for the `char_value` field
pub fn format_number(v: f64, precision: Option<u32>) -> String {
    if v.is_nan() {
        return "NaN".into();
    }
    if v.is_infinite() {
        return if v > 0.0 { "Infinity" } else { "-Infinity" }.into();
    }
    match precision {
        Some(p) => format!("{:.*}", p as usize, v),
        None => format!("{}", v),
    }
}

fn now_epoch_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// One telemetry update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueEvent(Map<String, Value>);

impl ValueEvent {
    /// Create an empty event
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an event carrying a numeric reading
    pub fn from_number(v: f64) -> Self {
        let mut event = Self::new();
        event.set_numeric_value(v);
        event
    }

    /// Builder-style field setter
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Get a field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Set a field
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Remove a field
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Raw `value` field
    pub fn value(&self) -> Option<&Value> {
        self.0.get(VALUE)
    }

    /// Interpret the `value` field as a number
    ///
    /// Numeric strings count, including the non-finite spellings this type
    /// writes itself.
    pub fn numeric_value(&self) -> Result<f64, CoercionError> {
        match self.value() {
            None | Some(Value::Null) => Err(CoercionError::Missing),
            Some(Value::Number(n)) => n
                .as_f64()
                .ok_or_else(|| CoercionError::NotNumeric(n.to_string())),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| CoercionError::NotNumeric(s.clone())),
            Some(other) => Err(CoercionError::NotNumeric(other.to_string())),
        }
    }

    /// Replace the reading and re-render `char_value`
    pub fn set_numeric_value(&mut self, v: f64) {
        self.set(VALUE, number_to_json(v));
        self.set(CHAR_VALUE, format_number(v, self.precision()));
    }

    /// Display precision, if the event carries a usable one
    pub fn precision(&self) -> Option<u32> {
        match self.0.get(PRECISION)? {
            Value::Number(n) => n.as_u64().and_then(|p| u32::try_from(p).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Set the display precision and re-render `char_value`
    pub fn set_precision(&mut self, digits: u32) {
        self.set(PRECISION, digits);
        if let Ok(v) = self.numeric_value() {
            self.set(CHAR_VALUE, format_number(v, Some(digits)));
        }
    }

    /// Display string, if present
    pub fn char_value(&self) -> Option<&str> {
        self.0.get(CHAR_VALUE).and_then(Value::as_str)
    }

    /// Display name, if present
    pub fn name(&self) -> Option<&str> {
        self.0.get(NAME).and_then(Value::as_str)
    }

    /// Event timestamp in epoch seconds
    pub fn timestamp(&self) -> Option<f64> {
        self.0.get(TIMESTAMP).and_then(Value::as_f64)
    }

    /// Stamp the event with the current wall-clock time
    pub fn refresh_timestamp(&mut self) {
        self.set(TIMESTAMP, number_to_json(now_epoch_secs()));
    }

    /// Liveness flag, if present
    pub fn connected(&self) -> Option<bool> {
        self.0.get(CONNECTED).and_then(Value::as_bool)
    }

    /// Set the liveness flag
    pub fn set_connected(&mut self, connected: bool) {
        self.set(CONNECTED, connected);
    }

    /// Borrow the underlying JSON object
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Unwrap into the underlying JSON object
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check whether the event has no fields
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Serialize to a JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<Map<String, Value>> for ValueEvent {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl fmt::Display for ValueEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Object(self.0.clone()))
    }
}
