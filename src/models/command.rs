use std::fmt::Display;

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

/// A single-key JSON object sent to a device, e.g. `{"factory":null}`.
/// A `null` value reads the current setting; any other value writes it.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    key: String,
    value: Value,
}

/// Echo of a command key, carrying either the value or a nested error object
/// `{"<key>":{"error":"<message>"}}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    key: String,
    value: Value,
}

/// Value carried by a response to `{"ping":null}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PingResponse {
    pub interface: String,
    pub name: String,
    pub sn: String,
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Not a JSON object.")]
    NotAnObject,

    #[error("Expected exactly one key.")]
    NotSingleKey,

    #[error("Invalid JSON. {0}")]
    Json(#[from] serde_json::Error),
}

fn parse_single_key(json: &str) -> Result<(String, Value), ParseError> {
    let value: Value = serde_json::from_str(json)?;
    let Value::Object(object) = value else {
        return Err(ParseError::NotAnObject);
    };
    let mut entries = object.into_iter();
    match (entries.next(), entries.next()) {
        (Some((key, value)), None) => Ok((key, value)),
        _ => Err(ParseError::NotSingleKey),
    }
}

impl Command {
    pub fn new(key: &str, value: Value) -> Self {
        Self {
            key: key.to_string(),
            value,
        }
    }

    /// Reads the current value of a setting.
    pub fn read(key: &str) -> Self {
        Self::new(key, Value::Null)
    }

    pub fn parse(json: &str) -> Result<Self, ParseError> {
        let (key, value) = parse_single_key(json)?;
        Ok(Self { key, value })
    }

    pub fn ping() -> Self {
        Self::read("ping")
    }

    pub fn factory() -> Self {
        Self::read("factory")
    }

    pub fn apply() -> Self {
        Self::read("apply")
    }

    pub fn save() -> Self {
        Self::read("save")
    }

    pub fn gyroscope_offset(offset: [f64; 3]) -> Self {
        Self::new("gyroscope_offset", json!(offset))
    }

    pub fn gyroscope_offset_correction_enabled(enabled: bool) -> Self {
        Self::new("gyroscope_offset_correction_enabled", json!(enabled))
    }

    pub fn serial_number(serial_number: &str) -> Self {
        Self::new("serial_number", json!(serial_number))
    }

    pub fn hardware_version(version: &str) -> Self {
        Self::new("hardware_version", json!(version))
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{\"{}\":{}}}", self.key, self.value)
    }
}

impl Response {
    pub fn parse(json: &str) -> Result<Self, ParseError> {
        let (key, value) = parse_single_key(json)?;
        Ok(Self { key, value })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// The error message nested in the value, if the device reported one.
    pub fn error(&self) -> Option<&str> {
        self.value.get("error").and_then(Value::as_str)
    }

    pub fn value_as_str(&self) -> Option<&str> {
        self.value.as_str()
    }
}

impl TryFrom<&Response> for PingResponse {
    type Error = serde_json::Error;

    fn try_from(response: &Response) -> Result<Self, Self::Error> {
        serde_json::from_value(response.value.clone())
    }
}
