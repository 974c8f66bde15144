//! Device wire protocol
//!
//! Newline-delimited JSON, symmetric in both directions:
//!
//! ```text
//! Request:  {"action": "<name>", <param>: <value>, ...}\n
//! Response: {"status": "ok" | "error", <field>: <value>, ...}\n
//! ```
//!
//! The same [`Command`] / [`Response`] values are handled in-process by the
//! simulator for virtual devices, so both device kinds share one vocabulary.
//!
//! The deployment socket uses a separate three-frame exchange described by
//! [`InstallMetadata`] and [`InstallStatus`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Known action names
pub mod actions {
    pub const GET_INFO: &str = "get_info";
    pub const DRIVE: &str = "drive";
    pub const STOP: &str = "stop";
    pub const SET_LED: &str = "set_led";
    pub const GET_STATE: &str = "get_state";
    pub const READ_SENSORS: &str = "read_sensors";
    pub const RESET: &str = "reset";
    pub const RESPAWN: &str = "respawn";
    pub const ADD_OBSTACLE: &str = "add_obstacle";
    pub const CLEAR_OBSTACLES: &str = "clear_obstacles";
    pub const READ_GPIO: &str = "read_gpio";
    pub const SET_GPIO: &str = "set_gpio";
    pub const SET_PWM: &str = "set_pwm";
    pub const INSTALL_WASM: &str = "install_wasm";
}

/// A request to a device
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub action: String,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl Command {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            params: Map::new(),
        }
    }

    /// Add a parameter. Values that fail to serialize are stored as null.
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.params.insert(key.to_string(), value);
        self
    }

    /// `drive {left, right}`
    pub fn drive(left: i32, right: i32) -> Self {
        Self::new(actions::DRIVE).with("left", left).with("right", right)
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(Value::as_f64)
    }

    pub fn param_i64(&self, key: &str) -> Option<i64> {
        self.params.get(key).and_then(|v| {
            v.as_i64()
                .or_else(|| v.as_f64().filter(|f| f.is_finite()).map(|f| f.round() as i64))
        })
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Deserialize the parameter record into a typed struct.
    pub fn params_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.params.clone()))?)
    }

    /// Encode as one protocol line, newline included.
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Response status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Error,
}

/// A reply from a device
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: ResponseStatus,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            status: ResponseStatus::Ok,
            fields: Map::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::with_status(ResponseStatus::Error).with("message", message.into())
    }

    fn with_status(status: ResponseStatus) -> Self {
        Self {
            status,
            fields: Map::new(),
        }
    }

    /// Add a field. Values that fail to serialize are stored as null.
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.fields.insert(key.to_string(), value);
        self
    }

    /// Merge all fields of a serializable record.
    pub fn with_record(mut self, record: &impl Serialize) -> Self {
        if let Ok(Value::Object(map)) = serde_json::to_value(record) {
            self.fields.extend(map);
        }
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn message(&self) -> Option<&str> {
        self.fields.get("message").and_then(Value::as_str)
    }

    /// Parse one protocol line (without the newline).
    pub fn parse_line(line: &str) -> Result<Self> {
        serde_json::from_str(line.trim()).map_err(|e| Error::Protocol(format!("{}: {}", e, line)))
    }

    /// Interpret an arbitrary JSON object as a response.
    ///
    /// Objects without a `status` field are not responses (telemetry).
    pub fn from_value(value: &Value) -> Option<Self> {
        value.get("status")?;
        serde_json::from_value(value.clone()).ok()
    }
}

/// Deployment socket metadata frame
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstallMetadata {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub size: usize,
    #[serde(rename = "heapSize")]
    pub heap_size: u32,
}

impl InstallMetadata {
    pub fn new(name: &str, size: usize, heap_size: u32) -> Self {
        Self {
            kind: "install".to_string(),
            name: name.to_string(),
            size,
            heap_size,
        }
    }
}

/// Deployment socket status frame
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstallStatus {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
