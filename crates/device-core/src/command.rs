//! Device command capability
//!
//! The policy engine never talks to hardware directly. The hosting
//! application supplies a [`DeviceCommander`] that knows how to reach a
//! physical device (MQTT, HTTP, ...), and the engine hands it
//! [`DeviceCommand`] payloads.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A command addressed to one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCommand {
    /// Target device ID
    pub device_id: String,
    /// Command name (e.g., "set_temperature", "power_off")
    pub command: String,
    /// Command parameters
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    /// When the command was issued
    pub issued_at: DateTime<Utc>,
}

impl DeviceCommand {
    /// Create a command without parameters
    pub fn new(device_id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            command: command.into(),
            parameters: serde_json::Map::new(),
            issued_at: Utc::now(),
        }
    }

    /// Add a parameter
    #[must_use]
    pub fn with_parameter(
        mut self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }
}

/// Positive acknowledgement from a device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandAck {
    #[serde(default)]
    pub message: Option<String>,
}

/// Command dispatch errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    /// The device answered but refused the command
    #[error("Command rejected by device: {0}")]
    Rejected(String),

    /// The transport could not deliver the command
    #[error("Transport error: {0}")]
    Transport(String),

    /// The device did not answer in time
    #[error("Command timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Capability to deliver commands to physical devices
#[async_trait]
pub trait DeviceCommander: Send + Sync {
    async fn send_command(&self, command: &DeviceCommand) -> Result<CommandAck, CommandError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_payload() {
        let command = DeviceCommand::new("ac_001", "set_temperature")
            .with_parameter("temperature", 24.0);
        let json = serde_json::to_value(&command).unwrap();
        assert_eq!(json["command"], "set_temperature");
        assert_eq!(json["parameters"]["temperature"], 24.0);
    }
}
