//! Simulated command dispatcher

use async_trait::async_trait;
use device_core::{CommandAck, CommandError, DeviceCommand, DeviceCommander};
use std::time::Duration;

const KNOWN_COMMANDS: &[&str] = &[
    "set_temperature",
    "set_mode",
    "set_fan_speed",
    "power_on",
    "power_off",
    "set_attribute",
];

/// Acknowledges every well-formed command after a fixed delay
pub struct SimulatedCommander {
    latency: Duration,
}

impl SimulatedCommander {
    #[must_use]
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl DeviceCommander for SimulatedCommander {
    async fn send_command(&self, command: &DeviceCommand) -> Result<CommandAck, CommandError> {
        if !KNOWN_COMMANDS.contains(&command.command.as_str()) {
            return Err(CommandError::Rejected(format!(
                "unsupported command {}",
                command.command
            )));
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        tracing::debug!(
            "Simulated {} -> {} {}",
            command.device_id,
            command.command,
            serde_json::Value::Object(command.parameters.clone())
        );
        Ok(CommandAck {
            message: Some(format!("{} ok", command.command)),
        })
    }
}
