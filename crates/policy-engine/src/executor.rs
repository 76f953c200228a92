//! Action executor for policy rules

use crate::error::ActionError;
use crate::model::{Action, LogLevel};
use device_core::schema::{self, attr, power};
use device_core::{
    AttributeValue, CommandError, DeviceCommand, DeviceCommander, DeviceRegistry, RegistryError,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one action within a firing
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionStatus {
    /// Command delivered and device model updated
    Applied,
    /// Action failed; later actions of the same firing were skipped
    Failed { error: ActionError },
    /// Not attempted because an earlier action failed
    Skipped,
    /// Not attempted because a higher-priority rule already wrote the attribute this tick
    Superseded { by_rule: String },
}

impl ActionStatus {
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Per-action report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionReport {
    /// Position of the action in the rule
    pub index: usize,
    /// Target device, if any
    pub device_id: Option<String>,
    pub status: ActionStatus,
}

/// How writes from different rules to the same attribute interact within a tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Every rule applies its writes in priority order; the last write stays
    #[default]
    LastWriteWins,
    /// The first (highest-priority) rule to write an attribute owns it for the tick
    FirstWriteWins,
}

/// Attribute writes made by each rule during one tick
#[derive(Debug, Default)]
pub struct WriteClaims {
    policy: ConflictPolicy,
    owners: HashMap<(String, String), String>,
}

impl WriteClaims {
    #[must_use]
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            policy,
            owners: HashMap::new(),
        }
    }

    /// Rule that already owns this attribute, when the policy forbids overwriting it
    fn blocking_owner(&self, device_id: &str, attribute: &str, rule_id: &str) -> Option<&str> {
        if self.policy != ConflictPolicy::FirstWriteWins {
            return None;
        }
        self.owners
            .get(&(device_id.to_string(), attribute.to_string()))
            .map(String::as_str)
            .filter(|owner| *owner != rule_id)
    }

    fn claim(&mut self, device_id: &str, attribute: &str, rule_id: &str) {
        self.owners
            .entry((device_id.to_string(), attribute.to_string()))
            .or_insert_with(|| rule_id.to_string());
    }
}

/// Executor for rule actions
pub struct ActionExecutor {
    registry: Arc<DeviceRegistry>,
    commander: Option<Arc<dyn DeviceCommander>>,
    command_timeout: Duration,
}

impl ActionExecutor {
    /// Create a new action executor
    ///
    /// Without a commander, actions only update the in-memory device model.
    pub fn new(
        registry: Arc<DeviceRegistry>,
        commander: Option<Arc<dyn DeviceCommander>>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            commander,
            command_timeout,
        }
    }

    /// Execute a rule's actions in order
    ///
    /// After the first failure the remaining actions are reported as skipped.
    /// Already applied actions are not rolled back.
    pub async fn execute_actions(
        &self,
        rule_id: &str,
        actions: &[Action],
        claims: &mut WriteClaims,
    ) -> Vec<ActionReport> {
        let mut reports = Vec::with_capacity(actions.len());
        self.execute_actions_into(rule_id, actions, claims, &mut reports)
            .await;
        reports
    }

    /// Like [`Self::execute_actions`], appending each report to `reports` as soon
    /// as the action completes
    pub async fn execute_actions_into(
        &self,
        rule_id: &str,
        actions: &[Action],
        claims: &mut WriteClaims,
        reports: &mut Vec<ActionReport>,
    ) {
        let mut failed = false;

        for (index, action) in actions.iter().enumerate() {
            let device_id = action.device_id().map(str::to_string);
            let target = action
                .device_id()
                .zip(action.write().map(|(attribute, _)| attribute));

            let owner = target.and_then(|(device, attribute)| {
                claims
                    .blocking_owner(device, attribute, rule_id)
                    .map(str::to_string)
            });

            let status = if failed {
                ActionStatus::Skipped
            } else if let Some(owner) = owner {
                tracing::debug!(
                    "Rule {} action {} superseded by rule {}",
                    rule_id,
                    index,
                    owner
                );
                ActionStatus::Superseded { by_rule: owner }
            } else {
                match self.execute(action).await {
                    Ok(()) => {
                        if let Some((device, attribute)) = target {
                            claims.claim(device, attribute, rule_id);
                        }
                        ActionStatus::Applied
                    }
                    Err(error) => {
                        tracing::warn!("Rule {} action {} failed: {}", rule_id, index, error);
                        failed = true;
                        ActionStatus::Failed { error }
                    }
                }
            };

            reports.push(ActionReport {
                index,
                device_id,
                status,
            });
        }
    }

    /// Execute a single action
    pub async fn execute(&self, action: &Action) -> Result<(), ActionError> {
        if let Action::Notify { message, level } = action {
            execute_notify(message, *level);
            return Ok(());
        }

        let (Some(device_id), Some((attribute, value))) = (action.device_id(), action.write())
        else {
            return Err(ActionError::InvalidAction(format!("{action:?} has no target")));
        };

        let device = self
            .registry
            .get(device_id)
            .map_err(|_| ActionError::InvalidAction(format!("unknown device {device_id}")))?;

        if !device.online {
            return Err(ActionError::DeviceOffline(device_id.to_string()));
        }

        let spec = schema::attribute(device.kind, attribute).ok_or_else(|| {
            ActionError::InvalidAction(format!(
                "{attribute} is not an attribute of {}",
                device.kind
            ))
        })?;
        if !spec.writable {
            return Err(ActionError::InvalidAction(format!(
                "{attribute} is read-only on {}",
                device.kind
            )));
        }
        spec.check(&value)
            .map_err(|reason| ActionError::InvalidAction(format!("{attribute}: {reason}")))?;

        if let Some(commander) = &self.commander {
            let command = build_command(device_id, attribute, &value);
            self.send(commander.as_ref(), &command).await?;
        }

        self.registry
            .update(device_id, attribute, value)
            .map_err(|e| match e {
                RegistryError::NotFound(id) => {
                    ActionError::DeviceError(format!("device {id} removed during dispatch"))
                }
                other => ActionError::InvalidAction(other.to_string()),
            })?;

        tracing::info!("Applied {} on {}", attribute, device.display_name());
        Ok(())
    }

    /// Deliver a command, bounded by the command timeout
    async fn send(
        &self,
        commander: &dyn DeviceCommander,
        command: &DeviceCommand,
    ) -> Result<(), ActionError> {
        match tokio::time::timeout(self.command_timeout, commander.send_command(command)).await {
            Ok(Ok(ack)) => {
                tracing::debug!(
                    "Device {} acknowledged {}{}",
                    command.device_id,
                    command.command,
                    ack.message
                        .map(|m| format!(": {m}"))
                        .unwrap_or_default()
                );
                Ok(())
            }
            Ok(Err(e)) => Err(ActionError::DeviceError(e.to_string())),
            Err(_) => Err(ActionError::DeviceError(
                CommandError::Timeout(self.command_timeout).to_string(),
            )),
        }
    }
}

/// Build the device command for an attribute write
fn build_command(device_id: &str, attribute: &str, value: &AttributeValue) -> DeviceCommand {
    match (attribute, value) {
        (attr::TARGET_TEMPERATURE, _) => DeviceCommand::new(device_id, "set_temperature")
            .with_parameter("temperature", value.clone()),
        (attr::MODE, _) => {
            DeviceCommand::new(device_id, "set_mode").with_parameter("mode", value.clone())
        }
        (attr::FAN_SPEED, _) => {
            DeviceCommand::new(device_id, "set_fan_speed").with_parameter("speed", value.clone())
        }
        (attr::POWER, AttributeValue::Text(state)) if state == power::ON => {
            DeviceCommand::new(device_id, "power_on")
        }
        (attr::POWER, AttributeValue::Text(state)) if state == power::OFF => {
            DeviceCommand::new(device_id, "power_off")
        }
        _ => DeviceCommand::new(device_id, "set_attribute")
            .with_parameter("attribute", attribute)
            .with_parameter("value", value.clone()),
    }
}

/// Execute a notify action
fn execute_notify(message: &str, level: LogLevel) {
    match level {
        LogLevel::Debug => tracing::debug!(target: "policy", "{}", message),
        LogLevel::Info => tracing::info!(target: "policy", "{}", message),
        LogLevel::Warn => tracing::warn!(target: "policy", "{}", message),
        LogLevel::Error => tracing::error!(target: "policy", "{}", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use device_core::{CommandAck, Device, DeviceKind};
    use std::sync::Mutex;

    /// Records every command; fails or stalls for configured devices
    #[derive(Default)]
    struct RecordingCommander {
        sent: Mutex<Vec<DeviceCommand>>,
        reject: Option<String>,
        stall: bool,
    }

    #[async_trait]
    impl DeviceCommander for RecordingCommander {
        async fn send_command(&self, command: &DeviceCommand) -> Result<CommandAck, CommandError> {
            self.sent.lock().unwrap().push(command.clone());
            if self.stall {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.reject.as_deref() == Some(command.device_id.as_str()) {
                return Err(CommandError::Rejected("busy".into()));
            }
            Ok(CommandAck::default())
        }
    }

    fn registry() -> Arc<DeviceRegistry> {
        let registry = Arc::new(DeviceRegistry::new());
        registry
            .register(
                Device::new("ac_001", DeviceKind::AirConditioner)
                    .with_attribute(attr::POWER, "on")
                    .with_attribute(attr::TARGET_TEMPERATURE, 22.0),
            )
            .unwrap();
        registry
            .register(Device::new("ac_002", DeviceKind::AirConditioner).with_online(false))
            .unwrap();
        registry
    }

    fn set_temperature(device_id: &str, value: f64) -> Action {
        Action::SetAttribute {
            device_id: device_id.into(),
            attribute: attr::TARGET_TEMPERATURE.into(),
            value: value.into(),
        }
    }

    #[tokio::test]
    async fn test_model_only_execution() {
        let registry = registry();
        let executor = ActionExecutor::new(registry.clone(), None, Duration::from_secs(1));

        executor.execute(&set_temperature("ac_001", 26.0)).await.unwrap();
        assert_eq!(
            registry.get("ac_001").unwrap().attribute(attr::TARGET_TEMPERATURE),
            Some(&AttributeValue::Number(26.0))
        );
    }

    #[tokio::test]
    async fn test_offline_device_has_no_side_effects() {
        let registry = registry();
        let commander = Arc::new(RecordingCommander::default());
        let executor = ActionExecutor::new(
            registry.clone(),
            Some(commander.clone() as Arc<dyn DeviceCommander>),
            Duration::from_secs(1),
        );

        let result = executor.execute(&set_temperature("ac_002", 26.0)).await;
        assert_eq!(result, Err(ActionError::DeviceOffline("ac_002".into())));
        assert!(commander.sent.lock().unwrap().is_empty());
        assert!(registry
            .get("ac_002")
            .unwrap()
            .attribute(attr::TARGET_TEMPERATURE)
            .is_none());
    }

    #[tokio::test]
    async fn test_invalid_actions() {
        let executor = ActionExecutor::new(registry(), None, Duration::from_secs(1));

        let read_only = Action::SetAttribute {
            device_id: "ac_001".into(),
            attribute: attr::ENERGY_CONSUMPTION.into(),
            value: 0.0.into(),
        };
        let out_of_range = set_temperature("ac_001", 12.0);
        let unknown_device = set_temperature("ac_404", 24.0);

        for action in [read_only, out_of_range, unknown_device] {
            assert!(matches!(
                executor.execute(&action).await,
                Err(ActionError::InvalidAction(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_commands_follow_device_vocabulary() {
        let registry = registry();
        let commander = Arc::new(RecordingCommander::default());
        let executor = ActionExecutor::new(
            registry.clone(),
            Some(commander.clone() as Arc<dyn DeviceCommander>),
            Duration::from_secs(1),
        );

        let actions = vec![
            set_temperature("ac_001", 24.0),
            Action::SetMode {
                device_id: "ac_001".into(),
                mode: "auto".into(),
            },
            Action::SetPower {
                device_id: "ac_001".into(),
                on: false,
            },
        ];
        let reports = executor
            .execute_actions("r1", &actions, &mut WriteClaims::default())
            .await;
        assert!(reports.iter().all(|r| r.status == ActionStatus::Applied));

        let sent = commander.sent.lock().unwrap();
        let names: Vec<&str> = sent.iter().map(|c| c.command.as_str()).collect();
        assert_eq!(names, vec!["set_temperature", "set_mode", "power_off"]);
        assert_eq!(sent[0].parameters["temperature"], 24.0);
        assert_eq!(
            registry.get("ac_001").unwrap().attribute(attr::POWER),
            Some(&AttributeValue::from("off"))
        );
    }

    #[tokio::test]
    async fn test_failure_skips_remaining_actions() {
        let registry = registry();
        let commander = Arc::new(RecordingCommander {
            reject: Some("ac_001".into()),
            ..Default::default()
        });
        let executor = ActionExecutor::new(
            registry.clone(),
            Some(commander.clone() as Arc<dyn DeviceCommander>),
            Duration::from_secs(1),
        );

        let actions = vec![
            Action::Notify {
                message: "starting".into(),
                level: LogLevel::Debug,
            },
            set_temperature("ac_001", 25.0),
            set_temperature("ac_001", 26.0),
        ];
        let reports = executor
            .execute_actions("r1", &actions, &mut WriteClaims::default())
            .await;

        assert_eq!(reports[0].status, ActionStatus::Applied);
        assert!(matches!(
            reports[1].status,
            ActionStatus::Failed {
                error: ActionError::DeviceError(_)
            }
        ));
        assert_eq!(reports[2].status, ActionStatus::Skipped);
        assert_eq!(commander.sent.lock().unwrap().len(), 1);
        assert_eq!(
            registry.get("ac_001").unwrap().attribute(attr::TARGET_TEMPERATURE),
            Some(&AttributeValue::Number(22.0))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_command_times_out() {
        let registry = registry();
        let commander = Arc::new(RecordingCommander {
            stall: true,
            ..Default::default()
        });
        let executor = ActionExecutor::new(
            registry.clone(),
            Some(commander as Arc<dyn DeviceCommander>),
            Duration::from_secs(10),
        );

        let result = executor.execute(&set_temperature("ac_001", 26.0)).await;
        assert!(matches!(result, Err(ActionError::DeviceError(_))));
        assert_eq!(
            registry.get("ac_001").unwrap().attribute(attr::TARGET_TEMPERATURE),
            Some(&AttributeValue::Number(22.0))
        );
    }

    #[tokio::test]
    async fn test_first_write_wins_claims() {
        let registry = registry();
        let executor = ActionExecutor::new(registry.clone(), None, Duration::from_secs(1));
        let mut claims = WriteClaims::new(ConflictPolicy::FirstWriteWins);

        let first = executor
            .execute_actions("saver", &[set_temperature("ac_001", 26.0)], &mut claims)
            .await;
        let second = executor
            .execute_actions("comfort", &[set_temperature("ac_001", 21.0)], &mut claims)
            .await;

        assert_eq!(first[0].status, ActionStatus::Applied);
        assert_eq!(
            second[0].status,
            ActionStatus::Superseded {
                by_rule: "saver".into()
            }
        );
        assert_eq!(
            registry.get("ac_001").unwrap().attribute(attr::TARGET_TEMPERATURE),
            Some(&AttributeValue::Number(26.0))
        );
    }
}
