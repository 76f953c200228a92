//! Data models for the policy engine

use crate::error::PolicyError;
use chrono::{DateTime, NaiveTime, Utc};
use device_core::schema::{attr, power};
use device_core::AttributeValue;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A policy rule: AND-combined conditions and an ordered list of actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Unique identifier (generated when omitted from a document)
    #[serde(default = "new_rule_id")]
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
    /// Whether the rule is evaluated
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Lower values are evaluated and applied first
    #[serde(default)]
    pub priority: i32,
    /// All must hold for the rule to fire
    pub conditions: Vec<Condition>,
    /// Applied in order when the rule fires
    pub actions: Vec<Action>,
    /// Minimum time between two firings
    #[serde(default, with = "duration_secs")]
    pub cooldown: Duration,
    /// Creation timestamp
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn new_rule_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_enabled() -> bool {
    true
}

/// Conditions evaluated against device state and wall-clock time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Local time of day within `[start, end)`, wrapping past midnight when start > end
    TimeRange {
        #[serde(with = "time_of_day")]
        start: NaiveTime,
        #[serde(with = "time_of_day")]
        end: NaiveTime,
    },
    /// Numeric comparison of a device attribute
    Threshold {
        device_id: String,
        attribute: String,
        operator: Operator,
        value: f64,
    },
    /// Exact match of a device attribute
    Equality {
        device_id: String,
        attribute: String,
        expected_value: AttributeValue,
    },
}

impl Condition {
    /// Device this condition reads, if any
    #[must_use]
    pub fn device_id(&self) -> Option<&str> {
        match self {
            Self::TimeRange { .. } => None,
            Self::Threshold { device_id, .. } | Self::Equality { device_id, .. } => {
                Some(device_id.as_str())
            }
        }
    }
}

/// Comparison operators for threshold conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl Operator {
    /// Apply `lhs <op> rhs`
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn compare(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
        }
    }

    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Actions to perform when a rule fires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Write any writable attribute
    SetAttribute {
        device_id: String,
        attribute: String,
        value: AttributeValue,
    },
    /// Switch a device on or off
    SetPower { device_id: String, on: bool },
    /// Change operating mode
    SetMode { device_id: String, mode: String },
    /// Emit a log record (no device involved)
    Notify {
        message: String,
        #[serde(default)]
        level: LogLevel,
    },
}

impl Action {
    /// Target device, if any
    #[must_use]
    pub fn device_id(&self) -> Option<&str> {
        match self {
            Self::SetAttribute { device_id, .. }
            | Self::SetPower { device_id, .. }
            | Self::SetMode { device_id, .. } => Some(device_id.as_str()),
            Self::Notify { .. } => None,
        }
    }

    /// The concrete attribute write this action performs
    #[must_use]
    pub fn write(&self) -> Option<(&str, AttributeValue)> {
        match self {
            Self::SetAttribute {
                attribute, value, ..
            } => Some((attribute.as_str(), value.clone())),
            Self::SetPower { on, .. } => Some((
                attr::POWER,
                AttributeValue::from(if *on { power::ON } else { power::OFF }),
            )),
            Self::SetMode { mode, .. } => Some((attr::MODE, AttributeValue::from(mode.as_str()))),
            Self::Notify { .. } => None,
        }
    }
}

/// Log levels for notify actions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

/// Partial update of a rule
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRuleRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub conditions: Option<Vec<Condition>>,
    #[serde(default)]
    pub actions: Option<Vec<Action>>,
    #[serde(default, with = "option_duration_secs")]
    pub cooldown: Option<Duration>,
}

impl PolicyRule {
    /// Create an enabled rule with no conditions or actions yet
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            enabled: true,
            priority: 0,
            conditions: Vec::new(),
            actions: Vec::new(),
            cooldown: Duration::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    /// Parse a rule document; unknown condition/action kinds are rejected
    pub fn from_value(value: serde_json::Value) -> Result<Self, PolicyError> {
        serde_json::from_value(value).map_err(|e| PolicyError::InvalidRule(e.to_string()))
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    #[must_use]
    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Devices read by this rule's conditions, in first-reference order
    #[must_use]
    pub fn condition_devices(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for id in self.conditions.iter().filter_map(Condition::device_id) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    /// Apply an update request to this rule
    pub fn apply_update(&mut self, update: UpdateRuleRequest) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(description) = update.description {
            self.description = description;
        }
        if let Some(enabled) = update.enabled {
            self.enabled = enabled;
        }
        if let Some(priority) = update.priority {
            self.priority = priority;
        }
        if let Some(conditions) = update.conditions {
            self.conditions = conditions;
        }
        if let Some(actions) = update.actions {
            self.actions = actions;
        }
        if let Some(cooldown) = update.cooldown {
            self.cooldown = cooldown;
        }
        self.updated_at = Utc::now();
    }
}

/// Serde support for `HH:MM` / `HH:MM:SS` local times
mod time_of_day {
    use chrono::{NaiveTime, Timelike};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let format = if value.second() == 0 { "%H:%M" } else { "%H:%M:%S" };
        serializer.serialize_str(&value.format(format).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&s, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M"))
            .map_err(|_| serde::de::Error::custom(format!("invalid time of day: {s}")))
    }
}

/// Durations as whole seconds, or `HH:MM:SS` / `MM:SS` strings on input
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    pub(super) enum Repr {
        Seconds(u64),
        Text(String),
    }

    impl Repr {
        pub(super) fn into_duration(self) -> Result<Duration, String> {
            match self {
                Repr::Seconds(secs) => Ok(Duration::from_secs(secs)),
                Repr::Text(s) => parse_clock(&s),
            }
        }
    }

    fn parse_clock(s: &str) -> Result<Duration, String> {
        let mut secs: u64 = 0;
        let parts: Vec<&str> = s.split(':').collect();
        if parts.is_empty() || parts.len() > 3 {
            return Err(format!("invalid duration: {s}"));
        }
        for part in parts {
            let value: u64 = part
                .trim()
                .parse()
                .map_err(|_| format!("invalid duration: {s}"))?;
            secs = secs * 60 + value;
        }
        Ok(Duration::from_secs(secs))
    }

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Repr::deserialize(deserializer)?
            .into_duration()
            .map_err(serde::de::Error::custom)
    }
}

mod option_duration_secs {
    use super::duration_secs::Repr;
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Repr>::deserialize(deserializer)? {
            None => Ok(None),
            Some(repr) => repr
                .into_duration()
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_rule_document() {
        let rule = PolicyRule::from_value(json!({
            "id": "energy_saving",
            "name": "Energy saving",
            "priority": 1,
            "cooldown": "00:10:00",
            "conditions": [
                { "type": "time_range", "start": "14:00:00", "end": "18:00" },
                { "type": "threshold", "device_id": "ac_001",
                  "attribute": "energy_consumption", "operator": ">=", "value": 3.0 }
            ],
            "actions": [
                { "type": "set_attribute", "device_id": "ac_001",
                  "attribute": "target_temperature", "value": 25.0 },
                { "type": "notify", "message": "energy saving applied" }
            ]
        }))
        .unwrap();

        assert!(rule.enabled);
        assert_eq!(rule.cooldown, Duration::from_secs(600));
        assert_eq!(
            rule.conditions[0],
            Condition::TimeRange {
                start: NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
                end: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            }
        );
        assert_eq!(rule.condition_devices(), vec!["ac_001"]);
        assert_eq!(
            rule.actions[1],
            Action::Notify {
                message: "energy saving applied".into(),
                level: LogLevel::Info
            }
        );
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let result = PolicyRule::from_value(json!({
            "id": "r1",
            "name": "bad",
            "conditions": [{ "type": "humidity_above", "value": 3 }],
            "actions": [{ "type": "set_power", "device_id": "ac_001", "on": false }]
        }));
        assert!(matches!(result, Err(PolicyError::InvalidRule(_))));

        let result = PolicyRule::from_value(json!({
            "id": "r1",
            "name": "bad",
            "conditions": [{ "type": "time_range", "start": "25:00", "end": "06:00" }],
            "actions": [{ "type": "reboot", "device_id": "ac_001" }]
        }));
        assert!(matches!(result, Err(PolicyError::InvalidRule(_))));
    }

    #[test]
    fn test_generated_id() {
        let rule = PolicyRule::from_value(json!({
            "name": "anonymous",
            "conditions": [],
            "actions": []
        }))
        .unwrap();
        assert_eq!(rule.id.len(), 36);
        assert_eq!(rule.cooldown, Duration::ZERO);
    }

    #[test]
    fn test_action_writes() {
        let power = Action::SetPower {
            device_id: "ac_001".into(),
            on: false,
        };
        assert_eq!(power.write(), Some((attr::POWER, AttributeValue::from("off"))));

        let mode = Action::SetMode {
            device_id: "ac_001".into(),
            mode: "auto".into(),
        };
        assert_eq!(mode.write(), Some((attr::MODE, AttributeValue::from("auto"))));
        assert_eq!(mode.device_id(), Some("ac_001"));
    }

    #[test]
    fn test_operator_compare() {
        assert!(Operator::Ge.compare(3.5, 3.0));
        assert!(!Operator::Lt.compare(3.0, 3.0));
        assert!(Operator::Ne.compare(1.0, 2.0));
        assert_eq!(serde_json::to_value(Operator::Le).unwrap(), json!("<="));
    }

    #[test]
    fn test_apply_update() {
        let mut rule = PolicyRule::new("r1", "Rule");
        let update: UpdateRuleRequest =
            serde_json::from_value(json!({ "priority": 5, "cooldown": 30, "description": null }))
                .unwrap();
        rule.apply_update(update);
        assert_eq!(rule.priority, 5);
        assert_eq!(rule.cooldown, Duration::from_secs(30));
        assert_eq!(rule.name, "Rule");
    }
}
