//! Agent configuration from environment variables

use policy_engine::{ConflictPolicy, EngineConfig};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Runtime settings for the edge agent
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    /// Holds `devices.json` and `rules.json`
    pub data_dir: PathBuf,
    pub tick_interval: Duration,
    pub command_timeout: Duration,
    pub reset_cooldown_on_enable: bool,
    pub conflict_policy: ConflictPolicy,
    /// Install the preset rules when no rules file exists
    pub seed_defaults: bool,
    /// Delay added by the simulated command dispatcher
    pub simulated_latency: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            tick_interval: Duration::from_secs(60),
            command_timeout: Duration::from_secs(10),
            reset_cooldown_on_enable: false,
            conflict_policy: ConflictPolicy::LastWriteWins,
            seed_defaults: false,
            simulated_latency: Duration::from_millis(50),
        }
    }
}

impl AgentConfig {
    /// Read settings from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`; unset or malformed values fall back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            data_dir: lookup("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            tick_interval: parse(&lookup, "POLICY_TICK_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.tick_interval),
            command_timeout: parse(&lookup, "COMMAND_TIMEOUT_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.command_timeout),
            reset_cooldown_on_enable: parse(&lookup, "POLICY_RESET_COOLDOWN_ON_ENABLE")
                .unwrap_or(defaults.reset_cooldown_on_enable),
            conflict_policy: lookup("POLICY_CONFLICT")
                .and_then(|raw| parse_conflict_policy(&raw))
                .unwrap_or(defaults.conflict_policy),
            seed_defaults: parse(&lookup, "POLICY_SEED_DEFAULTS")
                .unwrap_or(defaults.seed_defaults),
            simulated_latency: parse(&lookup, "SIMULATED_LATENCY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.simulated_latency),
        }
    }

    #[must_use]
    pub fn devices_path(&self) -> PathBuf {
        self.data_dir.join("devices.json")
    }

    #[must_use]
    pub fn rules_path(&self) -> PathBuf {
        self.data_dir.join("rules.json")
    }

    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            command_timeout: self.command_timeout,
            reset_cooldown_on_enable: self.reset_cooldown_on_enable,
            conflict_policy: self.conflict_policy,
        }
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid {}={:?}, using default", key, raw);
            None
        }
    }
}

fn parse_conflict_policy(raw: &str) -> Option<ConflictPolicy> {
    match serde_json::from_value(serde_json::Value::String(raw.trim().to_lowercase())) {
        Ok(policy) => Some(policy),
        Err(_) => {
            tracing::warn!("Ignoring invalid POLICY_CONFLICT={:?}, using default", raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> AgentConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AgentConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        assert_eq!(config(&[]), AgentConfig::default());
        assert_eq!(
            AgentConfig::default().rules_path(),
            PathBuf::from("./data/rules.json")
        );
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("DATA_DIR", "/var/lib/edge"),
            ("POLICY_TICK_SECS", "5"),
            ("COMMAND_TIMEOUT_SECS", "2"),
            ("POLICY_RESET_COOLDOWN_ON_ENABLE", "true"),
            ("POLICY_CONFLICT", "First_Write_Wins"),
            ("POLICY_SEED_DEFAULTS", "true"),
            ("SIMULATED_LATENCY_MS", "0"),
        ]);

        assert_eq!(config.devices_path(), PathBuf::from("/var/lib/edge/devices.json"));
        assert_eq!(config.tick_interval, Duration::from_secs(5));
        assert_eq!(config.simulated_latency, Duration::ZERO);
        assert!(config.seed_defaults);

        let engine = config.engine_config();
        assert_eq!(engine.command_timeout, Duration::from_secs(2));
        assert!(engine.reset_cooldown_on_enable);
        assert_eq!(engine.conflict_policy, ConflictPolicy::FirstWriteWins);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = config(&[
            ("POLICY_TICK_SECS", "0"),
            ("COMMAND_TIMEOUT_SECS", "soon"),
            ("POLICY_CONFLICT", "random"),
            ("POLICY_SEED_DEFAULTS", "yes"),
        ]);
        assert_eq!(config, AgentConfig::default());
    }
}
