//! Built-in rules for air conditioners

use crate::model::{Action, Condition, LogLevel, Operator, PolicyRule};
use chrono::NaiveTime;
use device_core::schema::attr;
use std::time::Duration;

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default()
}

/// Raise the set point during afternoon peak hours when consumption is high
#[must_use]
pub fn energy_saving_rule(device_id: &str) -> PolicyRule {
    PolicyRule::new(
        format!("energy_saving_{device_id}"),
        format!("Energy saving ({device_id})"),
    )
    .with_description("Raise target temperature to 25°C between 14:00 and 18:00 when consumption is high")
    .with_priority(1)
    .with_cooldown(Duration::from_secs(30 * 60))
    .with_condition(Condition::TimeRange {
        start: hm(14, 0),
        end: hm(18, 0),
    })
    .with_condition(Condition::Threshold {
        device_id: device_id.to_string(),
        attribute: attr::ENERGY_CONSUMPTION.to_string(),
        operator: Operator::Ge,
        value: 3.0,
    })
    .with_action(Action::SetAttribute {
        device_id: device_id.to_string(),
        attribute: attr::TARGET_TEMPERATURE.to_string(),
        value: 25.0.into(),
    })
    .with_action(Action::Notify {
        message: format!("Energy saving applied to {device_id}"),
        level: LogLevel::Info,
    })
}

/// Quieter overnight operation
#[must_use]
pub fn night_mode_rule(device_id: &str) -> PolicyRule {
    PolicyRule::new(
        format!("night_mode_{device_id}"),
        format!("Night mode ({device_id})"),
    )
    .with_description("Target 24°C in auto mode between 22:00 and 06:00")
    .with_priority(2)
    .with_cooldown(Duration::from_secs(60 * 60))
    .with_condition(Condition::TimeRange {
        start: hm(22, 0),
        end: hm(6, 0),
    })
    .with_action(Action::SetAttribute {
        device_id: device_id.to_string(),
        attribute: attr::TARGET_TEMPERATURE.to_string(),
        value: 24.0.into(),
    })
    .with_action(Action::SetMode {
        device_id: device_id.to_string(),
        mode: "auto".to_string(),
    })
    .with_action(Action::Notify {
        message: format!("Night mode applied to {device_id}"),
        level: LogLevel::Info,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineConfig, PolicyEngine};
    use chrono::{Local, TimeZone};
    use device_core::{AttributeValue, Device, DeviceKind, DeviceRegistry};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_presets_apply() {
        let registry = Arc::new(DeviceRegistry::new());
        registry
            .register(
                Device::new("ac_001", DeviceKind::AirConditioner)
                    .with_attribute(attr::ENERGY_CONSUMPTION, 3.2)
                    .with_attribute(attr::MODE, "cool"),
            )
            .unwrap();
        let engine = PolicyEngine::new(Arc::clone(&registry), None, EngineConfig::default());
        engine.rules().add(energy_saving_rule("ac_001")).unwrap();
        engine.rules().add(night_mode_rule("ac_001")).unwrap();

        let afternoon = Local.with_ymd_and_hms(2024, 6, 1, 15, 0, 0).earliest().unwrap();
        let report = engine.tick_at(afternoon).await;
        assert_eq!(report.fired, 1);
        assert_eq!(
            registry.get("ac_001").unwrap().attribute(attr::TARGET_TEMPERATURE),
            Some(&AttributeValue::Number(25.0))
        );

        let night = Local.with_ymd_and_hms(2024, 6, 1, 23, 0, 0).earliest().unwrap();
        let report = engine.tick_at(night).await;
        assert_eq!(report.fired, 1);
        let device = registry.get("ac_001").unwrap();
        assert_eq!(
            device.attribute(attr::TARGET_TEMPERATURE),
            Some(&AttributeValue::Number(24.0))
        );
        assert_eq!(device.attribute(attr::MODE), Some(&AttributeValue::from("auto")));
    }
}
