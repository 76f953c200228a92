//! Device type schema table
//!
//! Maps each [`DeviceKind`] to the attributes it exposes, their value kinds,
//! whether policies may write them, and the accepted value domain.

use crate::device::{AttributeValue, DeviceKind, ValueKind};

/// Well-known attribute names
pub mod attr {
    pub const CURRENT_TEMPERATURE: &str = "current_temperature";
    pub const TARGET_TEMPERATURE: &str = "target_temperature";
    pub const MODE: &str = "mode";
    pub const POWER: &str = "power";
    pub const FAN_SPEED: &str = "fan_speed";
    pub const ENERGY_CONSUMPTION: &str = "energy_consumption";
    pub const CURRENT_VALUE: &str = "current_value";
    pub const UNIT: &str = "unit";
    pub const LEVEL: &str = "level";
}

/// Values of the `power` attribute
pub mod power {
    pub const ON: &str = "on";
    pub const OFF: &str = "off";
}

const POWER_STATES: &[&str] = &[power::ON, power::OFF];
const AC_MODES: &[&str] = &["cool", "heat", "auto", "fan", "dry", "off"];
const THERMOSTAT_MODES: &[&str] = &["heat", "cool", "auto", "off"];

/// Description of one attribute in a device type's schema
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttributeSpec {
    pub name: &'static str,
    pub kind: ValueKind,
    /// Whether actions may write this attribute (telemetry may always report it)
    pub writable: bool,
    /// Inclusive numeric bounds
    pub range: Option<(f64, f64)>,
    /// Allowed text values (empty means any)
    pub choices: &'static [&'static str],
}

impl AttributeSpec {
    const fn number(name: &'static str, writable: bool, range: Option<(f64, f64)>) -> Self {
        Self {
            name,
            kind: ValueKind::Number,
            writable,
            range,
            choices: &[],
        }
    }

    const fn text(name: &'static str, writable: bool, choices: &'static [&'static str]) -> Self {
        Self {
            name,
            kind: ValueKind::Text,
            writable,
            range: None,
            choices,
        }
    }

    /// Check that a value is acceptable for this attribute
    pub fn check(&self, value: &AttributeValue) -> Result<(), String> {
        if value.kind() != self.kind {
            return Err(format!(
                "expected {} value, got {}",
                self.kind,
                value.kind()
            ));
        }
        match value {
            AttributeValue::Number(n) => {
                if !n.is_finite() {
                    return Err(format!("value {n} is not finite"));
                }
                if let Some((min, max)) = self.range {
                    if *n < min || *n > max {
                        return Err(format!("value {n} outside {min}..={max}"));
                    }
                }
            }
            AttributeValue::Text(s) => {
                if !self.choices.is_empty() && !self.choices.contains(&s.as_str()) {
                    return Err(format!(
                        "value {s:?} not one of {}",
                        self.choices.join(", ")
                    ));
                }
            }
            AttributeValue::Bool(_) => {}
        }
        Ok(())
    }
}

const AIR_CONDITIONER: &[AttributeSpec] = &[
    AttributeSpec::number(attr::CURRENT_TEMPERATURE, false, None),
    AttributeSpec::number(attr::TARGET_TEMPERATURE, true, Some((16.0, 30.0))),
    AttributeSpec::text(attr::MODE, true, AC_MODES),
    AttributeSpec::text(attr::POWER, true, POWER_STATES),
    AttributeSpec::number(attr::FAN_SPEED, true, Some((0.0, 5.0))),
    AttributeSpec::number(attr::ENERGY_CONSUMPTION, false, Some((0.0, f64::MAX))),
];

const THERMOSTAT: &[AttributeSpec] = &[
    AttributeSpec::number(attr::CURRENT_TEMPERATURE, false, None),
    AttributeSpec::number(attr::TARGET_TEMPERATURE, true, Some((5.0, 35.0))),
    AttributeSpec::text(attr::MODE, true, THERMOSTAT_MODES),
    AttributeSpec::text(attr::POWER, true, POWER_STATES),
];

const SENSOR: &[AttributeSpec] = &[
    AttributeSpec::number(attr::CURRENT_VALUE, false, None),
    AttributeSpec::text(attr::UNIT, false, &[]),
];

const ACTUATOR: &[AttributeSpec] = &[
    AttributeSpec::text(attr::POWER, true, POWER_STATES),
    AttributeSpec::number(attr::LEVEL, true, Some((0.0, 100.0))),
];

/// All attributes of a device kind
#[must_use]
pub fn attributes(kind: DeviceKind) -> &'static [AttributeSpec] {
    match kind {
        DeviceKind::AirConditioner => AIR_CONDITIONER,
        DeviceKind::Thermostat => THERMOSTAT,
        DeviceKind::Sensor => SENSOR,
        DeviceKind::Actuator => ACTUATOR,
    }
}

/// Look up one attribute of a device kind
#[must_use]
pub fn attribute(kind: DeviceKind, name: &str) -> Option<&'static AttributeSpec> {
    attributes(kind).iter().find(|spec| spec.name == name)
}

/// Every schema entry named `name`, across all device kinds
pub fn attribute_in_any(name: &str) -> impl Iterator<Item = &'static AttributeSpec> + '_ {
    DeviceKind::ALL
        .into_iter()
        .filter_map(move |kind| attribute(kind, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_air_conditioner_schema() {
        let spec = attribute(DeviceKind::AirConditioner, attr::TARGET_TEMPERATURE).unwrap();
        assert!(spec.writable);
        assert!(spec.check(&AttributeValue::Number(26.0)).is_ok());
        assert!(spec.check(&AttributeValue::Number(31.0)).is_err());
        assert!(spec.check(&AttributeValue::Text("26".into())).is_err());

        let energy = attribute(DeviceKind::AirConditioner, attr::ENERGY_CONSUMPTION).unwrap();
        assert!(!energy.writable);
    }

    #[test]
    fn test_choices() {
        let mode = attribute(DeviceKind::AirConditioner, attr::MODE).unwrap();
        assert!(mode.check(&AttributeValue::Text("dry".into())).is_ok());
        assert!(mode.check(&AttributeValue::Text("turbo".into())).is_err());

        let unit = attribute(DeviceKind::Sensor, attr::UNIT).unwrap();
        assert!(unit.check(&AttributeValue::Text("°C".into())).is_ok());
    }

    #[test]
    fn test_non_finite_rejected() {
        let level = attribute(DeviceKind::Actuator, attr::LEVEL).unwrap();
        assert!(level.check(&AttributeValue::Number(f64::NAN)).is_err());
    }

    #[test]
    fn test_unknown_attribute() {
        assert!(attribute(DeviceKind::Sensor, attr::POWER).is_none());
        assert_eq!(attribute_in_any(attr::POWER).count(), 3);
        assert_eq!(attribute_in_any("humidity").count(), 0);
    }
}
