//! Edge device representation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Device types known to the schema table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    AirConditioner,
    Thermostat,
    Sensor,
    Actuator,
}

impl DeviceKind {
    /// All device kinds, in schema table order
    pub const ALL: [DeviceKind; 4] = [
        DeviceKind::AirConditioner,
        DeviceKind::Thermostat,
        DeviceKind::Sensor,
        DeviceKind::Actuator,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AirConditioner => "air_conditioner",
            Self::Thermostat => "thermostat",
            Self::Sensor => "sensor",
            Self::Actuator => "actuator",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primitive type of an attribute value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Number,
    Bool,
    Text,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number => f.write_str("number"),
            Self::Bool => f.write_str("bool"),
            Self::Text => f.write_str("text"),
        }
    }
}

/// A typed attribute value (numeric reading, enum string or flag)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl AttributeValue {
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Bool(_) => ValueKind::Bool,
            Self::Number(_) => ValueKind::Number,
            Self::Text(_) => ValueKind::Text,
        }
    }

    /// Numeric value, if this is a number
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// String value, if this is text
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<AttributeValue> for serde_json::Value {
    fn from(value: AttributeValue) -> Self {
        match value {
            AttributeValue::Bool(b) => serde_json::Value::Bool(b),
            AttributeValue::Number(n) => serde_json::Number::from_f64(n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            AttributeValue::Text(s) => serde_json::Value::String(s),
        }
    }
}

/// A device managed by this edge node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Unique identifier (e.g., "ac_001")
    pub id: String,
    /// Device type, selects the attribute schema
    #[serde(rename = "type")]
    pub kind: DeviceKind,
    /// Human-readable name
    #[serde(default)]
    pub name: Option<String>,
    /// Where the device is installed
    #[serde(default)]
    pub location: Option<String>,
    /// Is the device reachable
    #[serde(default)]
    pub online: bool,
    /// Reported attribute values; keys are restricted to the type's schema
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
    /// Last mutation timestamp
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Device {
    /// Create an online device with no reported attributes
    #[must_use]
    pub fn new(id: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            id: id.into(),
            kind,
            name: None,
            location: None,
            online: true,
            attributes: BTreeMap::new(),
            updated_at: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    #[must_use]
    pub fn with_online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    #[must_use]
    pub fn with_attribute(
        mut self,
        attribute: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.attributes.insert(attribute.into(), value.into());
        self
    }

    /// Current value of an attribute, if reported
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Get a display name (friendly name or id)
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_value_untagged() {
        let values: Vec<AttributeValue> = serde_json::from_str(r#"[true, 26.5, "cool"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                AttributeValue::Bool(true),
                AttributeValue::Number(26.5),
                AttributeValue::Text("cool".to_string()),
            ]
        );
    }

    #[test]
    fn test_device_document() {
        let json = r#"{
            "id": "ac_001",
            "type": "air_conditioner",
            "name": "Bedroom AC",
            "online": true,
            "attributes": { "power": "on", "target_temperature": 22 }
        }"#;
        let device: Device = serde_json::from_str(json).unwrap();
        assert_eq!(device.kind, DeviceKind::AirConditioner);
        assert_eq!(device.display_name(), "Bedroom AC");
        assert_eq!(
            device.attribute("target_temperature"),
            Some(&AttributeValue::Number(22.0))
        );
        assert!(device.updated_at.is_none());
    }
}
