//! In-memory device registry

use crate::device::{AttributeValue, Device, DeviceKind};
use crate::schema;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::broadcast;

/// Registry errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Device already registered: {0}")]
    DuplicateId(String),

    #[error("Invalid attribute {attribute} for device {device_id}: {reason}")]
    InvalidAttribute {
        device_id: String,
        attribute: String,
        reason: String,
    },
}

/// Registry events (observability only, rules poll the registry)
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// A device was registered
    DeviceRegistered { device_id: String },
    /// A device was deregistered
    DeviceRemoved { device_id: String },
    /// An attribute value was written
    AttributeChanged {
        device_id: String,
        attribute: String,
        value: AttributeValue,
    },
    /// Device reachability changed
    AvailabilityChanged { device_id: String, online: bool },
}

struct Slot {
    /// Registration order, used for listing
    seq: u64,
    device: Device,
}

/// Authoritative store of device state
///
/// Every mutation of a single device happens under that device's map entry
/// lock, so concurrent writers (policy actions, telemetry) never lose updates.
pub struct DeviceRegistry {
    devices: DashMap<String, Slot>,
    next_seq: AtomicU64,
    event_tx: broadcast::Sender<RegistryEvent>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    #[must_use]
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            devices: DashMap::new(),
            next_seq: AtomicU64::new(0),
            event_tx,
        }
    }

    /// Subscribe to registry events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_tx.subscribe()
    }

    /// Register a new device after validating its attributes against the schema
    pub fn register(&self, mut device: Device) -> Result<(), RegistryError> {
        for (attribute, value) in &device.attributes {
            check_attribute(&device.id, device.kind, attribute, value)?;
        }
        device.updated_at = Some(Utc::now());

        let device_id = device.id.clone();
        match self.devices.entry(device_id.clone()) {
            Entry::Occupied(_) => return Err(RegistryError::DuplicateId(device_id)),
            Entry::Vacant(slot) => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                slot.insert(Slot { seq, device });
            }
        }

        tracing::info!("Registered device {}", device_id);
        let _ = self
            .event_tx
            .send(RegistryEvent::DeviceRegistered { device_id });
        Ok(())
    }

    /// Remove a device
    pub fn deregister(&self, device_id: &str) -> Result<Device, RegistryError> {
        let (_, slot) = self
            .devices
            .remove(device_id)
            .ok_or_else(|| RegistryError::NotFound(device_id.to_string()))?;

        tracing::info!("Deregistered device {}", device_id);
        let _ = self.event_tx.send(RegistryEvent::DeviceRemoved {
            device_id: device_id.to_string(),
        });
        Ok(slot.device)
    }

    /// Get a copy of a device
    pub fn get(&self, device_id: &str) -> Result<Device, RegistryError> {
        self.devices
            .get(device_id)
            .map(|slot| slot.device.clone())
            .ok_or_else(|| RegistryError::NotFound(device_id.to_string()))
    }

    /// Device type of a registered device
    #[must_use]
    pub fn kind_of(&self, device_id: &str) -> Option<DeviceKind> {
        self.devices.get(device_id).map(|slot| slot.device.kind)
    }

    /// All devices in registration order
    #[must_use]
    pub fn list(&self) -> Vec<Device> {
        let mut slots: Vec<(u64, Device)> = self
            .devices
            .iter()
            .map(|r| (r.seq, r.device.clone()))
            .collect();
        slots.sort_by_key(|(seq, _)| *seq);
        slots.into_iter().map(|(_, device)| device).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Write one attribute value
    ///
    /// The attribute must exist in the device type's schema and the value must
    /// satisfy its kind and domain; otherwise nothing is changed.
    pub fn update(
        &self,
        device_id: &str,
        attribute: &str,
        value: AttributeValue,
    ) -> Result<(), RegistryError> {
        {
            let mut slot = self
                .devices
                .get_mut(device_id)
                .ok_or_else(|| RegistryError::NotFound(device_id.to_string()))?;
            let device = &mut slot.device;

            check_attribute(device_id, device.kind, attribute, &value)?;
            device.attributes.insert(attribute.to_string(), value.clone());
            device.updated_at = Some(Utc::now());
        }

        tracing::debug!("Device {} {} = {}", device_id, attribute, value);
        let _ = self.event_tx.send(RegistryEvent::AttributeChanged {
            device_id: device_id.to_string(),
            attribute: attribute.to_string(),
            value,
        });
        Ok(())
    }

    /// Apply a telemetry report of several attributes, all or nothing
    pub fn apply_telemetry(
        &self,
        device_id: &str,
        attributes: BTreeMap<String, AttributeValue>,
    ) -> Result<(), RegistryError> {
        {
            let mut slot = self
                .devices
                .get_mut(device_id)
                .ok_or_else(|| RegistryError::NotFound(device_id.to_string()))?;
            let device = &mut slot.device;

            for (attribute, value) in &attributes {
                check_attribute(device_id, device.kind, attribute, value)?;
            }
            for (attribute, value) in &attributes {
                device.attributes.insert(attribute.clone(), value.clone());
            }
            device.updated_at = Some(Utc::now());
        }

        for (attribute, value) in attributes {
            let _ = self.event_tx.send(RegistryEvent::AttributeChanged {
                device_id: device_id.to_string(),
                attribute,
                value,
            });
        }
        Ok(())
    }

    /// Mark a device reachable or unreachable
    pub fn set_online(&self, device_id: &str, online: bool) -> Result<(), RegistryError> {
        let changed = {
            let mut slot = self
                .devices
                .get_mut(device_id)
                .ok_or_else(|| RegistryError::NotFound(device_id.to_string()))?;
            let changed = slot.device.online != online;
            slot.device.online = online;
            slot.device.updated_at = Some(Utc::now());
            changed
        };

        if changed {
            tracing::info!(
                "Device {} is now {}",
                device_id,
                if online { "online" } else { "offline" }
            );
            let _ = self.event_tx.send(RegistryEvent::AvailabilityChanged {
                device_id: device_id.to_string(),
                online,
            });
        }
        Ok(())
    }

    /// Copy of every device
    #[must_use]
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot::from_devices(self.devices.iter().map(|r| r.device.clone()))
    }

    /// Copy of the listed devices; unknown ids are left out
    #[must_use]
    pub fn snapshot_for<'a, I>(&self, device_ids: I) -> RegistrySnapshot
    where
        I: IntoIterator<Item = &'a str>,
    {
        RegistrySnapshot::from_devices(
            device_ids
                .into_iter()
                .filter_map(|id| self.devices.get(id).map(|slot| slot.device.clone())),
        )
    }
}

fn check_attribute(
    device_id: &str,
    kind: DeviceKind,
    attribute: &str,
    value: &AttributeValue,
) -> Result<(), RegistryError> {
    let invalid = |reason: String| RegistryError::InvalidAttribute {
        device_id: device_id.to_string(),
        attribute: attribute.to_string(),
        reason,
    };
    let spec = schema::attribute(kind, attribute)
        .ok_or_else(|| invalid(format!("not part of the {kind} schema")))?;
    spec.check(value).map_err(invalid)
}

/// Point-in-time copy of device state used for condition evaluation
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    devices: HashMap<String, Device>,
}

impl RegistrySnapshot {
    pub fn from_devices(devices: impl IntoIterator<Item = Device>) -> Self {
        Self {
            devices: devices.into_iter().map(|d| (d.id.clone(), d)).collect(),
        }
    }

    #[must_use]
    pub fn get(&self, device_id: &str) -> Option<&Device> {
        self.devices.get(device_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
