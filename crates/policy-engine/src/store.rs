//! Rule storage and validation

use crate::error::PolicyError;
use crate::model::{Action, Condition, PolicyRule, UpdateRuleRequest};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use device_core::schema::{self, AttributeSpec};
use device_core::{DeviceRegistry, ValueKind};
use std::sync::Arc;

/// Set of policy rules keyed by ID
///
/// Rules are validated against the device schema table on the way in, so a
/// stored rule never references an attribute its device type cannot have.
pub struct RuleStore {
    rules: DashMap<String, PolicyRule>,
    registry: Arc<DeviceRegistry>,
}

impl RuleStore {
    /// Create an empty store validating against `registry`'s devices
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self {
            rules: DashMap::new(),
            registry,
        }
    }

    /// Add a rule
    pub fn add(&self, rule: PolicyRule) -> Result<(), PolicyError> {
        validate_rule(&rule, &self.registry)?;

        match self.rules.entry(rule.id.clone()) {
            Entry::Occupied(_) => Err(PolicyError::DuplicateId(rule.id)),
            Entry::Vacant(slot) => {
                tracing::info!("Added policy rule: {} ({})", rule.name, rule.id);
                slot.insert(rule);
                Ok(())
            }
        }
    }

    /// Remove a rule
    pub fn remove(&self, id: &str) -> Result<PolicyRule, PolicyError> {
        let (_, rule) = self
            .rules
            .remove(id)
            .ok_or_else(|| PolicyError::NotFound(id.to_string()))?;
        tracing::info!("Removed policy rule: {} ({})", rule.name, id);
        Ok(rule)
    }

    /// Enable or disable a rule, returning the previous state
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<bool, PolicyError> {
        let mut rule = self
            .rules
            .get_mut(id)
            .ok_or_else(|| PolicyError::NotFound(id.to_string()))?;
        let previous = rule.enabled;
        rule.enabled = enabled;
        if previous != enabled {
            rule.updated_at = chrono::Utc::now();
            tracing::info!(
                "{} policy rule {}",
                if enabled { "Enabled" } else { "Disabled" },
                id
            );
        }
        Ok(previous)
    }

    /// Apply a partial update; the merged rule is validated before it replaces the old one
    pub fn update(&self, id: &str, request: UpdateRuleRequest) -> Result<PolicyRule, PolicyError> {
        let mut entry = self
            .rules
            .get_mut(id)
            .ok_or_else(|| PolicyError::NotFound(id.to_string()))?;

        let mut updated = entry.clone();
        updated.apply_update(request);
        validate_rule(&updated, &self.registry)?;
        *entry = updated.clone();

        tracing::info!("Updated policy rule: {}", id);
        Ok(updated)
    }

    /// Get rule by ID
    #[must_use]
    pub fn get(&self, id: &str) -> Option<PolicyRule> {
        self.rules.get(id).map(|r| r.value().clone())
    }

    /// All rules ordered by priority, then ID
    #[must_use]
    pub fn list(&self) -> Vec<PolicyRule> {
        let mut rules: Vec<PolicyRule> = self.rules.iter().map(|r| r.value().clone()).collect();
        rules.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        rules
    }

    /// Insert without validation, for exercising rules the engine cannot evaluate
    #[cfg(test)]
    pub(crate) fn insert_unchecked(&self, rule: PolicyRule) {
        self.rules.insert(rule.id.clone(), rule);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Check a rule against the device schema table
///
/// Devices that are registered are checked against their own type; rules may
/// also name devices that are not registered yet, in which case the attribute
/// must exist for at least one device type.
pub fn validate_rule(rule: &PolicyRule, registry: &DeviceRegistry) -> Result<(), PolicyError> {
    let invalid = |reason: String| PolicyError::InvalidRule(format!("{}: {reason}", rule.id));

    if rule.id.trim().is_empty() {
        return Err(PolicyError::InvalidRule("rule id is empty".to_string()));
    }
    if rule.conditions.is_empty() {
        return Err(invalid("no conditions".to_string()));
    }
    if rule.actions.is_empty() {
        return Err(invalid("no actions".to_string()));
    }

    for (index, condition) in rule.conditions.iter().enumerate() {
        validate_condition(condition, registry)
            .map_err(|reason| invalid(format!("condition {index}: {reason}")))?;
    }
    for (index, action) in rule.actions.iter().enumerate() {
        validate_action(action, registry)
            .map_err(|reason| invalid(format!("action {index}: {reason}")))?;
    }
    Ok(())
}

fn validate_condition(condition: &Condition, registry: &DeviceRegistry) -> Result<(), String> {
    match condition {
        Condition::TimeRange { start, end } => {
            if start == end {
                return Err(format!("empty time range {start}..{end}"));
            }
            Ok(())
        }
        Condition::Threshold {
            device_id,
            attribute,
            value,
            ..
        } => {
            if !value.is_finite() {
                return Err(format!("threshold {value} is not finite"));
            }
            let specs = candidate_specs(registry, device_id, attribute)?;
            if specs.iter().any(|spec| spec.kind == ValueKind::Number) {
                Ok(())
            } else {
                Err(format!("{attribute} is not numeric"))
            }
        }
        Condition::Equality {
            device_id,
            attribute,
            expected_value,
        } => {
            let specs = candidate_specs(registry, device_id, attribute)?;
            if specs.iter().any(|spec| spec.kind == expected_value.kind()) {
                Ok(())
            } else {
                Err(format!(
                    "{attribute} cannot hold a {} value",
                    expected_value.kind()
                ))
            }
        }
    }
}

fn validate_action(action: &Action, registry: &DeviceRegistry) -> Result<(), String> {
    let (Some(device_id), Some((attribute, value))) = (action.device_id(), action.write()) else {
        return match action {
            Action::Notify { message, .. } if message.trim().is_empty() => {
                Err("empty notification message".to_string())
            }
            _ => Ok(()),
        };
    };

    let specs = candidate_specs(registry, device_id, attribute)?;
    let writable: Vec<&AttributeSpec> = specs.into_iter().filter(|spec| spec.writable).collect();
    if writable.is_empty() {
        return Err(format!("{attribute} is read-only"));
    }

    let mut last_error = String::new();
    for spec in writable {
        match spec.check(&value) {
            Ok(()) => return Ok(()),
            Err(reason) => last_error = format!("{attribute}: {reason}"),
        }
    }
    Err(last_error)
}

/// Schema entries the attribute may resolve to for this device
fn candidate_specs(
    registry: &DeviceRegistry,
    device_id: &str,
    attribute: &str,
) -> Result<Vec<&'static AttributeSpec>, String> {
    if device_id.trim().is_empty() {
        return Err("device id is empty".to_string());
    }
    match registry.kind_of(device_id) {
        Some(kind) => schema::attribute(kind, attribute)
            .map(|spec| vec![spec])
            .ok_or_else(|| format!("{attribute} is not an attribute of {kind} {device_id}")),
        None => {
            let specs: Vec<&'static AttributeSpec> = schema::attribute_in_any(attribute).collect();
            if specs.is_empty() {
                Err(format!("{attribute} is not a known device attribute"))
            } else {
                Ok(specs)
            }
        }
    }
}
