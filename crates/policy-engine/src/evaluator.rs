//! Condition evaluator for policy rules
//!
//! Evaluation is pure: the outcome depends only on the condition, the device
//! snapshot and the supplied time. Missing or offline devices are reported as
//! unmet checks rather than errors so the caller can log them at low severity.

use crate::error::EvaluationError;
use crate::model::Condition;
use chrono::{DateTime, Local, NaiveTime};
use device_core::{RegistrySnapshot, ValueKind};

/// Result of checking one condition
#[derive(Debug, Clone, PartialEq)]
pub enum Check {
    /// Condition holds
    Met,
    /// Condition evaluated to false
    NotMet,
    /// Referenced device is not registered
    DeviceMissing(String),
    /// Referenced device is offline
    DeviceOffline(String),
    /// Referenced attribute has never been reported
    NoReading { device_id: String, attribute: String },
}

impl Check {
    #[must_use]
    pub fn is_met(&self) -> bool {
        matches!(self, Self::Met)
    }
}

/// Evaluate all conditions (AND), stopping at the first one that does not hold
///
/// Returns [`Check::Met`] when every condition holds, otherwise the check of
/// the first condition that failed, in listed order.
pub fn evaluate_all(
    conditions: &[Condition],
    snapshot: &RegistrySnapshot,
    now: &DateTime<Local>,
) -> Result<Check, EvaluationError> {
    for condition in conditions {
        let check = evaluate(condition, snapshot, now)?;
        if !check.is_met() {
            return Ok(check);
        }
    }
    Ok(Check::Met)
}

/// Evaluate a single condition
pub fn evaluate(
    condition: &Condition,
    snapshot: &RegistrySnapshot,
    now: &DateTime<Local>,
) -> Result<Check, EvaluationError> {
    match condition {
        Condition::TimeRange { start, end } => {
            Ok(met_if(in_time_range(*start, *end, now.time())))
        }
        Condition::Threshold {
            device_id,
            attribute,
            operator,
            value,
        } => {
            let current = match read_attribute(snapshot, device_id, attribute) {
                Ok(current) => current,
                Err(check) => return Ok(check),
            };
            let Some(current) = current.as_number() else {
                return Err(EvaluationError::TypeMismatch {
                    device_id: device_id.clone(),
                    attribute: attribute.clone(),
                    expected: ValueKind::Number,
                    found: current.kind(),
                });
            };
            Ok(met_if(operator.compare(current, *value)))
        }
        Condition::Equality {
            device_id,
            attribute,
            expected_value,
        } => match read_attribute(snapshot, device_id, attribute) {
            Ok(current) => Ok(met_if(current == expected_value)),
            Err(check) => Ok(check),
        },
    }
}

/// Whether `time` falls in `[start, end)`, wrapping past midnight when start > end
#[must_use]
pub fn in_time_range(start: NaiveTime, end: NaiveTime, time: NaiveTime) -> bool {
    if start <= end {
        // Same-day range (e.g., 09:00 to 17:00)
        time >= start && time < end
    } else {
        // Overnight range (e.g., 22:00 to 06:00)
        time >= start || time < end
    }
}

fn met_if(holds: bool) -> Check {
    if holds {
        Check::Met
    } else {
        Check::NotMet
    }
}

/// Current value of an online device's attribute, or the check explaining why
/// there is none
fn read_attribute<'a>(
    snapshot: &'a RegistrySnapshot,
    device_id: &str,
    attribute: &str,
) -> Result<&'a device_core::AttributeValue, Check> {
    let device = snapshot
        .get(device_id)
        .ok_or_else(|| Check::DeviceMissing(device_id.to_string()))?;
    if !device.online {
        return Err(Check::DeviceOffline(device_id.to_string()));
    }
    device.attribute(attribute).ok_or_else(|| Check::NoReading {
        device_id: device_id.to_string(),
        attribute: attribute.to_string(),
    })
}
