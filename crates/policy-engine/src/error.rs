//! Error types for the policy engine

use device_core::ValueKind;
use serde::Serialize;
use thiserror::Error;

/// Errors returned by rule management
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolicyError {
    /// Rule not found
    #[error("Rule not found: {0}")]
    NotFound(String),

    /// A rule with this ID already exists
    #[error("Rule already exists: {0}")]
    DuplicateId(String),

    /// Rule document or contents rejected
    #[error("Invalid rule: {0}")]
    InvalidRule(String),
}

/// Condition evaluation failures (treated as "not satisfied")
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("Attribute {attribute} of {device_id} is {found}, expected {expected}")]
    TypeMismatch {
        device_id: String,
        attribute: String,
        expected: ValueKind,
        found: ValueKind,
    },
}

/// Action dispatch failures
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ActionError {
    /// Target device is offline, nothing was sent
    #[error("Device offline: {0}")]
    DeviceOffline(String),

    /// The action cannot be applied to its target
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// Command delivery or device-side failure (including timeouts)
    #[error("Device error: {0}")]
    DeviceError(String),
}
