//! Policy engine for edge devices
//!
//! Evaluates prioritized rules (time windows, thresholds, equality checks)
//! against the device registry on a fixed interval and applies their actions.

pub mod engine;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod model;
pub mod persistence;
pub mod presets;
pub mod store;

pub use engine::{EngineConfig, FiringRecord, LoopState, PolicyEngine, PolicyEvent, TickReport};
pub use error::{ActionError, EvaluationError, PolicyError};
pub use executor::{ActionReport, ActionStatus, ConflictPolicy};
pub use model::*;
pub use store::RuleStore;
