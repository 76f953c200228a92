//! Edge device model
//!
//! This crate provides the device representation, the per-type attribute
//! schema, the in-memory device registry and the command capability used to
//! reach physical devices.

pub mod command;
pub mod device;
pub mod persistence;
pub mod registry;
pub mod schema;

pub use command::{CommandAck, CommandError, DeviceCommand, DeviceCommander};
pub use device::{AttributeValue, Device, DeviceKind, ValueKind};
pub use registry::{DeviceRegistry, RegistryError, RegistryEvent, RegistrySnapshot};
