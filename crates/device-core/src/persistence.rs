//! Device inventory loading from JSON file storage

use crate::device::Device;
use std::path::Path;
use tokio::fs;

/// Load a device inventory from a JSON array
///
/// Entries that do not parse are skipped with a warning; a missing file
/// yields an empty inventory.
pub async fn load_devices(path: &Path) -> Vec<Device> {
    let contents = match fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No devices file found at {:?}, starting empty", path);
            return Vec::new();
        }
        Err(e) => {
            tracing::warn!("Failed to read devices file {:?}: {}", path, e);
            return Vec::new();
        }
    };

    let entries = match serde_json::from_str::<Vec<serde_json::Value>>(&contents) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Failed to parse devices file {:?}: {}", path, e);
            return Vec::new();
        }
    };

    let devices: Vec<Device> = entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match serde_json::from_value::<Device>(entry) {
            Ok(device) => Some(device),
            Err(e) => {
                tracing::warn!("Skipping device entry {} in {:?}: {}", index, path, e);
                None
            }
        })
        .collect();

    tracing::info!("Loaded {} devices from {:?}", devices.len(), path);
    devices
}
