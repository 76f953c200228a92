//! Rule document loading from JSON file storage

use crate::model::PolicyRule;
use std::path::Path;
use tokio::fs;

/// Load rule documents from a JSON array
///
/// Returns `None` when the file does not exist, so callers can tell an absent
/// rules file from an empty one. Entries that fail to parse are skipped.
pub async fn load_rules(path: &Path) -> Option<Vec<PolicyRule>> {
    let contents = match fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No rules file found at {:?}", path);
            return None;
        }
        Err(e) => {
            tracing::warn!("Failed to read rules file {:?}: {}", path, e);
            return Some(Vec::new());
        }
    };

    let entries = match serde_json::from_str::<Vec<serde_json::Value>>(&contents) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Failed to parse rules file {:?}: {}", path, e);
            return Some(Vec::new());
        }
    };

    let rules: Vec<PolicyRule> = entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match PolicyRule::from_value(entry) {
            Ok(rule) => Some(rule),
            Err(e) => {
                tracing::warn!("Skipping rule entry {} in {:?}: {}", index, path, e);
                None
            }
        })
        .collect();

    tracing::info!("Loaded {} rules from {:?}", rules.len(), path);
    Some(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, Condition};
    use std::time::Duration;

    #[tokio::test]
    async fn test_load_skips_unknown_kinds() {
        let dir = std::env::temp_dir().join(format!("policy-engine-{}", std::process::id()));
        fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("rules.json");
        fs::write(
            &path,
            r#"[
                {
                    "id": "night",
                    "name": "Night mode",
                    "priority": 2,
                    "cooldown": "01:00:00",
                    "conditions": [{"type": "time_range", "start": "22:00", "end": "06:00"}],
                    "actions": [{"type": "set_mode", "device_id": "ac_001", "mode": "auto"}]
                },
                {
                    "name": "Broken",
                    "conditions": [{"type": "humidity", "device_id": "ac_001"}],
                    "actions": []
                },
                {
                    "name": "Announce",
                    "conditions": [{"type": "equality", "device_id": "ac_001", "attribute": "power", "expected_value": "on"}],
                    "actions": [{"type": "notify", "message": "AC is on", "level": "warn"}]
                }
            ]"#,
        )
        .await
        .unwrap();

        let rules = load_rules(&path).await.unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].id, "night");
        assert_eq!(rules[0].cooldown, Duration::from_secs(3600));
        assert!(matches!(rules[0].conditions[0], Condition::TimeRange { .. }));
        assert!(!rules[1].id.is_empty());
        assert!(matches!(rules[1].actions[0], Action::Notify { .. }));

        fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_file() {
        assert!(load_rules(Path::new("/nonexistent/rules.json")).await.is_none());
    }
}
