//! Edge agent - runs the policy engine against a local device inventory

use device_core::persistence::load_devices;
use device_core::{DeviceCommander, DeviceKind, DeviceRegistry};
use policy_engine::persistence::load_rules;
use policy_engine::{presets, PolicyEngine, PolicyEvent};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod simulator;

use config::AgentConfig;
use simulator::SimulatedCommander;

/// Load rules from disk, or install presets when configured and no rules file exists
async fn install_rules(engine: &PolicyEngine, config: &AgentConfig) -> usize {
    let rules = match load_rules(&config.rules_path()).await {
        Some(rules) => rules,
        None if config.seed_defaults => engine
            .registry()
            .list()
            .into_iter()
            .filter(|device| device.kind == DeviceKind::AirConditioner)
            .flat_map(|device| {
                [
                    presets::energy_saving_rule(&device.id),
                    presets::night_mode_rule(&device.id),
                ]
            })
            .collect(),
        None => Vec::new(),
    };

    let mut installed = 0;
    for rule in rules {
        let id = rule.id.clone();
        match engine.rules().add(rule) {
            Ok(()) => installed += 1,
            Err(e) => tracing::warn!("Rejected rule {}: {}", id, e),
        }
    }
    installed
}

/// Log engine events until the channel closes
fn spawn_event_logger(engine: &PolicyEngine) {
    let mut rx = engine.subscribe();

    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(PolicyEvent::RuleFired(record)) => {
                    if record.succeeded() {
                        tracing::info!("Rule {} applied {} actions", record.rule_id, record.actions.len());
                    } else {
                        tracing::warn!(
                            "Rule {} fired with failures: {}",
                            record.rule_id,
                            serde_json::to_string(&record.actions).unwrap_or_default()
                        );
                    }
                }
                Ok(PolicyEvent::RuleFailed { rule_id, error }) => {
                    tracing::error!("Rule {} faulted: {}", rule_id, error);
                }
                Ok(PolicyEvent::TickCompleted(report)) => {
                    if report.fired > 0 {
                        tracing::info!(
                            "Tick: {} evaluated, {} fired, {} failed",
                            report.evaluated,
                            report.fired,
                            report.failed
                        );
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Event logger lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "edge_agent=debug,policy_engine=debug,device_core=info,info".into()
            }),
        )
        .init();

    tracing::info!("Starting edge agent");

    let config = AgentConfig::from_env();
    tracing::debug!("Configuration: {:?}", config);

    let registry = Arc::new(DeviceRegistry::new());
    for device in load_devices(&config.devices_path()).await {
        let id = device.id.clone();
        if let Err(e) = registry.register(device) {
            tracing::warn!("Skipping device {}: {}", id, e);
        }
    }
    tracing::info!("Registered {} devices", registry.len());

    let commander: Arc<dyn DeviceCommander> =
        Arc::new(SimulatedCommander::new(config.simulated_latency));
    let engine = Arc::new(PolicyEngine::new(
        Arc::clone(&registry),
        Some(commander),
        config.engine_config(),
    ));

    let installed = install_rules(&engine, &config).await;
    tracing::info!("Installed {} policy rules", installed);

    spawn_event_logger(&engine);
    engine.start(config.tick_interval);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    engine.stop().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_core::Device;
    use policy_engine::EngineConfig;

    fn engine() -> PolicyEngine {
        let registry = Arc::new(DeviceRegistry::new());
        registry
            .register(Device::new("ac_001", DeviceKind::AirConditioner))
            .unwrap();
        registry
            .register(Device::new("temp_1", DeviceKind::Sensor))
            .unwrap();
        PolicyEngine::new(registry, None, EngineConfig::default())
    }

    fn config(seed_defaults: bool) -> AgentConfig {
        AgentConfig {
            data_dir: std::env::temp_dir().join(format!("edge-agent-missing-{}", std::process::id())),
            seed_defaults,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_seeds_presets_for_air_conditioners() {
        let engine = engine();
        assert_eq!(install_rules(&engine, &config(true)).await, 2);

        let ids: Vec<String> = engine.rules().list().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["energy_saving_ac_001", "night_mode_ac_001"]);
    }

    #[tokio::test]
    async fn test_no_rules_without_seeding() {
        let engine = engine();
        assert_eq!(install_rules(&engine, &config(false)).await, 0);
        assert!(engine.rules().is_empty());
    }
}
