//! Policy engine and monitoring loop

use crate::error::PolicyError;
use crate::evaluator::{self, Check};
use crate::executor::{ActionExecutor, ActionReport, ActionStatus, ConflictPolicy, WriteClaims};
use crate::model::PolicyRule;
use crate::store::RuleStore;
use chrono::{DateTime, Local};
use dashmap::DashMap;
use device_core::{DeviceCommander, DeviceRegistry};
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Engine settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound for a single device command
    pub command_timeout: Duration,
    /// Clear a rule's cooldown when it is re-enabled
    pub reset_cooldown_on_enable: bool,
    /// How competing writes within one tick are resolved
    pub conflict_policy: ConflictPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(10),
            reset_cooldown_on_enable: false,
            conflict_policy: ConflictPolicy::default(),
        }
    }
}

/// Monitoring loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Stopped,
    Running,
}

/// One rule firing and its per-action outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FiringRecord {
    pub rule_id: String,
    pub rule_name: String,
    pub fired_at: DateTime<Local>,
    pub actions: Vec<ActionReport>,
}

impl FiringRecord {
    /// True when no action failed
    #[must_use]
    pub fn succeeded(&self) -> bool {
        !self.actions.iter().any(|a| a.status.is_failure())
    }
}

/// Summary of one evaluation pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickReport {
    pub at: DateTime<Local>,
    /// Enabled rules that were evaluated
    pub evaluated: usize,
    /// Rules whose conditions held (including those held back by cooldown)
    pub satisfied: usize,
    /// Rules whose actions were dispatched
    pub fired: usize,
    /// Fired rules with a failed action, plus rules that faulted
    pub failed: usize,
    pub firings: Vec<FiringRecord>,
}

impl TickReport {
    fn new(at: DateTime<Local>) -> Self {
        Self {
            at,
            evaluated: 0,
            satisfied: 0,
            fired: 0,
            failed: 0,
            firings: Vec::new(),
        }
    }
}

/// Last command outcome for a device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceCommandStatus {
    pub rule_id: String,
    pub action_index: usize,
    pub at: DateTime<Local>,
    pub status: ActionStatus,
}

/// Events emitted by the policy engine
#[derive(Debug, Clone)]
pub enum PolicyEvent {
    /// A rule's actions were dispatched
    RuleFired(FiringRecord),
    /// A rule faulted during evaluation or dispatch
    RuleFailed { rule_id: String, error: String },
    /// An evaluation pass finished
    TickCompleted(TickReport),
}

struct RuleFiringRecord {
    last_fired_at: DateTime<Local>,
    last: FiringRecord,
}

enum RuleOutcome {
    NotSatisfied,
    CoolingDown,
    Errored(String),
    Fired(FiringRecord),
}

/// Dispatch progress of one rule; lives outside the unwind boundary so a
/// fault mid-dispatch still starts the cooldown
#[derive(Default)]
struct Dispatch {
    started: bool,
    reports: Vec<ActionReport>,
}

struct LoopHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Periodically evaluates stored rules against device state and applies their actions
pub struct PolicyEngine {
    registry: Arc<DeviceRegistry>,
    rules: Arc<RuleStore>,
    executor: ActionExecutor,
    config: EngineConfig,
    firing: DashMap<String, RuleFiringRecord>,
    device_status: DashMap<String, DeviceCommandStatus>,
    event_tx: broadcast::Sender<PolicyEvent>,
    /// Serializes ticks from the loop and manual callers
    tick_lock: tokio::sync::Mutex<()>,
    handle: Mutex<Option<LoopHandle>>,
}

impl PolicyEngine {
    /// Create an engine over `registry`
    ///
    /// Without a commander, actions only update the device model.
    pub fn new(
        registry: Arc<DeviceRegistry>,
        commander: Option<Arc<dyn DeviceCommander>>,
        config: EngineConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        let rules = Arc::new(RuleStore::new(Arc::clone(&registry)));
        let executor = ActionExecutor::new(Arc::clone(&registry), commander, config.command_timeout);

        Self {
            registry,
            rules,
            executor,
            config,
            firing: DashMap::new(),
            device_status: DashMap::new(),
            event_tx,
            tick_lock: tokio::sync::Mutex::new(()),
            handle: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn rules(&self) -> &Arc<RuleStore> {
        &self.rules
    }

    /// Subscribe to engine events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PolicyEvent> {
        self.event_tx.subscribe()
    }

    /// Start the monitoring loop; returns false if it is already running
    pub fn start(self: &Arc<Self>, interval: Duration) -> bool {
        let Ok(mut handle) = self.handle.lock() else {
            tracing::error!("Policy engine loop handle poisoned");
            return false;
        };
        if handle.as_ref().is_some_and(|h| !h.task.is_finished()) {
            tracing::debug!("Policy engine already running");
            return false;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let engine = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        engine.tick_at(Local::now()).await;
                    }
                }
            }
            tracing::info!("Policy engine stopped");
        });

        *handle = Some(LoopHandle { shutdown, task });
        tracing::info!("Policy engine started (interval {:?})", interval);
        true
    }

    /// Stop the monitoring loop, waiting for an in-flight tick to finish
    pub async fn stop(&self) {
        let handle = match self.handle.lock() {
            Ok(mut handle) => handle.take(),
            Err(_) => {
                tracing::error!("Policy engine loop handle poisoned");
                return;
            }
        };
        let Some(LoopHandle { shutdown, task }) = handle else {
            return;
        };

        let _ = shutdown.send(true);
        if let Err(e) = task.await {
            tracing::error!("Policy engine loop ended abnormally: {}", e);
        }
    }

    #[must_use]
    pub fn state(&self) -> LoopState {
        match self.handle.lock() {
            Ok(handle) if handle.as_ref().is_some_and(|h| !h.task.is_finished()) => {
                LoopState::Running
            }
            _ => LoopState::Stopped,
        }
    }

    /// When the rule last fired
    #[must_use]
    pub fn last_fired_at(&self, rule_id: &str) -> Option<DateTime<Local>> {
        self.firing.get(rule_id).map(|r| r.last_fired_at)
    }

    /// The rule's most recent firing
    #[must_use]
    pub fn last_firing(&self, rule_id: &str) -> Option<FiringRecord> {
        self.firing.get(rule_id).map(|r| r.last.clone())
    }

    /// Outcome of the most recent action targeting the device
    #[must_use]
    pub fn last_command(&self, device_id: &str) -> Option<DeviceCommandStatus> {
        self.device_status.get(device_id).map(|r| r.value().clone())
    }

    /// Enable or disable a rule, resetting its cooldown on re-enable when configured
    ///
    /// Waits for an in-flight tick to finish.
    pub async fn set_rule_enabled(&self, rule_id: &str, enabled: bool) -> Result<(), PolicyError> {
        let _guard = self.tick_lock.lock().await;
        let previous = self.rules.set_enabled(rule_id, enabled)?;
        if enabled && !previous && self.config.reset_cooldown_on_enable {
            self.firing.remove(rule_id);
            tracing::debug!("Cooldown reset for re-enabled rule {}", rule_id);
        }
        Ok(())
    }

    /// Remove a rule together with its firing history
    ///
    /// Waits for an in-flight tick to finish.
    pub async fn remove_rule(&self, rule_id: &str) -> Result<PolicyRule, PolicyError> {
        let _guard = self.tick_lock.lock().await;
        let rule = self.rules.remove(rule_id)?;
        self.firing.remove(rule_id);
        Ok(rule)
    }

    /// Run one evaluation pass as of `now`
    pub async fn tick_at(&self, now: DateTime<Local>) -> TickReport {
        let _guard = self.tick_lock.lock().await;
        let mut report = TickReport::new(now);
        let mut claims = WriteClaims::new(self.config.conflict_policy);

        for rule in self.rules.list() {
            if !rule.enabled {
                continue;
            }
            report.evaluated += 1;

            let mut dispatch = Dispatch::default();
            let outcome =
                AssertUnwindSafe(self.process_rule(&rule, now, &mut claims, &mut dispatch))
                    .catch_unwind()
                    .await;

            match outcome {
                Ok(RuleOutcome::NotSatisfied) => {}
                Ok(RuleOutcome::CoolingDown) => report.satisfied += 1,
                Ok(RuleOutcome::Errored(error)) => {
                    report.failed += 1;
                    let _ = self.event_tx.send(PolicyEvent::RuleFailed {
                        rule_id: rule.id.clone(),
                        error,
                    });
                }
                Ok(RuleOutcome::Fired(record)) => {
                    report.satisfied += 1;
                    report.fired += 1;
                    if !record.succeeded() {
                        report.failed += 1;
                    }
                    let _ = self.event_tx.send(PolicyEvent::RuleFired(record.clone()));
                    report.firings.push(record);
                }
                Err(panic) => {
                    let error = panic_message(panic.as_ref());
                    tracing::error!("Rule {} faulted: {}", rule.id, error);
                    report.failed += 1;
                    if dispatch.started {
                        let record = self.record_firing(&rule, now, dispatch.reports);
                        report.satisfied += 1;
                        report.fired += 1;
                        report.firings.push(record);
                    }
                    let _ = self.event_tx.send(PolicyEvent::RuleFailed {
                        rule_id: rule.id.clone(),
                        error,
                    });
                }
            }
        }

        tracing::debug!(
            "Tick at {}: {} evaluated, {} satisfied, {} fired, {} failed",
            now.format("%H:%M:%S"),
            report.evaluated,
            report.satisfied,
            report.fired,
            report.failed
        );
        let _ = self.event_tx.send(PolicyEvent::TickCompleted(report.clone()));
        report
    }

    /// Evaluate one rule and dispatch its actions if it is due
    async fn process_rule(
        &self,
        rule: &PolicyRule,
        now: DateTime<Local>,
        claims: &mut WriteClaims,
        dispatch: &mut Dispatch,
    ) -> RuleOutcome {
        let snapshot = self.registry.snapshot_for(rule.condition_devices());

        match evaluator::evaluate_all(&rule.conditions, &snapshot, &now) {
            Ok(Check::Met) => {}
            Ok(Check::NotMet) => return RuleOutcome::NotSatisfied,
            Ok(check) => {
                tracing::debug!("Rule {} not satisfied: {:?}", rule.id, check);
                return RuleOutcome::NotSatisfied;
            }
            Err(e) => {
                tracing::warn!("Rule {} condition could not be evaluated: {}", rule.id, e);
                return RuleOutcome::Errored(e.to_string());
            }
        }

        if let Some(last) = self.last_fired_at(&rule.id) {
            let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
            if elapsed < rule.cooldown {
                tracing::debug!(
                    "Rule {} in cooldown ({:?} of {:?})",
                    rule.id,
                    elapsed,
                    rule.cooldown
                );
                return RuleOutcome::CoolingDown;
            }
        }

        tracing::info!("Rule '{}' fired", rule.name);
        dispatch.started = true;
        self.executor
            .execute_actions_into(&rule.id, &rule.actions, claims, &mut dispatch.reports)
            .await;

        RuleOutcome::Fired(self.record_firing(rule, now, std::mem::take(&mut dispatch.reports)))
    }

    /// Store the firing (starting the cooldown) and the per-device command outcomes
    fn record_firing(
        &self,
        rule: &PolicyRule,
        now: DateTime<Local>,
        actions: Vec<ActionReport>,
    ) -> FiringRecord {
        for report in &actions {
            if let (Some(device_id), ActionStatus::Applied | ActionStatus::Failed { .. }) =
                (&report.device_id, &report.status)
            {
                self.device_status.insert(
                    device_id.clone(),
                    DeviceCommandStatus {
                        rule_id: rule.id.clone(),
                        action_index: report.index,
                        at: now,
                        status: report.status.clone(),
                    },
                );
            }
        }

        let record = FiringRecord {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            fired_at: now,
            actions,
        };
        self.firing.insert(
            rule.id.clone(),
            RuleFiringRecord {
                last_fired_at: now,
                last: record.clone(),
            },
        );
        record
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}
