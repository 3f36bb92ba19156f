//! Health, resource and alert orchestration.
//!
//! A [`MonitoringSystem`] owns a registry of async [`HealthCheck`]s,
//! periodic [`ResourceMonitor`]s and rule-based alerting ([`AlertRule`]),
//! plus timestamped [`ApplicationState`] tracking. One
//! [`tick`](MonitoringSystem::tick) runs every enabled health check in
//! parallel (each under its own timeout), collects due resource samples and
//! evaluates every alert rule against the latest values;
//! [`spawn`](MonitoringSystem::spawn) drives ticks on an interval.
//!
//! User callbacks (checks, collectors, alert/health hooks) can fail freely:
//! failures are recorded — as `Unhealthy` results or skipped samples — and
//! never abort the loop.
//!
//! ```
//! use aspects::monitoring::{HealthStatus, HealthCheck, MonitoringSystem};
//!
//! # async fn demo() {
//! let monitoring = MonitoringSystem::new();
//!
//! monitoring
//!     .register_health_check(HealthCheck::new("db", || async {
//!         Ok(HealthStatus::Healthy)
//!     }))
//!     .unwrap();
//!
//! monitoring.tick().await;
//! assert_eq!(
//!     monitoring.health_results()["db"].status,
//!     HealthStatus::Healthy
//! );
//! # }
//! ```

mod alert;
mod health;
mod resource;
mod state;

pub use alert::{Alert, AlertCondition, AlertRule, AlertSeverity, CmpOp};
pub use health::{HealthCheck, HealthCheckResult, HealthStatus, DEFAULT_CHECK_TIMEOUT};
pub use resource::{ResourceKind, ResourceMonitor, ResourceSample, DEFAULT_SAMPLE_WINDOW};
pub use state::{ApplicationState, StateTransition, DEFAULT_STATE_HISTORY};

use crate::util::Ring;
use alert::RuleState;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use slog::{o, Discard, Logger};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Number of alerts retained in history.
const ALERT_HISTORY: usize = 256;

/// Number of recent alerts included in a dashboard snapshot.
const DASHBOARD_ALERT_LIMIT: usize = 50;

/// Errors produced by monitoring registration and persistence.
#[derive(Debug, thiserror::Error)]
pub enum MonitoringError {
    /// A health check, monitor or rule with this name already exists.
    #[error("`{0}` is already registered")]
    DuplicateName(String),

    /// A persisted state blob could not be restored; nothing was changed.
    #[error("malformed monitoring state: {0}")]
    MalformedState(#[source] serde_json::Error),
}

type AlertHook = Arc<dyn Fn(&Alert) + Send + Sync>;
type HealthHook = Arc<dyn Fn(&str, &HealthCheckResult) + Send + Sync>;

struct MonitoringInner {
    checks: RwLock<Vec<HealthCheck>>,
    disabled_checks: Mutex<HashSet<String>>,
    health_results: Mutex<HashMap<String, HealthCheckResult>>,
    monitors: RwLock<Vec<ResourceMonitor>>,
    samples: Mutex<HashMap<String, Ring<ResourceSample>>>,
    rules: Mutex<Vec<(AlertRule, RuleState)>>,
    custom_metrics: Mutex<HashMap<String, f64>>,
    alert_history: Mutex<Ring<Alert>>,
    app_state: ApplicationState,
    on_alert: RwLock<Option<AlertHook>>,
    on_health: RwLock<Option<HealthHook>>,
    log: RwLock<Logger>,
}

/// Orchestrates health checks, resource collection, alert evaluation and
/// application state.
///
/// Cloning yields another handle over the same state.
#[derive(Clone)]
pub struct MonitoringSystem {
    inner: Arc<MonitoringInner>,
}

impl Default for MonitoringSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitoringSystem {
    /// Creates an empty monitoring system.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MonitoringInner {
                checks: RwLock::new(Vec::new()),
                disabled_checks: Mutex::new(HashSet::new()),
                health_results: Mutex::new(HashMap::new()),
                monitors: RwLock::new(Vec::new()),
                samples: Mutex::new(HashMap::new()),
                rules: Mutex::new(Vec::new()),
                custom_metrics: Mutex::new(HashMap::new()),
                alert_history: Mutex::new(Ring::new(ALERT_HISTORY)),
                app_state: ApplicationState::default(),
                on_alert: RwLock::new(None),
                on_health: RwLock::new(None),
                log: RwLock::new(Logger::root(Discard, o!())),
            }),
        }
    }

    /// Replaces the logger used for loop diagnostics.
    pub fn set_logger(&self, logger: Logger) {
        *self.inner.log.write() = logger;
    }

    /// Registers a health check. Names must be unique.
    pub fn register_health_check(&self, check: HealthCheck) -> Result<(), MonitoringError> {
        let mut checks = self.inner.checks.write();

        if checks.iter().any(|c| c.name() == check.name()) {
            return Err(MonitoringError::DuplicateName(check.name().to_owned()));
        }

        checks.push(check);

        Ok(())
    }

    /// Registers a resource monitor. Names must be unique.
    pub fn register_resource_monitor(
        &self,
        monitor: ResourceMonitor,
    ) -> Result<(), MonitoringError> {
        let mut monitors = self.inner.monitors.write();

        if monitors.iter().any(|m| m.name() == monitor.name()) {
            return Err(MonitoringError::DuplicateName(monitor.name().to_owned()));
        }

        monitors.push(monitor);

        Ok(())
    }

    /// Adds an alert rule. Names must be unique.
    pub fn add_alert_rule(&self, rule: AlertRule) -> Result<(), MonitoringError> {
        let mut rules = self.inner.rules.lock();

        if rules.iter().any(|(r, _)| r.name == rule.name) {
            return Err(MonitoringError::DuplicateName(rule.name.clone()));
        }

        rules.push((rule, RuleState::default()));

        Ok(())
    }

    /// Enables or disables one health check for the periodic loop.
    ///
    /// Disabled checks keep their last result and can still be run on
    /// demand with [`run_health_check`](MonitoringSystem::run_health_check).
    pub fn set_health_check_enabled(&self, name: &str, enabled: bool) {
        let mut disabled = self.inner.disabled_checks.lock();

        if enabled {
            disabled.remove(name);
        } else {
            disabled.insert(name.to_owned());
        }
    }

    /// Sets a custom metric value, visible to alert conditions.
    pub fn set_custom_metric(&self, name: impl Into<String>, value: f64) {
        self.inner.custom_metrics.lock().insert(name.into(), value);
    }

    /// The latest value of a custom metric.
    pub fn custom_metric(&self, name: &str) -> Option<f64> {
        self.inner.custom_metrics.lock().get(name).copied()
    }

    /// Installs the alert callback, replacing any previous one.
    pub fn on_alert(&self, hook: impl Fn(&Alert) + Send + Sync + 'static) {
        *self.inner.on_alert.write() = Some(Arc::new(hook));
    }

    /// Installs the health completion callback, replacing any previous one.
    pub fn on_health_change(
        &self,
        hook: impl Fn(&str, &HealthCheckResult) + Send + Sync + 'static,
    ) {
        *self.inner.on_health.write() = Some(Arc::new(hook));
    }

    /// The application state table.
    pub fn state(&self) -> &ApplicationState {
        &self.inner.app_state
    }

    /// Runs one monitoring round: all health checks in parallel, due
    /// resource collections, then alert evaluation against the latest
    /// values.
    pub async fn tick(&self) {
        self.run_health_checks().await;
        self.collect_resources();
        self.evaluate_alerts_at(Instant::now());
    }

    /// Spawns a tokio task ticking every `interval` until aborted.
    pub fn spawn(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let system = self.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                system.tick().await;
            }
        })
    }

    /// Runs one named health check on demand, recording its result.
    pub async fn run_health_check(&self, name: &str) -> Option<HealthCheckResult> {
        let check = self
            .inner
            .checks
            .read()
            .iter()
            .find(|c| c.name() == name)
            .cloned()?;
        let result = check.execute().await;

        self.store_health_result(check.name(), result.clone());

        Some(result)
    }

    /// Latest result per health check.
    pub fn health_results(&self) -> BTreeMap<String, HealthCheckResult> {
        self.inner
            .health_results
            .lock()
            .iter()
            .map(|(name, result)| (name.clone(), result.clone()))
            .collect()
    }

    /// Latest status of one health check, `Unknown` before its first run.
    pub fn health_status(&self, name: &str) -> HealthStatus {
        self.inner
            .health_results
            .lock()
            .get(name)
            .map_or(HealthStatus::Unknown, |result| result.status)
    }

    /// The most recent sample of one resource monitor.
    pub fn latest_sample(&self, name: &str) -> Option<ResourceSample> {
        self.inner
            .samples
            .lock()
            .get(name)
            .and_then(|ring| ring.back())
            .copied()
    }

    /// The retained sample window of one resource monitor, oldest first.
    pub fn samples(&self, name: &str) -> Vec<ResourceSample> {
        self.inner
            .samples
            .lock()
            .get(name)
            .map(|ring| ring.iter().copied().collect())
            .unwrap_or_default()
    }

    /// The most recent alerts, oldest first, up to `limit`.
    pub fn alerts(&self, limit: usize) -> Vec<Alert> {
        let history = self.inner.alert_history.lock();
        let all: Vec<Alert> = history.iter().cloned().collect();
        let start = all.len().saturating_sub(limit);

        all[start..].to_vec()
    }

    /// Builds a serializable snapshot for dashboards.
    pub fn dashboard(&self) -> DashboardSnapshot {
        let resources = {
            let samples = self.inner.samples.lock();

            samples
                .iter()
                .filter_map(|(name, ring)| ring.back().map(|s| (name.clone(), *s)))
                .collect()
        };

        DashboardSnapshot {
            generated_at: Utc::now(),
            health: self.health_results(),
            resources,
            alerts: self.alerts(DASHBOARD_ALERT_LIMIT),
            states: self.inner.app_state.all_states(),
        }
    }

    /// Captures rules, custom metrics, application state and the
    /// definitions (names, intervals, thresholds — not the callbacks) of
    /// registered checks and monitors.
    pub fn save_state(&self) -> serde_json::Value {
        let saved = SavedState {
            rules: self
                .inner
                .rules
                .lock()
                .iter()
                .map(|(rule, _)| rule.clone())
                .collect(),
            custom_metrics: self
                .inner
                .custom_metrics
                .lock()
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            states: self.inner.app_state.export(),
            health_checks: self
                .inner
                .checks
                .read()
                .iter()
                .map(|check| SavedCheckDef {
                    name: check.name().to_owned(),
                    description: check.description().to_owned(),
                    timeout: check.timeout(),
                })
                .collect(),
            resource_monitors: self
                .inner
                .monitors
                .read()
                .iter()
                .map(|monitor| SavedMonitorDef {
                    name: monitor.name().to_owned(),
                    kind: monitor.kind(),
                    interval: monitor.interval(),
                    threshold: monitor.threshold(),
                })
                .collect(),
        };

        serde_json::to_value(saved).expect("state serialization is infallible")
    }

    /// Restores rules, custom metrics and application state from a
    /// [`save_state`](MonitoringSystem::save_state) blob.
    ///
    /// Health check and monitor definitions in the blob are descriptive:
    /// their callbacks cannot be persisted, so they must be re-registered by
    /// the application.
    pub fn load_state(&self, value: serde_json::Value) -> Result<(), MonitoringError> {
        let saved: SavedState =
            serde_json::from_value(value).map_err(MonitoringError::MalformedState)?;

        {
            let mut rules = self.inner.rules.lock();

            rules.clear();

            for rule in saved.rules {
                rules.push((rule, RuleState::default()));
            }
        }

        {
            let mut custom = self.inner.custom_metrics.lock();

            custom.clear();
            custom.extend(saved.custom_metrics);
        }

        self.inner.app_state.import(saved.states);

        Ok(())
    }

    async fn run_health_checks(&self) {
        let checks: Vec<HealthCheck> = {
            let disabled = self.inner.disabled_checks.lock();

            self.inner
                .checks
                .read()
                .iter()
                .filter(|check| !disabled.contains(check.name()))
                .cloned()
                .collect()
        };

        if checks.is_empty() {
            return;
        }

        let results =
            futures_util::future::join_all(checks.iter().map(|check| check.execute())).await;

        for (check, result) in checks.iter().zip(results) {
            self.store_health_result(check.name(), result);
        }
    }

    fn store_health_result(&self, name: &str, result: HealthCheckResult) {
        if result.status != HealthStatus::Healthy {
            slog::warn!(self.inner.log.read(), "health check is not healthy";
                "check" => name, "status" => ?result.status);
        }

        self.inner
            .health_results
            .lock()
            .insert(name.to_owned(), result.clone());

        let hook = self.inner.on_health.read().clone();

        if let Some(hook) = hook {
            hook(name, &result);
        }
    }

    fn collect_resources(&self) {
        let monitors: Vec<ResourceMonitor> = self.inner.monitors.read().clone();
        let now = Utc::now();

        for monitor in monitors {
            if !self.is_collection_due(&monitor, now) {
                continue;
            }

            match monitor.collect() {
                Ok(sample) => {
                    self.inner
                        .samples
                        .lock()
                        .entry(monitor.name().to_owned())
                        .or_insert_with(|| Ring::new(DEFAULT_SAMPLE_WINDOW))
                        .push(sample);
                }
                Err(error) => {
                    // Skipped sample; the previous one stays authoritative.
                    slog::warn!(self.inner.log.read(), "resource collection failed";
                        "monitor" => monitor.name(), "error" => %error);
                }
            }
        }
    }

    fn is_collection_due(&self, monitor: &ResourceMonitor, now: DateTime<Utc>) -> bool {
        let samples = self.inner.samples.lock();
        let Some(last) = samples.get(monitor.name()).and_then(|ring| ring.back()) else {
            return true;
        };
        let Ok(interval) = chrono::Duration::from_std(monitor.interval()) else {
            return false;
        };

        now - last.collected_at >= interval
    }

    fn evaluate_alerts_at(&self, now: Instant) {
        let mut fired = Vec::new();

        {
            let samples = self.inner.samples.lock();
            let custom = self.inner.custom_metrics.lock();
            let mut rules = self.inner.rules.lock();

            for (rule, rule_state) in rules.iter_mut() {
                let value = samples
                    .get(&rule.condition.metric)
                    .and_then(|ring| ring.back())
                    .map(|sample| sample.value)
                    .or_else(|| custom.get(&rule.condition.metric).copied());
                // A rule whose metric has no value yet is skipped.
                let Some(value) = value else { continue };

                if let Some(alert) = rule_state.observe(rule, value, now) {
                    fired.push(alert);
                }
            }
        }

        if fired.is_empty() {
            return;
        }

        let hook = self.inner.on_alert.read().clone();

        for alert in fired {
            slog::info!(self.inner.log.read(), "alert fired";
                "rule" => %alert.rule, "severity" => ?alert.severity);
            self.inner.alert_history.lock().push(alert.clone());

            if let Some(hook) = &hook {
                hook(&alert);
            }
        }
    }

    #[cfg(test)]
    fn evaluate_alerts_for_test(&self, now: Instant) {
        self.evaluate_alerts_at(now);
    }
}

/// Serializable dashboard view of the whole system.
#[derive(Clone, Debug, Serialize)]
pub struct DashboardSnapshot {
    /// When the snapshot was generated.
    pub generated_at: DateTime<Utc>,
    /// Latest result per health check.
    pub health: BTreeMap<String, HealthCheckResult>,
    /// Latest sample per resource monitor.
    pub resources: BTreeMap<String, ResourceSample>,
    /// Most recent alerts, oldest first.
    pub alerts: Vec<Alert>,
    /// Current application states.
    pub states: BTreeMap<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize)]
struct SavedState {
    rules: Vec<AlertRule>,
    custom_metrics: BTreeMap<String, f64>,
    states: BTreeMap<String, Vec<StateTransition>>,
    health_checks: Vec<SavedCheckDef>,
    resource_monitors: Vec<SavedMonitorDef>,
}

#[derive(Serialize, Deserialize)]
struct SavedCheckDef {
    name: String,
    description: String,
    timeout: Duration,
}

#[derive(Serialize, Deserialize)]
struct SavedMonitorDef {
    name: String,
    kind: ResourceKind,
    interval: Duration,
    threshold: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn tick_runs_checks_and_collectors() {
        let monitoring = MonitoringSystem::new();
        let collections = Arc::new(AtomicUsize::new(0));

        monitoring
            .register_health_check(HealthCheck::new("ok", || async {
                Ok(HealthStatus::Healthy)
            }))
            .unwrap();

        {
            let collections = Arc::clone(&collections);

            monitoring
                .register_resource_monitor(ResourceMonitor::new(
                    "cpu",
                    ResourceKind::Cpu,
                    Duration::from_secs(3600),
                    move || {
                        collections.fetch_add(1, Ordering::SeqCst);
                        Ok(55.0)
                    },
                ))
                .unwrap();
        }

        monitoring.tick().await;
        monitoring.tick().await;

        assert_eq!(monitoring.health_status("ok"), HealthStatus::Healthy);
        assert_eq!(monitoring.latest_sample("cpu").unwrap().value, 55.0);
        // The hour-long interval means the second tick skips collection.
        assert_eq!(collections.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_collector_never_kills_the_loop() {
        let monitoring = MonitoringSystem::new();

        monitoring
            .register_resource_monitor(ResourceMonitor::new(
                "flaky",
                ResourceKind::Custom,
                Duration::from_millis(0),
                || Err("sensor offline".into()),
            ))
            .unwrap();

        monitoring.tick().await;
        monitoring.tick().await;

        assert!(monitoring.latest_sample("flaky").is_none());
    }

    #[tokio::test]
    async fn disabled_checks_are_skipped_by_the_loop() {
        let monitoring = MonitoringSystem::new();
        let runs = Arc::new(AtomicUsize::new(0));

        {
            let runs = Arc::clone(&runs);

            monitoring
                .register_health_check(HealthCheck::new("toggled", move || {
                    let runs = Arc::clone(&runs);

                    async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        Ok(HealthStatus::Healthy)
                    }
                }))
                .unwrap();
        }

        monitoring.tick().await;
        monitoring.set_health_check_enabled("toggled", false);
        monitoring.tick().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // On-demand execution still works while disabled.
        monitoring.run_health_check("toggled").await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        monitoring.set_health_check_enabled("toggled", true);
        monitoring.tick().await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn duplicate_registrations_are_rejected() {
        let monitoring = MonitoringSystem::new();

        monitoring
            .add_alert_rule(AlertRule::new(
                "r",
                AlertSeverity::Info,
                "m",
                CmpOp::Gt,
                1.0,
            ))
            .unwrap();

        assert!(matches!(
            monitoring.add_alert_rule(AlertRule::new(
                "r",
                AlertSeverity::Info,
                "m",
                CmpOp::Gt,
                2.0
            )),
            Err(MonitoringError::DuplicateName(_))
        ));
    }

    #[test]
    fn alerts_fire_from_custom_metrics() {
        let monitoring = MonitoringSystem::new();
        let fired = Arc::new(AtomicUsize::new(0));

        {
            let fired = Arc::clone(&fired);

            monitoring.on_alert(move |_| {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        monitoring
            .add_alert_rule(AlertRule::new(
                "queue_backlog",
                AlertSeverity::Critical,
                "queue_depth",
                CmpOp::Ge,
                100.0,
            ))
            .unwrap();

        let t0 = Instant::now();

        monitoring.set_custom_metric("queue_depth", 50.0);
        monitoring.evaluate_alerts_for_test(t0);
        monitoring.set_custom_metric("queue_depth", 150.0);
        monitoring.evaluate_alerts_for_test(t0 + Duration::from_secs(1));
        // Still true: suppressed until a false observation.
        monitoring.evaluate_alerts_for_test(t0 + Duration::from_secs(2));

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(monitoring.alerts(10).len(), 1);
        assert_eq!(monitoring.alerts(10)[0].rule, "queue_backlog");
    }

    #[tokio::test]
    async fn dashboard_gathers_everything() {
        let monitoring = MonitoringSystem::new();

        monitoring
            .register_health_check(HealthCheck::new("db", || async {
                Ok(HealthStatus::Degraded)
            }))
            .unwrap();
        monitoring
            .register_resource_monitor(ResourceMonitor::new(
                "mem",
                ResourceKind::Memory,
                Duration::from_millis(0),
                || Ok(70.0),
            ))
            .unwrap();
        monitoring.state().set_state("phase", json!("serving"));
        monitoring.tick().await;

        let dashboard = monitoring.dashboard();

        assert_eq!(dashboard.health["db"].status, HealthStatus::Degraded);
        assert_eq!(dashboard.resources["mem"].value, 70.0);
        assert_eq!(dashboard.states["phase"], json!("serving"));

        // The snapshot serializes cleanly for transport.
        let json = serde_json::to_value(&dashboard).unwrap();

        assert!(json.get("generated_at").is_some());
    }

    #[test]
    fn save_load_round_trips_rules_and_state() {
        let monitoring = MonitoringSystem::new();

        monitoring
            .add_alert_rule(
                AlertRule::new("cpu_high", AlertSeverity::Warning, "cpu", CmpOp::Gt, 80.0)
                    .sustained_for(Duration::from_secs(2)),
            )
            .unwrap();
        monitoring.set_custom_metric("cpu", 10.0);
        monitoring.state().set_state("phase", json!("serving"));

        let blob = monitoring.save_state();
        let restored = MonitoringSystem::new();

        restored.load_state(blob).unwrap();

        assert_eq!(restored.custom_metric("cpu"), Some(10.0));
        assert_eq!(restored.state().get_state("phase"), Some(json!("serving")));

        // The restored rule is live: drive it over the threshold.
        let t0 = Instant::now();

        restored.set_custom_metric("cpu", 90.0);
        restored.evaluate_alerts_for_test(t0);
        restored.evaluate_alerts_for_test(t0 + Duration::from_secs(3));

        assert_eq!(restored.alerts(10).len(), 1);
    }

    #[test]
    fn malformed_state_is_rejected() {
        let monitoring = MonitoringSystem::new();

        assert!(matches!(
            monitoring.load_state(json!({"rules": 42})),
            Err(MonitoringError::MalformedState(_))
        ));
    }
}
