use crate::capabilities::ChangeSignal;
use crate::dispatch::ActionSet;
use crate::loop_agent::LoopAction;
use crate::registry::AgentEndpoint;
use careline_core::{
    to_payload, AgentKind, CarelineError, CarelineResult, Message, Monitor, Payload,
    RecordsUpdatedEvent, DEFAULT_CHECK_INTERVAL_SECS,
};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Timing of the monitoring loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitoringConfig {
    /// Sleep between two passes over the registry.
    pub tick: Duration,
    /// Check interval for monitors that do not specify one.
    pub check_interval: Duration,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(60),
            check_interval: Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECS),
        }
    }
}

/// Outcome of one pass over the due monitors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollReport {
    /// Monitors that were due.
    pub checked: usize,
    /// Checks that fed a change back.
    pub triggered: usize,
    /// Checks that errored or panicked.
    pub failed: usize,
}

struct MonitorTable {
    monitors: HashMap<String, Monitor>,
    loop_running: bool,
}

struct EngineInner {
    table: Mutex<MonitorTable>,
    config: MonitoringConfig,
    signal: Arc<dyn ChangeSignal>,
    sink: OnceLock<Weak<dyn AgentEndpoint>>,
}

/// Registry of active monitors plus the background loop that checks them.
///
/// At most one polling loop runs per engine. It starts with the first
/// monitor and exits on its own once the registry is empty; the running flag
/// and the registry share one lock so a concurrent start can never observe a
/// loop that is about to exit.
#[derive(Clone)]
pub struct MonitoringEngine {
    inner: Arc<EngineInner>,
}

impl MonitoringEngine {
    /// Engine with no monitors and no loop running.
    pub fn new(config: MonitoringConfig, signal: Arc<dyn ChangeSignal>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                table: Mutex::new(MonitorTable {
                    monitors: HashMap::new(),
                    loop_running: false,
                }),
                config,
                signal,
                sink: OnceLock::new(),
            }),
        }
    }

    /// Loop timing.
    pub fn config(&self) -> MonitoringConfig {
        self.inner.config
    }

    /// Attach the endpoint that receives `process_records_updated` when a
    /// check fires. Only the first binding takes effect.
    pub fn bind_sink(&self, sink: Weak<dyn AgentEndpoint>) -> bool {
        self.inner.sink.set(sink).is_ok()
    }

    /// Register (or replace) a monitor and make sure the loop is running.
    /// Must be called from within a Tokio runtime.
    pub fn start(
        &self,
        patient_id: impl Into<String>,
        referral_id: Option<String>,
        critical_thresholds: Payload,
        check_interval: Option<Duration>,
    ) -> CarelineResult<Monitor> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| CarelineError::Monitor(format!("no async runtime: {e}")))?;
        let interval = check_interval.unwrap_or(self.inner.config.check_interval);
        let monitor = Monitor::new(
            patient_id,
            referral_id,
            interval.as_secs(),
            critical_thresholds,
        );

        let spawn_loop = {
            let mut table = self.inner.table.lock();
            if table
                .monitors
                .insert(monitor.key.clone(), monitor.clone())
                .is_some()
            {
                debug!(monitor = %monitor.key, "Replaced existing monitor");
            }
            !std::mem::replace(&mut table.loop_running, true)
        };

        if spawn_loop {
            runtime.spawn(polling_loop(self.inner.clone()));
        }

        info!(
            monitor = %monitor.key,
            patient_id = %monitor.patient_id,
            interval_secs = monitor.check_interval_secs,
            "Started monitoring"
        );
        Ok(monitor)
    }

    /// Remove a monitor. Returns it if it was registered.
    pub fn stop(&self, key: &str) -> Option<Monitor> {
        let removed = self.inner.table.lock().monitors.remove(key);
        match &removed {
            Some(_) => info!(monitor = %key, "Stopped monitoring"),
            None => debug!(monitor = %key, "Stop requested for unknown monitor"),
        }
        removed
    }

    /// Monitor by key.
    pub fn get(&self, key: &str) -> Option<Monitor> {
        self.inner.table.lock().monitors.get(key).cloned()
    }

    /// Snapshot of all monitors, ordered by key.
    pub fn monitors(&self) -> Vec<Monitor> {
        let mut monitors: Vec<Monitor> =
            self.inner.table.lock().monitors.values().cloned().collect();
        monitors.sort_by(|a, b| a.key.cmp(&b.key));
        monitors
    }

    /// Number of registered monitors.
    pub fn len(&self) -> usize {
        self.inner.table.lock().monitors.len()
    }

    /// Whether no monitor is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the background loop is alive.
    pub fn is_running(&self) -> bool {
        self.inner.table.lock().loop_running
    }

    /// Run one pass over the due monitors right now, outside the loop.
    pub async fn poll_now(&self) -> PollReport {
        run_due_checks(&self.inner).await
    }
}

impl EngineInner {
    fn is_registered(&self, key: &str) -> bool {
        self.table.lock().monitors.contains_key(key)
    }

    /// Stamp a check time, unless the monitor was removed meanwhile or was
    /// replaced by a start after `at`.
    fn mark_checked(&self, key: &str, at: chrono::DateTime<Utc>) {
        if let Some(monitor) = self.table.lock().monitors.get_mut(key) {
            if monitor.last_check_at <= at {
                monitor.last_check_at = at;
            }
        }
    }

    /// Ask the change signal about one monitor and, when it reports new data,
    /// feed a records-updated event back through the agent's own dispatch.
    async fn check(&self, monitor: &Monitor) -> CarelineResult<bool> {
        if !self.signal.has_new_data(monitor).await? {
            debug!(monitor = %monitor.key, "No new data");
            return Ok(false);
        }

        info!(
            monitor = %monitor.key,
            patient_id = %monitor.patient_id,
            "Detected potential record update"
        );

        let sink = self
            .sink
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| CarelineError::Monitor("no dispatch endpoint bound".into()))?;
        let event = RecordsUpdatedEvent::new(monitor.patient_id.clone(), monitor.referral_id.clone());
        let message = Message::new(
            AgentKind::Loop.agent_name(),
            AgentKind::Loop,
            LoopAction::ProcessRecordsUpdated.as_str(),
            to_payload(&event)?,
        )?;

        let response = sink.call(message).await?;
        match response.error() {
            Some(err) => Err(CarelineError::Monitor(format!(
                "records update for {} failed: {err}",
                monitor.key
            ))),
            None => Ok(true),
        }
    }
}

async fn run_due_checks(inner: &Arc<EngineInner>) -> PollReport {
    let now = Utc::now();
    let due: Vec<Monitor> = {
        let table = inner.table.lock();
        table
            .monitors
            .values()
            .filter(|m| m.is_due(now))
            .cloned()
            .collect()
    };

    let mut report = PollReport::default();
    for monitor in due {
        let key = monitor.key.clone();
        // stopped while earlier checks in this pass were running
        if !inner.is_registered(&key) {
            continue;
        }
        report.checked += 1;

        let worker = inner.clone();
        let outcome = tokio::spawn(async move { worker.check(&monitor).await }).await;
        match outcome {
            Ok(Ok(true)) => report.triggered += 1,
            Ok(Ok(false)) => {}
            Ok(Err(e)) => {
                report.failed += 1;
                warn!(monitor = %key, error = %e, "Monitor check failed");
            }
            Err(e) => {
                report.failed += 1;
                error!(monitor = %key, error = %e, "Monitor check aborted");
            }
        }
        inner.mark_checked(&key, now);
    }
    report
}

/// Clears the running flag if the loop task dies without reaching its
/// normal exit (panic or runtime shutdown).
struct LoopGuard {
    inner: Arc<EngineInner>,
    armed: bool,
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        if self.armed {
            self.inner.table.lock().loop_running = false;
        }
    }
}

async fn polling_loop(inner: Arc<EngineInner>) {
    let mut guard = LoopGuard {
        inner: inner.clone(),
        armed: true,
    };
    info!(tick_ms = inner.config.tick.as_millis() as u64, "Monitoring loop started");

    loop {
        {
            let mut table = inner.table.lock();
            if table.monitors.is_empty() {
                table.loop_running = false;
                guard.armed = false;
                info!("Monitoring loop stopped: no active monitors");
                return;
            }
        }

        let report = run_due_checks(&inner).await;
        if report.checked > 0 {
            debug!(
                checked = report.checked,
                triggered = report.triggered,
                failed = report.failed,
                "Monitoring pass complete"
            );
        }

        tokio::time::sleep(inner.config.tick).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Never;

    #[async_trait]
    impl ChangeSignal for Never {
        async fn has_new_data(&self, _monitor: &Monitor) -> CarelineResult<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_check_stamp_never_moves_backwards() {
        let engine = MonitoringEngine::new(MonitoringConfig::default(), Arc::new(Never));
        let pass_started = Utc::now() - chrono::Duration::seconds(5);
        let restarted = engine.start("p1", Some("r1".into()), Payload::new(), None).unwrap();

        engine.inner.mark_checked("r1", pass_started);
        assert_eq!(engine.get("r1").unwrap().last_check_at, restarted.last_check_at);

        let later = restarted.last_check_at + chrono::Duration::seconds(1);
        engine.inner.mark_checked("r1", later);
        assert_eq!(engine.get("r1").unwrap().last_check_at, later);

        engine.inner.mark_checked("gone", later);
        assert!(engine.get("gone").is_none());
        engine.stop("r1");
    }

    #[tokio::test]
    async fn test_huge_interval_is_not_checked() {
        let engine = MonitoringEngine::new(MonitoringConfig::default(), Arc::new(Never));
        engine
            .start("p1", None, Payload::new(), Some(Duration::from_secs(u64::MAX)))
            .unwrap();
        assert_eq!(engine.poll_now().await.checked, 0);
        engine.stop("p1");
    }
}
