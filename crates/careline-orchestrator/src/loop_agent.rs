use crate::capabilities::{BriefStore, Notifier, ReferralLookup, UpdateNotification};
use crate::cards::object_schema;
use crate::change::assess;
use crate::dispatch::{ActionSet, AgentService, Dispatcher, TaskContext};
use crate::fanout::{FanOut, OutboundRequest};
use crate::monitor::MonitoringEngine;
use crate::registry::{AgentEndpoint, AgentRegistry};
use async_trait::async_trait;
use careline_core::events::{SummarizerInput, SummarizerOutput};
use careline_core::{
    from_payload, to_payload, AgentKind, CarelineError, CarelineResult, Monitor, Payload,
    RecordsUpdatedEvent, Referral, Response,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Actions accepted by the loop agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Re-summarize a patient's active referrals.
    ProcessRecordsUpdated,
    /// Register or replace a monitor.
    StartMonitoring,
    /// Remove a monitor.
    StopMonitoring,
    /// List monitors and loop state.
    GetMonitoringStatus,
}

impl ActionSet for LoopAction {
    const ALL: &'static [Self] = &[
        LoopAction::ProcessRecordsUpdated,
        LoopAction::StartMonitoring,
        LoopAction::StopMonitoring,
        LoopAction::GetMonitoringStatus,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            LoopAction::ProcessRecordsUpdated => "process_records_updated",
            LoopAction::StartMonitoring => "start_monitoring",
            LoopAction::StopMonitoring => "stop_monitoring",
            LoopAction::GetMonitoringStatus => "get_monitoring_status",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            LoopAction::ProcessRecordsUpdated => {
                "Re-summarize a patient's active referrals and notify on significant change"
            }
            LoopAction::StartMonitoring => "Begin periodic change checks for a patient or referral",
            LoopAction::StopMonitoring => "End monitoring for a patient or referral",
            LoopAction::GetMonitoringStatus => "List active monitors",
        }
    }

    fn input_schema(&self) -> Value {
        match self {
            LoopAction::ProcessRecordsUpdated => {
                object_schema(&["type", "patient_id"], &["referral_id", "timestamp"])
            }
            LoopAction::StartMonitoring => object_schema(
                &["patient_id"],
                &[
                    "referral_id",
                    "critical_thresholds",
                    "check_interval_minutes",
                    "check_interval_secs",
                ],
            ),
            LoopAction::StopMonitoring | LoopAction::GetMonitoringStatus => {
                object_schema(&[], &["referral_id", "patient_id"])
            }
        }
    }
}

/// Payload of `start_monitoring`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartMonitoringRequest {
    /// Required.
    #[serde(default)]
    pub patient_id: Option<String>,
    /// Monitor key when present.
    #[serde(default)]
    pub referral_id: Option<String>,
    /// Stored on the monitor as given.
    #[serde(default)]
    pub critical_thresholds: Payload,
    /// Check interval in minutes.
    #[serde(default)]
    pub check_interval_minutes: Option<u64>,
    /// Takes precedence over `check_interval_minutes`.
    #[serde(default)]
    pub check_interval_secs: Option<u64>,
}

impl StartMonitoringRequest {
    fn interval(&self) -> Option<Duration> {
        self.check_interval_secs
            .map(Duration::from_secs)
            .or_else(|| {
                self.check_interval_minutes
                    .map(|m| Duration::from_secs(m.saturating_mul(60)))
            })
    }
}

/// Identifies a monitor by referral id, falling back to patient id.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MonitorSelector {
    /// Preferred key.
    #[serde(default)]
    pub referral_id: Option<String>,
    /// Key when no referral id is given.
    #[serde(default)]
    pub patient_id: Option<String>,
}

impl MonitorSelector {
    fn key(&self) -> Option<String> {
        non_empty(&self.referral_id).or_else(|| non_empty(&self.patient_id))
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.clone().filter(|s| !s.is_empty())
}

/// Result of refreshing one referral.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferralUpdate {
    /// Referral refreshed.
    pub referral_id: String,
    /// Whether a new brief was produced.
    pub updated: bool,
    /// Set when updated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_significant_changes: Option<bool>,
    /// Set when not updated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReferralUpdate {
    fn refreshed(referral_id: &str, significant: bool) -> Self {
        Self {
            referral_id: referral_id.to_string(),
            updated: true,
            has_significant_changes: Some(significant),
            error: None,
        }
    }

    fn failed(referral_id: &str, error: impl Into<String>) -> Self {
        Self {
            referral_id: referral_id.to_string(),
            updated: false,
            has_significant_changes: None,
            error: Some(error.into()),
        }
    }
}

/// Outcome of one `process_records_updated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateBatch {
    /// Active referrals found.
    pub referrals_processed: usize,
    /// Referrals with a new brief.
    pub successful_updates: usize,
    /// Referrals whose brief changed significantly.
    pub significant_changes: usize,
    /// One entry per referral.
    pub results: Vec<ReferralUpdate>,
    /// Set when there was nothing to update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl UpdateBatch {
    fn from_results(results: Vec<ReferralUpdate>) -> Self {
        let successful_updates = results.iter().filter(|r| r.updated).count();
        let significant_changes = results
            .iter()
            .filter(|r| r.updated && r.has_significant_changes == Some(true))
            .count();
        Self {
            referrals_processed: results.len(),
            successful_updates,
            significant_changes,
            results,
            message: None,
        }
    }

    fn nothing_to_update() -> Self {
        Self {
            referrals_processed: 0,
            successful_updates: 0,
            significant_changes: 0,
            results: Vec::new(),
            message: Some("No active referrals to update".to_string()),
        }
    }
}

/// The loop agent: reacts to record changes and runs the monitoring engine.
pub struct LoopService {
    fanout: FanOut,
    engine: MonitoringEngine,
    referrals: Arc<dyn ReferralLookup>,
    briefs: Arc<dyn BriefStore>,
    notifier: Arc<dyn Notifier>,
}

impl LoopService {
    /// Loop agent over its collaborators.
    pub fn new(
        fanout: FanOut,
        engine: MonitoringEngine,
        referrals: Arc<dyn ReferralLookup>,
        briefs: Arc<dyn BriefStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            fanout,
            engine,
            referrals,
            briefs,
            notifier,
        }
    }

    /// The monitoring engine this agent controls.
    pub fn engine(&self) -> &MonitoringEngine {
        &self.engine
    }

    /// Wrap the service in a dispatcher and bind the monitoring engine's
    /// feedback path to it.
    pub fn into_dispatcher(self, registry: Arc<AgentRegistry>) -> Arc<Dispatcher<LoopService>> {
        let engine = self.engine.clone();
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(self), registry));
        let sink: Arc<dyn AgentEndpoint> = dispatcher.clone();
        engine.bind_sink(Arc::downgrade(&sink));
        dispatcher
    }

    /// Re-summarize every active referral of the patient, compare against the
    /// last brief and notify on significant change. One referral failing does
    /// not affect the others.
    pub async fn process_records_updated(
        &self,
        event: &RecordsUpdatedEvent,
        task_id: &str,
    ) -> CarelineResult<UpdateBatch> {
        info!(patient_id = %event.patient_id, "Processing records updated");

        let referrals = self.referrals.active_referrals(&event.patient_id).await?;
        if referrals.is_empty() {
            info!(patient_id = %event.patient_id, "No active referrals found");
            return Ok(UpdateBatch::nothing_to_update());
        }

        let mut requests = Vec::with_capacity(referrals.len());
        for referral in &referrals {
            let input = SummarizerInput {
                referral_id: referral.id.clone(),
                patient_id: event.patient_id.clone(),
                referral: referral.clone(),
                medical_record: None,
            };
            requests.push(
                OutboundRequest::new(AgentKind::Summarizer, "generate_summaries", to_payload(&input)?)
                    .correlated(task_id),
            );
        }
        let responses = self.fanout.send_all(requests).await;

        let mut results = Vec::with_capacity(referrals.len());
        for (referral, response) in referrals.iter().zip(responses) {
            let update = match self.refresh(referral, &event.patient_id, response).await {
                Ok(significant) => ReferralUpdate::refreshed(&referral.id, significant),
                Err(e) => {
                    error!(referral_id = %referral.id, error = %e, "Error updating referral");
                    ReferralUpdate::failed(&referral.id, failure_text(e))
                }
            };
            results.push(update);
        }

        let batch = UpdateBatch::from_results(results);
        info!(
            patient_id = %event.patient_id,
            updated = batch.successful_updates,
            significant = batch.significant_changes,
            "Referral summaries refreshed"
        );
        Ok(batch)
    }

    async fn refresh(
        &self,
        referral: &Referral,
        patient_id: &str,
        response: Response,
    ) -> CarelineResult<bool> {
        let previous = self.briefs.last_brief(&referral.id).await?;
        let summaries: SummarizerOutput = response.decode()?;
        let brief = summaries.clinician_brief;

        let assessment = assess(previous.as_ref(), &brief);
        if assessment.is_significant() {
            let notification = UpdateNotification::significant_update(&referral.id, patient_id);
            info!(referral_id = %referral.id, "Sending update notification");
            if let Err(e) = self.notifier.notify(&notification).await {
                warn!(referral_id = %referral.id, error = %e, "Notification delivery failed");
            }
        }

        if let Err(e) = self.briefs.save_brief(&brief).await {
            warn!(referral_id = %referral.id, error = %e, "Failed to store refreshed brief");
        }
        Ok(assessment.is_significant())
    }

    fn start_monitoring(&self, payload: &Payload) -> CarelineResult<Payload> {
        let request: StartMonitoringRequest = from_payload(payload)?;
        let patient_id = non_empty(&request.patient_id)
            .ok_or_else(|| CarelineError::validation("patient_id required"))?;
        let monitor = self.engine.start(
            patient_id,
            non_empty(&request.referral_id),
            request.critical_thresholds.clone(),
            request.interval(),
        )?;
        to_payload(&json!({
            "monitor_key": monitor.key,
            "message": format!("Monitoring started for {}", monitor.key),
            "monitor": monitor,
        }))
    }

    fn stop_monitoring(&self, payload: &Payload) -> CarelineResult<Payload> {
        let selector: MonitorSelector = from_payload(payload)?;
        let key = selector
            .key()
            .ok_or_else(|| CarelineError::validation("referral_id or patient_id required"))?;
        let stopped = self.engine.stop(&key).is_some();
        let message = if stopped {
            format!("Monitoring stopped for {key}")
        } else {
            format!("No active monitor for {key}")
        };
        to_payload(&json!({
            "monitor_key": key,
            "stopped": stopped,
            "message": message,
        }))
    }

    fn monitoring_status(&self, payload: &Payload) -> CarelineResult<Payload> {
        let selector: MonitorSelector = from_payload(payload)?;
        let monitors: Vec<Monitor> = match selector.key() {
            Some(key) => self.engine.get(&key).into_iter().collect(),
            None => self.engine.monitors(),
        };
        to_payload(&json!({
            "loop_running": self.engine.is_running(),
            "active_monitors": self.engine.len(),
            "monitors": monitors,
        }))
    }
}

fn failure_text(error: CarelineError) -> String {
    match error {
        CarelineError::PeerFailure(text) => text,
        other => other.to_string(),
    }
}

#[async_trait]
impl AgentService for LoopService {
    type Action = LoopAction;

    fn kind(&self) -> AgentKind {
        AgentKind::Loop
    }

    async fn handle(
        &self,
        action: LoopAction,
        payload: &Payload,
        ctx: &TaskContext,
    ) -> CarelineResult<Payload> {
        match action {
            LoopAction::ProcessRecordsUpdated => {
                let event = RecordsUpdatedEvent::from_payload(payload)?;
                let batch = self.process_records_updated(&event, &ctx.task_id).await?;
                to_payload(&batch)
            }
            LoopAction::StartMonitoring => self.start_monitoring(payload),
            LoopAction::StopMonitoring => self.stop_monitoring(payload),
            LoopAction::GetMonitoringStatus => self.monitoring_status(payload),
        }
    }
}
