use crate::cards::object_schema;
use crate::dispatch::{ActionSet, AgentService, TaskContext};
use crate::fanout::{FanOut, OutboundRequest};
use async_trait::async_trait;
use careline_core::events::{
    AvailabilityInput, AvailabilityOutput, CostInput, CostOutput, DirectoryInput, DirectoryOutput,
    RecordsInput, RecordsOutput, SummarizerInput, SummarizerOutput,
};
use careline_core::models::{AvailabilitySlot, CostEstimate, MedicalRecord, Provider};
use careline_core::{
    to_payload, AgentKind, CarelineError, CarelineResult, DecisionCard, Payload,
    ReferralCreatedEvent, Response, TaskStatus,
};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::time::Instant;
use tracing::{info, warn};

/// Actions accepted by the orchestrator agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorAction {
    /// Run the saga for a `referral.created` event.
    ProcessReferralCreated,
    /// Report the latest run for a referral.
    GetOrchestrationStatus,
}

impl ActionSet for OrchestratorAction {
    const ALL: &'static [Self] = &[
        OrchestratorAction::ProcessReferralCreated,
        OrchestratorAction::GetOrchestrationStatus,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            OrchestratorAction::ProcessReferralCreated => "process_referral_created",
            OrchestratorAction::GetOrchestrationStatus => "get_orchestration_status",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            OrchestratorAction::ProcessReferralCreated => {
                "Run the referral workflow and return a decision card"
            }
            OrchestratorAction::GetOrchestrationStatus => {
                "Report the latest orchestration run for a referral"
            }
        }
    }

    fn input_schema(&self) -> Value {
        match self {
            OrchestratorAction::ProcessReferralCreated => object_schema(
                &["type", "referral_id", "patient_id", "specialty"],
                &["timestamp", "referral"],
            ),
            OrchestratorAction::GetOrchestrationStatus => object_schema(&["referral_id"], &[]),
        }
    }
}

/// Where an orchestration run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Waiting on directory and records.
    Gathering,
    /// Waiting on availability, cost and summaries.
    Enriching,
    /// Building the decision card.
    Aggregating,
    /// Card built.
    Done,
    /// Gathering failed.
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::Gathering => "gathering",
            RunPhase::Enriching => "enriching",
            RunPhase::Aggregating => "aggregating",
            RunPhase::Done => "done",
            RunPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Results every run must obtain before enrichment can start.
#[derive(Debug, Clone)]
pub struct GatheredInputs {
    /// Directory result.
    pub providers: Vec<Provider>,
    /// Records result.
    pub medical_record: MedicalRecord,
}

/// Results of the enrichment phase; `None` marks a worker that failed.
#[derive(Debug, Clone, Default)]
pub struct Enrichment {
    /// `None` when the availability agent failed.
    pub availability: Option<Vec<AvailabilitySlot>>,
    /// `None` when the cost agent failed.
    pub cost_estimates: Option<Vec<CostEstimate>>,
    /// `None` when the summarizer failed.
    pub summaries: Option<SummarizerOutput>,
}

impl Enrichment {
    /// Which enrichment workers answered.
    pub fn successes(&self) -> EnrichmentSuccesses {
        EnrichmentSuccesses {
            availability: self.availability.is_some(),
            cost: self.cost_estimates.is_some(),
            summarizer: self.summaries.is_some(),
        }
    }
}

/// Per-worker success flags of the enrichment phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentSuccesses {
    /// Availability answered.
    pub availability: bool,
    /// Cost answered.
    pub cost: bool,
    /// Summarizer answered.
    pub summarizer: bool,
}

/// Task outputs of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationOutcome {
    /// Id of the orchestration task.
    pub task_id: String,
    /// The aggregate.
    pub decision_card: DecisionCard,
    /// Always true for a completed run.
    pub phase1_success: bool,
    /// Per-worker outcome of enrichment.
    pub phase2_successes: EnrichmentSuccesses,
    /// Human-readable summary.
    pub message: String,
}

/// Fold the results of both phases into a decision card. Failed enrichment
/// workers contribute empty lists or no explainer.
pub fn aggregate(
    referral_id: &str,
    gathered: &GatheredInputs,
    enrichment: &Enrichment,
    created_at: DateTime<Utc>,
) -> DecisionCard {
    DecisionCard {
        referral_id: referral_id.to_string(),
        providers: gathered.providers.clone(),
        availability: enrichment.availability.clone().unwrap_or_default(),
        cost_estimates: enrichment.cost_estimates.clone().unwrap_or_default(),
        patient_explainer: enrichment
            .summaries
            .as_ref()
            .map(|s| s.patient_explainer.clone()),
        created_at,
    }
}

/// The referral saga: gather providers and records, then enrich with
/// availability, costs and summaries, then aggregate.
///
/// The gathering phase is fail-fast: if either worker fails the run fails and
/// nothing is enriched. The enrichment phase tolerates individual failures.
pub struct Orchestrator {
    fanout: FanOut,
}

impl Orchestrator {
    /// Orchestrator sending through `fanout`.
    pub fn new(fanout: FanOut) -> Self {
        Self { fanout }
    }

    /// Run the saga for one referral under `task_id`.
    pub async fn run(
        &self,
        event: &ReferralCreatedEvent,
        task_id: &str,
    ) -> CarelineResult<OrchestrationOutcome> {
        let start = Instant::now();
        info!(referral_id = %event.referral_id, phase = %RunPhase::Gathering, "Processing referral");

        let gathered = match self.gather(event, task_id).await {
            Ok(g) => g,
            Err(e) => {
                warn!(
                    referral_id = %event.referral_id,
                    phase = %RunPhase::Failed,
                    error = %e,
                    "Referral orchestration failed"
                );
                return Err(e);
            }
        };

        info!(
            referral_id = %event.referral_id,
            phase = %RunPhase::Enriching,
            providers = gathered.providers.len(),
            "Starting enrichment"
        );
        let enrichment = self.enrich(event, &gathered, task_id).await;

        info!(referral_id = %event.referral_id, phase = %RunPhase::Aggregating, "Building decision card");
        let decision_card = aggregate(&event.referral_id, &gathered, &enrichment, Utc::now());

        info!(
            referral_id = %event.referral_id,
            phase = %RunPhase::Done,
            duration_ms = start.elapsed().as_millis() as u64,
            "Successfully orchestrated referral"
        );

        Ok(OrchestrationOutcome {
            task_id: task_id.to_string(),
            decision_card,
            phase1_success: true,
            phase2_successes: enrichment.successes(),
            message: "Referral processing orchestrated successfully".to_string(),
        })
    }

    async fn gather(
        &self,
        event: &ReferralCreatedEvent,
        task_id: &str,
    ) -> CarelineResult<GatheredInputs> {
        let directory = DirectoryInput {
            referral_id: event.referral_id.clone(),
            specialty: event.specialty.clone(),
            patient_id: event.patient_id.clone(),
            zip_code: None,
        };
        let records = RecordsInput {
            referral_id: event.referral_id.clone(),
            patient_id: event.patient_id.clone(),
            record_sources: None,
        };
        let requests = vec![
            OutboundRequest::new(AgentKind::Directory, "find_providers", to_payload(&directory)?)
                .correlated(task_id),
            OutboundRequest::new(AgentKind::Records, "parse_records", to_payload(&records)?)
                .correlated(task_id),
        ];

        let mut responses = self.fanout.send_all(requests).await;
        let records = responses.pop();
        let directory = responses.pop();

        // Directory is checked first so its failure wins when both fail.
        let directory: DirectoryOutput = required(directory, "Directory")?;
        let records: RecordsOutput = required(records, "Records")?;

        Ok(GatheredInputs {
            providers: directory.providers,
            medical_record: records.medical_record,
        })
    }

    async fn enrich(
        &self,
        event: &ReferralCreatedEvent,
        gathered: &GatheredInputs,
        task_id: &str,
    ) -> Enrichment {
        let referral = event.referral();
        let availability = AvailabilityInput {
            referral_id: event.referral_id.clone(),
            provider_ids: gathered.providers.iter().map(|p| p.id.clone()).collect(),
            urgency: referral.urgency,
        };
        let cost = CostInput {
            referral_id: event.referral_id.clone(),
            providers: gathered.providers.clone(),
            patient_insurance: None,
        };
        let summarizer = SummarizerInput {
            referral_id: event.referral_id.clone(),
            patient_id: event.patient_id.clone(),
            referral,
            medical_record: Some(gathered.medical_record.clone()),
        };

        let requests = [
            (AgentKind::Availability, "get_availability", to_payload(&availability)),
            (AgentKind::Cost, "estimate_costs", to_payload(&cost)),
            (AgentKind::Summarizer, "generate_summaries", to_payload(&summarizer)),
        ];
        let mut outbound = Vec::with_capacity(requests.len());
        for (target, action, payload) in requests {
            // An unencodable input leaves an empty payload; the worker rejects it.
            let payload = payload.unwrap_or_default();
            outbound.push(OutboundRequest::new(target, action, payload).correlated(task_id));
        }

        let mut responses = self.fanout.send_all(outbound).await.into_iter();
        let availability: Option<AvailabilityOutput> = tolerated(responses.next(), "availability");
        let cost: Option<CostOutput> = tolerated(responses.next(), "cost");
        let summaries: Option<SummarizerOutput> = tolerated(responses.next(), "summarizer");

        Enrichment {
            availability: availability.map(|a| a.availability),
            cost_estimates: cost.map(|c| c.estimates),
            summaries,
        }
    }

    /// Report the latest run for a referral from the agent's own task table.
    async fn status(&self, payload: &Payload, ctx: &TaskContext) -> CarelineResult<Payload> {
        let referral_id = payload
            .get("referral_id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CarelineError::validation("referral_id required"))?;

        let tasks = ctx.tasks.read().await;
        let action = OrchestratorAction::ProcessReferralCreated.as_str();
        let runs: Vec<_> = tasks
            .for_referral(referral_id)
            .into_iter()
            .filter(|t| t.action == action)
            .collect();
        let completed = runs
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count();

        let mut out = json!({
            "referral_id": referral_id,
            "tasks_completed": completed,
            "total_tasks": runs.len(),
        });
        match runs.last() {
            None => {
                out["status"] = json!("not_found");
            }
            Some(latest) => {
                out["status"] = json!(latest.status);
                out["task_id"] = json!(latest.id);
                out["last_updated"] = json!(latest.completed_at.unwrap_or(latest.created_at));
                if let Some(card) = latest.outputs.as_ref().and_then(|o| o.get("decision_card")) {
                    out["decision_card"] = card.clone();
                }
                if let Some(error) = &latest.error {
                    out["error"] = json!(error);
                }
            }
        }

        to_payload(&out)
    }
}

/// Decode a gathering-phase response, turning any failure into the run's error.
fn required<T: DeserializeOwned>(response: Option<Response>, worker: &str) -> CarelineResult<T> {
    let response = response.ok_or_else(|| {
        CarelineError::Orchestrator(format!("{worker} agent failed: no response"))
    })?;
    response.decode().map_err(|e| {
        CarelineError::Orchestrator(format!(
            "{worker} agent failed: {}",
            failure_text(&response, e)
        ))
    })
}

/// Decode an enrichment-phase response; failures are logged and dropped.
fn tolerated<T: DeserializeOwned>(response: Option<Response>, worker: &str) -> Option<T> {
    let response = response?;
    match response.decode() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(worker, error = %failure_text(&response, e), "Enrichment worker failed");
            None
        }
    }
}

fn failure_text(response: &Response, decode_error: CarelineError) -> String {
    response
        .error()
        .map(str::to_string)
        .unwrap_or_else(|| decode_error.to_string())
}

#[async_trait]
impl AgentService for Orchestrator {
    type Action = OrchestratorAction;

    fn kind(&self) -> AgentKind {
        AgentKind::Orchestrator
    }

    async fn handle(
        &self,
        action: OrchestratorAction,
        payload: &Payload,
        ctx: &TaskContext,
    ) -> CarelineResult<Payload> {
        match action {
            OrchestratorAction::ProcessReferralCreated => {
                let event = ReferralCreatedEvent::from_payload(payload)?;
                let outcome = self.run(&event, &ctx.task_id).await?;
                to_payload(&outcome)
            }
            OrchestratorAction::GetOrchestrationStatus => self.status(payload, ctx).await,
        }
    }
}
