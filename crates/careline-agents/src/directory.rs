use crate::catalog::ProviderCatalog;
use async_trait::async_trait;
use careline_core::events::{DirectoryInput, DirectoryOutput};
use careline_core::models::Provider;
use careline_core::{from_payload, to_payload, AgentKind, CarelineError, CarelineResult, Payload};
use careline_orchestrator::cards::object_schema;
use careline_orchestrator::{ActionSet, AgentService, TaskContext};
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::info;

/// Maximum number of providers returned by a search.
pub const MAX_RESULTS: usize = 5;

/// Distance assumed for providers without one.
const UNKNOWN_DISTANCE_KM: f64 = 999.0;

/// Actions of the directory agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryAction {
    /// Ranked providers for a specialty.
    FindProviders,
    /// One provider by id.
    GetProviderDetails,
}

impl ActionSet for DirectoryAction {
    const ALL: &'static [Self] = &[
        DirectoryAction::FindProviders,
        DirectoryAction::GetProviderDetails,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            DirectoryAction::FindProviders => "find_providers",
            DirectoryAction::GetProviderDetails => "get_provider_details",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            DirectoryAction::FindProviders => {
                "Nearest in-network providers of a specialty accepting new patients"
            }
            DirectoryAction::GetProviderDetails => "Full record of one provider",
        }
    }

    fn input_schema(&self) -> Value {
        match self {
            DirectoryAction::FindProviders => {
                object_schema(&["referral_id", "specialty", "patient_id"], &["zip_code"])
            }
            DirectoryAction::GetProviderDetails => object_schema(&["provider_id"], &[]),
        }
    }
}

/// Provider search over a [`ProviderCatalog`].
pub struct DirectoryService {
    catalog: Arc<ProviderCatalog>,
}

impl DirectoryService {
    /// Directory over `catalog`.
    pub fn new(catalog: Arc<ProviderCatalog>) -> Self {
        Self { catalog }
    }

    /// Specialty match (case-insensitive), accepting new patients and in
    /// network; nearest first, then best rated; at most [`MAX_RESULTS`].
    pub fn find(&self, specialty: &str) -> Vec<Provider> {
        let mut matches: Vec<Provider> = self
            .catalog
            .all()
            .iter()
            .filter(|p| p.specialty.eq_ignore_ascii_case(specialty))
            .filter(|p| p.accepting_new_patients && p.in_network)
            .cloned()
            .collect();
        matches.sort_by(rank);
        matches.truncate(MAX_RESULTS);
        matches
    }
}

fn rank(a: &Provider, b: &Provider) -> Ordering {
    let distance = |p: &Provider| p.distance_km.unwrap_or(UNKNOWN_DISTANCE_KM);
    let rating = |p: &Provider| p.rating.unwrap_or(0.0);
    distance(a)
        .total_cmp(&distance(b))
        .then_with(|| rating(b).total_cmp(&rating(a)))
}

#[async_trait]
impl AgentService for DirectoryService {
    type Action = DirectoryAction;

    fn kind(&self) -> AgentKind {
        AgentKind::Directory
    }

    async fn handle(
        &self,
        action: DirectoryAction,
        payload: &Payload,
        _ctx: &TaskContext,
    ) -> CarelineResult<Payload> {
        match action {
            DirectoryAction::FindProviders => {
                let input: DirectoryInput = from_payload(payload)?;
                let providers = self.find(&input.specialty);
                info!(
                    specialty = %input.specialty,
                    count = providers.len(),
                    "Found providers"
                );
                to_payload(&DirectoryOutput { providers })
            }
            DirectoryAction::GetProviderDetails => {
                let provider_id = payload
                    .get("provider_id")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| CarelineError::validation("provider_id required"))?;
                let provider = self.catalog.get(provider_id).ok_or_else(|| {
                    CarelineError::validation(format!("Provider {provider_id} not found"))
                })?;
                to_payload(&json!({ "provider": provider }))
            }
        }
    }
}
