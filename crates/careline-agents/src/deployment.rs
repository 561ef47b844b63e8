use crate::availability::AvailabilityService;
use crate::catalog::{ProviderCatalog, RecordSource};
use crate::cost::CostService;
use crate::directory::DirectoryService;
use crate::memory::{InMemoryBriefStore, InMemoryReferrals, LogNotifier, ManualChangeSignal};
use crate::network::{AgentHandle, InProcessNetwork};
use crate::records::RecordsService;
use crate::summarizer::SummarizerService;
use careline_core::events::{RecordsUpdatedEvent, ReferralCreatedEvent};
use careline_core::models::{ReferralStatus, Urgency};
use careline_core::{to_payload, AgentKind, CarelineResult, Message, Payload, Referral, Response};
use careline_orchestrator::{
    AgentCard, AgentRegistry, AgentService, Dispatcher, EndpointResolver, FanOut, LoopService,
    MonitoringConfig, MonitoringEngine, Orchestrator,
};
use std::sync::Arc;
use tracing::info;

/// Sender name used for messages injected from outside the agent network.
pub const EXTERNAL_SENDER: &str = "careline-client";

/// Shared data sources and collaborators the agents are built from.
#[derive(Clone)]
pub struct Fixtures {
    /// Providers served by the directory agent.
    pub catalog: Arc<ProviderCatalog>,
    /// Records read by the records and summarizer agents.
    pub records: Arc<RecordSource>,
    /// Referral lookup used by the loop agent.
    pub referrals: Arc<InMemoryReferrals>,
    /// Last clinician brief per referral.
    pub briefs: Arc<InMemoryBriefStore>,
    /// Receives significant-update notifications.
    pub notifier: Arc<LogNotifier>,
    /// Decides which monitors see new data.
    pub signal: Arc<ManualChangeSignal>,
}

impl Fixtures {
    /// Empty stores around the given catalog and record source.
    pub fn new(catalog: ProviderCatalog, records: RecordSource) -> Self {
        Self {
            catalog: Arc::new(catalog),
            records: Arc::new(records),
            referrals: Arc::new(InMemoryReferrals::new()),
            briefs: Arc::new(InMemoryBriefStore::new()),
            notifier: Arc::new(LogNotifier::new()),
            signal: Arc::new(ManualChangeSignal::new()),
        }
    }

    /// Seeded catalog and records plus one pending cardiology referral.
    pub fn demo() -> Self {
        let fixtures = Self::new(ProviderCatalog::seeded(), RecordSource::seeded());
        fixtures.referrals.upsert(demo_referral());
        fixtures
    }
}

/// The referral seeded by [`Fixtures::demo`].
pub fn demo_referral() -> Referral {
    Referral {
        id: "referral-001".to_string(),
        patient_id: "patient-001".to_string(),
        specialty: "Cardiology".to_string(),
        reason: "Exertional chest pain with elevated BNP".to_string(),
        urgency: Urgency::Urgent,
        status: ReferralStatus::Pending,
        notes: None,
    }
}

fn host<S: AgentService>(service: S, registry: Arc<AgentRegistry>) -> AgentHandle {
    AgentHandle::new(Arc::new(Dispatcher::new(Arc::new(service), registry)))
}

/// Build one agent whose peers are resolved through `resolver`.
pub fn build_agent(
    kind: AgentKind,
    resolver: &dyn EndpointResolver,
    fixtures: &Fixtures,
    monitoring: MonitoringConfig,
) -> AgentHandle {
    let registry = Arc::new(AgentRegistry::build(kind, resolver));
    match kind {
        AgentKind::Orchestrator => host(Orchestrator::new(FanOut::new(registry.clone())), registry),
        AgentKind::Directory => host(DirectoryService::new(fixtures.catalog.clone()), registry),
        AgentKind::Availability => host(AvailabilityService::new(), registry),
        AgentKind::Cost => host(CostService::new(), registry),
        AgentKind::Records => host(RecordsService::new(fixtures.records.clone()), registry),
        AgentKind::Summarizer => host(SummarizerService::new(fixtures.records.clone()), registry),
        AgentKind::Loop => {
            let engine = MonitoringEngine::new(monitoring, fixtures.signal.clone());
            let service = LoopService::new(
                FanOut::new(registry.clone()),
                engine,
                fixtures.referrals.clone(),
                fixtures.briefs.clone(),
                fixtures.notifier.clone(),
            );
            AgentHandle::new(service.into_dispatcher(registry))
        }
    }
}

/// Every agent running in this process, wired through an [`InProcessNetwork`].
pub struct LocalCluster {
    network: InProcessNetwork,
    fixtures: Fixtures,
}

impl LocalCluster {
    /// Build and attach all seven agents.
    pub fn start(fixtures: Fixtures, monitoring: MonitoringConfig) -> CarelineResult<Self> {
        let network = InProcessNetwork::new();
        for kind in AgentKind::ALL {
            let agent = build_agent(kind, &network, &fixtures, monitoring);
            network.attach(agent)?;
        }
        info!(agents = AgentKind::ALL.len(), "Local cluster started");
        Ok(Self { network, fixtures })
    }

    /// The network the agents are attached to.
    pub fn network(&self) -> &InProcessNetwork {
        &self.network
    }

    /// The data sources the agents were built from.
    pub fn fixtures(&self) -> &Fixtures {
        &self.fixtures
    }

    /// Send a message from outside the network.
    pub async fn send(
        &self,
        to: AgentKind,
        action: &str,
        payload: Payload,
    ) -> CarelineResult<Response> {
        let message = Message::new(EXTERNAL_SENDER, to, action, payload)?;
        self.network.deliver(message).await
    }

    /// Register the referral and hand a `referral.created` event to the orchestrator.
    pub async fn submit_referral(&self, referral: Referral) -> CarelineResult<Response> {
        self.fixtures.referrals.upsert(referral.clone());
        let mut event = ReferralCreatedEvent::new(
            referral.id.clone(),
            referral.patient_id.clone(),
            referral.specialty.clone(),
        );
        event.referral = Some(referral);
        self.send(
            AgentKind::Orchestrator,
            "process_referral_created",
            to_payload(&event)?,
        )
        .await
    }

    /// Hand a `records.updated` event to the loop agent.
    pub async fn records_updated(
        &self,
        patient_id: &str,
        referral_id: Option<String>,
    ) -> CarelineResult<Response> {
        let event = RecordsUpdatedEvent::new(patient_id, referral_id);
        self.send(AgentKind::Loop, "process_records_updated", to_payload(&event)?)
            .await
    }

    /// Cards for every running agent, with URLs from `url_for`.
    pub fn cards(&self, url_for: impl Fn(AgentKind) -> String) -> Vec<AgentCard> {
        self.network
            .agents()
            .iter()
            .map(|agent| agent.host.card(&url_for(agent.kind())))
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use careline_core::PeerStatus;

    #[tokio::test]
    async fn test_cluster_attaches_every_agent() {
        let cluster = LocalCluster::start(Fixtures::demo(), MonitoringConfig::default()).unwrap();
        assert_eq!(cluster.network().agents().len(), 7);

        let orchestrator = cluster.network().agent(AgentKind::Orchestrator).unwrap();
        let health = orchestrator.host.health();
        assert_eq!(health.status, "healthy");
        assert!(health
            .remote_agents
            .values()
            .all(|s| *s == PeerStatus::Connected));
    }

    #[tokio::test]
    async fn test_attach_twice_is_rejected() {
        let fixtures = Fixtures::demo();
        let network = InProcessNetwork::new();
        let first = build_agent(AgentKind::Cost, &network, &fixtures, MonitoringConfig::default());
        let second = build_agent(AgentKind::Cost, &network, &fixtures, MonitoringConfig::default());
        network.attach(first).unwrap();
        assert!(network.attach(second).is_err());
    }

    #[tokio::test]
    async fn test_unattached_peer_is_a_transport_failure() {
        let fixtures = Fixtures::demo();
        let network = InProcessNetwork::new();
        let records = build_agent(AgentKind::Records, &network, &fixtures, MonitoringConfig::default());
        network.attach(records).unwrap();

        let message = Message::new(EXTERNAL_SENDER, AgentKind::Cost, "estimate_costs", Payload::new())
            .unwrap();
        let err = network.deliver(message).await.unwrap_err();
        assert!(err.to_string().contains("not running"));
    }

    #[test]
    fn test_cards_cover_all_actions() {
        let cluster = LocalCluster::start(Fixtures::demo(), MonitoringConfig::default()).unwrap();
        let cards = cluster.cards(|kind| format!("http://localhost/{kind}"));
        assert_eq!(cards.len(), 7);
        let actions: usize = cards.iter().map(|c| c.actions.len()).sum();
        // orchestrator 2, directory 2, availability 1, cost 1, records 2, summarizer 1, loop 4
        assert_eq!(actions, 13);
    }
}
