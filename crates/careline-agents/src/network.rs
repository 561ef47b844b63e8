//! Wiring that lets every agent run in one process.

use async_trait::async_trait;
use careline_core::{AgentKind, CarelineError, CarelineResult, Message, Response};
use careline_orchestrator::{AgentEndpoint, AgentHost, AgentService, Dispatcher, EndpointResolver};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock, Weak};

/// A running agent, viewed both as a message target and as a host.
#[derive(Clone)]
pub struct AgentHandle {
    /// Liveness and card view.
    pub host: Arc<dyn AgentHost>,
    /// Message target.
    pub endpoint: Arc<dyn AgentEndpoint>,
}

impl AgentHandle {
    /// Handle over a running dispatcher.
    pub fn new<S: AgentService>(dispatcher: Arc<Dispatcher<S>>) -> Self {
        Self {
            host: dispatcher.clone(),
            endpoint: dispatcher,
        }
    }

    /// Kind of the agent.
    pub fn kind(&self) -> AgentKind {
        self.host.kind()
    }
}

/// Endpoint whose target is attached after registries referencing it exist.
struct LateBound {
    kind: AgentKind,
    target: OnceLock<Weak<dyn AgentEndpoint>>,
}

#[async_trait]
impl AgentEndpoint for LateBound {
    async fn call(&self, message: Message) -> CarelineResult<Response> {
        let target = self
            .target
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| CarelineError::Transport(format!("agent {} is not running", self.kind)))?;
        target.call(message).await
    }
}

/// In-process message bus between agents.
///
/// Every agent kind has a slot from the start, so registries can be built
/// before their peers exist. Slots hold weak references; the network keeps
/// the agents alive.
pub struct InProcessNetwork {
    slots: HashMap<AgentKind, Arc<LateBound>>,
    agents: RwLock<BTreeMap<AgentKind, AgentHandle>>,
}

impl InProcessNetwork {
    /// A network with an empty slot per agent kind.
    pub fn new() -> Self {
        let slots = AgentKind::ALL
            .into_iter()
            .map(|kind| {
                (
                    kind,
                    Arc::new(LateBound {
                        kind,
                        target: OnceLock::new(),
                    }),
                )
            })
            .collect();
        Self {
            slots,
            agents: RwLock::new(BTreeMap::new()),
        }
    }

    /// Attach a running agent to its slot. Each kind can be attached once.
    pub fn attach(&self, agent: AgentHandle) -> CarelineResult<()> {
        let kind = agent.kind();
        let slot = self
            .slots
            .get(&kind)
            .ok_or_else(|| CarelineError::PeerUnavailable(kind.to_string()))?;
        slot.target
            .set(Arc::downgrade(&agent.endpoint))
            .map_err(|_| CarelineError::validation(format!("agent {kind} already attached")))?;
        self.agents.write().insert(kind, agent);
        Ok(())
    }

    /// The attached agent of `kind`.
    pub fn agent(&self, kind: AgentKind) -> Option<AgentHandle> {
        self.agents.read().get(&kind).cloned()
    }

    /// Attached agents, ordered by kind.
    pub fn agents(&self) -> Vec<AgentHandle> {
        self.agents.read().values().cloned().collect()
    }

    /// Deliver a message to its target agent.
    pub async fn deliver(&self, message: Message) -> CarelineResult<Response> {
        let endpoint = self.resolve(message.to())?;
        endpoint.call(message).await
    }
}

impl Default for InProcessNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointResolver for InProcessNetwork {
    fn resolve(&self, kind: AgentKind) -> CarelineResult<Arc<dyn AgentEndpoint>> {
        self.slots
            .get(&kind)
            .map(|slot| slot.clone() as Arc<dyn AgentEndpoint>)
            .ok_or_else(|| CarelineError::PeerUnavailable(kind.to_string()))
    }
}
