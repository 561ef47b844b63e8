use async_trait::async_trait;
use careline_core::{AgentKind, CarelineError, CarelineResult, Message, PeerStatus, Response};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// A callable capability that delivers a [`Message`] to one agent and yields
/// its [`Response`].
///
/// `Err` means the call itself failed (transport, deadline); a remote handler
/// failure arrives as `Ok` with a failed response.
#[async_trait]
pub trait AgentEndpoint: Send + Sync {
    async fn call(&self, message: Message) -> CarelineResult<Response>;
}

/// Produces an endpoint for a logical agent name at registry build time.
pub trait EndpointResolver: Send + Sync {
    fn resolve(&self, kind: AgentKind) -> CarelineResult<Arc<dyn AgentEndpoint>>;
}

impl<F> EndpointResolver for F
where
    F: Fn(AgentKind) -> CarelineResult<Arc<dyn AgentEndpoint>> + Send + Sync,
{
    fn resolve(&self, kind: AgentKind) -> CarelineResult<Arc<dyn AgentEndpoint>> {
        self(kind)
    }
}

/// Maps logical agent names to endpoints for one owning agent.
///
/// Built once at startup and read-only afterwards, so it is shared behind an
/// `Arc` without locking.
pub struct AgentRegistry {
    owner: AgentKind,
    endpoints: HashMap<AgentKind, Arc<dyn AgentEndpoint>>,
}

impl AgentRegistry {
    /// Resolve every known agent except `owner`. A peer that fails to resolve
    /// is logged and left out; the others are still served.
    pub fn build(owner: AgentKind, resolver: &dyn EndpointResolver) -> Self {
        let mut endpoints = HashMap::new();
        for peer in owner.peers() {
            match resolver.resolve(peer) {
                Ok(endpoint) => {
                    info!(owner = %owner, peer = %peer, "Connected to peer agent");
                    endpoints.insert(peer, endpoint);
                }
                Err(e) => {
                    warn!(owner = %owner, peer = %peer, error = %e, "Failed to connect to peer agent");
                }
            }
        }
        Self { owner, endpoints }
    }

    /// A registry with no peers.
    pub fn empty(owner: AgentKind) -> Self {
        Self {
            owner,
            endpoints: HashMap::new(),
        }
    }

    /// Add or replace one endpoint while the registry is still being assembled.
    pub fn with_endpoint(mut self, kind: AgentKind, endpoint: Arc<dyn AgentEndpoint>) -> Self {
        self.endpoints.insert(kind, endpoint);
        self
    }

    /// The agent this registry belongs to.
    pub fn owner(&self) -> AgentKind {
        self.owner
    }

    /// Look up the endpoint for `kind`.
    pub fn resolve(&self, kind: AgentKind) -> CarelineResult<Arc<dyn AgentEndpoint>> {
        self.endpoints
            .get(&kind)
            .cloned()
            .ok_or_else(|| CarelineError::PeerUnavailable(kind.to_string()))
    }

    /// Registry membership of `kind`. Says nothing about liveness.
    pub fn health(&self, kind: AgentKind) -> PeerStatus {
        if self.endpoints.contains_key(&kind) {
            PeerStatus::Connected
        } else {
            PeerStatus::Disconnected
        }
    }

    /// Membership of every peer of the owner.
    pub fn health_map(&self) -> BTreeMap<AgentKind, PeerStatus> {
        self.owner.peers().map(|k| (k, self.health(k))).collect()
    }

    /// Number of resolved peers.
    pub fn connected_count(&self) -> usize {
        self.endpoints.len()
    }
}

/// Wraps an endpoint with a per-call deadline.
///
/// The fan-out coordinator never times calls out on its own; callers that want
/// bounded latency wrap endpoints in this before handing them over.
pub struct DeadlineEndpoint {
    inner: Arc<dyn AgentEndpoint>,
    deadline: Duration,
}

impl DeadlineEndpoint {
    /// Wrap `inner` so every call fails after `deadline`.
    pub fn new(inner: Arc<dyn AgentEndpoint>, deadline: Duration) -> Self {
        Self { inner, deadline }
    }
}

#[async_trait]
impl AgentEndpoint for DeadlineEndpoint {
    async fn call(&self, message: Message) -> CarelineResult<Response> {
        let target = message.to();
        let action = message.action().to_string();
        match tokio::time::timeout(self.deadline, self.inner.call(message)).await {
            Ok(result) => result,
            Err(_) => Err(CarelineError::Timeout(format!(
                "{target} did not answer {action} within {}ms",
                self.deadline.as_millis()
            ))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use careline_core::Payload;

    struct Echo;

    #[async_trait]
    impl AgentEndpoint for Echo {
        async fn call(&self, message: Message) -> CarelineResult<Response> {
            Ok(Response::success(message.id(), message.payload().clone()))
        }
    }

    struct Stall;

    #[async_trait]
    impl AgentEndpoint for Stall {
        async fn call(&self, _message: Message) -> CarelineResult<Response> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(CarelineError::Transport("unreachable".into()))
        }
    }

    #[test]
    fn test_one_failed_peer_does_not_block_others() {
        let resolver = |kind: AgentKind| -> CarelineResult<Arc<dyn AgentEndpoint>> {
            if kind == AgentKind::Cost {
                Err(CarelineError::Transport("dns failure".into()))
            } else {
                Ok(Arc::new(Echo))
            }
        };
        let registry = AgentRegistry::build(AgentKind::Orchestrator, &resolver);

        assert_eq!(registry.connected_count(), 5);
        assert!(registry.resolve(AgentKind::Directory).is_ok());
        let err = registry.resolve(AgentKind::Cost).err().unwrap();
        assert_eq!(err.to_string(), "Agent cost not connected");
        assert_eq!(registry.health(AgentKind::Cost), PeerStatus::Disconnected);
        assert_eq!(registry.health(AgentKind::Records), PeerStatus::Connected);
    }

    #[test]
    fn test_registry_excludes_owner() {
        let resolver = |_kind: AgentKind| -> CarelineResult<Arc<dyn AgentEndpoint>> {
            Ok(Arc::new(Echo))
        };
        let registry = AgentRegistry::build(AgentKind::Loop, &resolver);
        assert!(registry.resolve(AgentKind::Loop).is_err());
        let health = registry.health_map();
        assert_eq!(health.len(), 6);
        assert!(!health.contains_key(&AgentKind::Loop));
    }

    #[tokio::test]
    async fn test_deadline_endpoint_times_out() {
        let endpoint = DeadlineEndpoint::new(Arc::new(Stall), Duration::from_millis(20));
        let msg = Message::new("test", AgentKind::Cost, "estimate_costs", Payload::new()).unwrap();
        let err = endpoint.call(msg).await.unwrap_err();
        assert!(matches!(err, CarelineError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_deadline_endpoint_passes_through() {
        let endpoint = DeadlineEndpoint::new(Arc::new(Echo), Duration::from_secs(1));
        let msg = Message::new("test", AgentKind::Cost, "estimate_costs", Payload::new()).unwrap();
        let resp = endpoint.call(msg).await.unwrap();
        assert!(resp.is_success());
    }
}
