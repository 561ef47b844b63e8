use crate::registry::AgentRegistry;
use careline_core::{AgentKind, Message, Payload, Response};
use futures_util::future::join_all;
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// One outbound request in a fan-out batch.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    /// Receiving agent.
    pub target: AgentKind,
    /// Action name.
    pub action: String,
    /// Action payload.
    pub payload: Payload,
    /// Carried unchanged into the message.
    pub correlation_id: Option<String>,
}

impl OutboundRequest {
    /// Uncorrelated request.
    pub fn new(target: AgentKind, action: impl Into<String>, payload: Payload) -> Self {
        Self {
            target,
            action: action.into(),
            payload,
            correlation_id: None,
        }
    }

    /// Tie the request to an originating task.
    pub fn correlated(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

enum Slot {
    Ready(Response),
    Pending {
        message_id: String,
        target: AgentKind,
        handle: tokio::task::JoinHandle<Response>,
    },
}

/// Sends messages on behalf of one agent, singly or as a concurrent batch.
#[derive(Clone)]
pub struct FanOut {
    sender: String,
    registry: Arc<AgentRegistry>,
}

impl FanOut {
    /// Fan-out sending as the registry's owner.
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self {
            sender: registry.owner().agent_name(),
            registry,
        }
    }

    /// Display name stamped into `from` on every outbound message.
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// The registry requests are resolved against.
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Send a single request.
    pub async fn send(&self, request: OutboundRequest) -> Response {
        let mut responses = self.send_all(vec![request]).await;
        responses
            .pop()
            .unwrap_or_else(|| Response::failure(new_message_id(), "no response"))
    }

    /// Issue every request concurrently and return one response per request,
    /// in request order. A failure in one slot (unresolvable peer, transport
    /// error, panic) becomes a failed response for that slot only.
    pub async fn send_all(&self, requests: Vec<OutboundRequest>) -> Vec<Response> {
        let slots: Vec<Slot> = requests
            .into_iter()
            .map(|request| self.launch(request))
            .collect();

        join_all(slots.into_iter().map(|slot| async move {
            match slot {
                Slot::Ready(response) => response,
                Slot::Pending {
                    message_id,
                    target,
                    handle,
                } => match handle.await {
                    Ok(response) => response,
                    Err(e) => {
                        error!(target_agent = %target, error = %e, "Outbound call aborted");
                        Response::failure(message_id, format!("call to {target} aborted: {e}"))
                    }
                },
            }
        }))
        .await
    }

    fn launch(&self, request: OutboundRequest) -> Slot {
        let target = request.target;
        let message = match Message::new(
            self.sender.clone(),
            target,
            request.action,
            request.payload,
        ) {
            Ok(m) => m.correlated(request.correlation_id),
            Err(e) => return Slot::Ready(Response::failure(new_message_id(), e.to_string())),
        };
        let message_id = message.id().to_string();

        let endpoint = match self.registry.resolve(target) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!(target_agent = %target, action = message.action(), "Peer not connected");
                return Slot::Ready(Response::failure(message_id, e.to_string()));
            }
        };

        debug!(
            from = %self.sender,
            target_agent = %target,
            action = message.action(),
            message_id = %message_id,
            "Sending message"
        );

        let id = message_id.clone();
        let handle = tokio::spawn(async move {
            match endpoint.call(message).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(target_agent = %target, error = %e, "Outbound call failed");
                    Response::failure(id, e.to_string())
                }
            }
        });

        Slot::Pending {
            message_id,
            target,
            handle,
        }
    }
}

fn new_message_id() -> String {
    format!("msg_{}", Uuid::new_v4().simple())
}
