use crate::cards::{agent_card, AgentCard};
use crate::registry::{AgentEndpoint, AgentRegistry};
use crate::task_store::TaskStore;
use async_trait::async_trait;
use careline_core::{
    AgentKind, CarelineError, CarelineResult, Message, Payload, PeerStatus, Response, Task,
    UNKNOWN_REFERRAL,
};
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// The closed set of actions one agent accepts.
///
/// Inbound action strings are parsed once at the dispatch boundary; anything
/// outside the set is answered with `unknown action: <name>`.
pub trait ActionSet: Copy + Send + Sync + fmt::Debug + 'static {
    /// Every action, in the order they are advertised.
    const ALL: &'static [Self];

    /// Wire name of the action.
    fn as_str(&self) -> &'static str;

    /// One-line description for the agent card.
    fn description(&self) -> &'static str;

    /// Payload shape for the agent card.
    fn input_schema(&self) -> Value;

    fn parse(action: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|a| a.as_str() == action)
    }
}

/// Per-invocation context handed to a service.
#[derive(Clone)]
pub struct TaskContext {
    /// Id of the task being processed.
    pub task_id: String,
    /// Referral from the payload, or `unknown`.
    pub referral_id: String,
    /// Id of the inbound message.
    pub message_id: String,
    /// Correlation id of the inbound message.
    pub correlation_id: Option<String>,
    /// The agent's own task table, readable by status queries.
    pub tasks: Arc<RwLock<TaskStore>>,
}

/// The behavior of one agent: a typed handler per action.
#[async_trait]
pub trait AgentService: Send + Sync + 'static {
    type Action: ActionSet;

    /// Which agent this service implements.
    fn kind(&self) -> AgentKind;

    /// Handle one action. `Ok` becomes a successful response whose payload is
    /// the returned outputs; `Err` becomes a failed response carrying the
    /// error's text.
    async fn handle(
        &self,
        action: Self::Action,
        payload: &Payload,
        ctx: &TaskContext,
    ) -> CarelineResult<Payload>;
}

/// Liveness report of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Display name of the agent.
    pub agent: String,
    /// Always `healthy` while the agent answers.
    pub status: String,
    /// When the report was built.
    pub timestamp: DateTime<Utc>,
    /// Registry membership of each peer.
    pub remote_agents: BTreeMap<AgentKind, PeerStatus>,
}

/// An agent as seen by a transport: it accepts messages and reports on itself.
pub trait AgentHost: AgentEndpoint {
    fn kind(&self) -> AgentKind;

    fn health(&self) -> HealthReport;

    fn card(&self, url: &str) -> AgentCard;
}

/// Uniform inbound handling for one agent: action parsing, task bookkeeping
/// and response shaping around an [`AgentService`].
pub struct Dispatcher<S: AgentService> {
    service: Arc<S>,
    registry: Arc<AgentRegistry>,
    tasks: Arc<RwLock<TaskStore>>,
    seq: AtomicU64,
}

impl<S: AgentService> Dispatcher<S> {
    /// Dispatcher with an empty task store.
    pub fn new(service: Arc<S>, registry: Arc<AgentRegistry>) -> Self {
        Self::with_task_store(service, registry, TaskStore::new())
    }

    /// Use a pre-configured task store.
    pub fn with_task_store(service: Arc<S>, registry: Arc<AgentRegistry>, store: TaskStore) -> Self {
        Self {
            service,
            registry,
            tasks: Arc::new(RwLock::new(store)),
            seq: AtomicU64::new(0),
        }
    }

    /// The wrapped service.
    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    /// Peers of this agent.
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// The agent's task table.
    pub fn tasks(&self) -> &Arc<RwLock<TaskStore>> {
        &self.tasks
    }

    /// Process one inbound message. Never fails: every outcome is a [`Response`].
    pub async fn handle(&self, message: Message) -> Response {
        let kind = self.service.kind();
        if message.to() != kind {
            warn!(agent = %kind, to = %message.to(), "Message addressed to another agent");
            return Response::failure(
                message.id(),
                CarelineError::validation(format!(
                    "message for {} delivered to {kind}",
                    message.to()
                ))
                .to_string(),
            );
        }

        let Some(action) = S::Action::parse(message.action()) else {
            warn!(agent = %kind, action = message.action(), "Unknown action");
            return Response::failure(
                message.id(),
                CarelineError::UnknownAction(message.action().to_string()).to_string(),
            );
        };

        let referral_id = message
            .payload()
            .get("referral_id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_REFERRAL)
            .to_string();
        let task_id = self.next_task_id(action.as_str());

        {
            let mut tasks = self.tasks.write().await;
            tasks.insert(Task::start(
                task_id.clone(),
                kind,
                action.as_str(),
                referral_id.clone(),
                message.payload().clone(),
            ));
        }

        info!(
            agent = %kind,
            action = action.as_str(),
            task_id = %task_id,
            referral_id = %referral_id,
            from = message.from(),
            "Processing message"
        );

        let ctx = TaskContext {
            task_id: task_id.clone(),
            referral_id,
            message_id: message.id().to_string(),
            correlation_id: message.correlation_id().map(str::to_string),
            tasks: self.tasks.clone(),
        };

        let outcome = AssertUnwindSafe(self.service.handle(action, message.payload(), &ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(CarelineError::HandlerPanicked(panic_text(&*panic))));

        match outcome {
            Ok(outputs) => {
                self.tasks.write().await.complete(&task_id, outputs.clone());
                info!(agent = %kind, task_id = %task_id, "Task completed");
                Response::success(message.id(), outputs)
            }
            Err(e) => {
                let text = e.to_string();
                self.tasks.write().await.fail(&task_id, text.clone());
                error!(agent = %kind, task_id = %task_id, error = %text, "Task failed");
                Response::failure(message.id(), text)
            }
        }
    }

    /// `task_{agent}_{action}_{micros}_{seq}`: unique within this dispatcher.
    fn next_task_id(&self, action: &str) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!(
            "task_{}_{}_{}_{}",
            self.service.kind(),
            action,
            Utc::now().timestamp_micros(),
            seq
        )
    }
}

fn panic_text(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[async_trait]
impl<S: AgentService> AgentEndpoint for Dispatcher<S> {
    async fn call(&self, message: Message) -> CarelineResult<Response> {
        Ok(self.handle(message).await)
    }
}

impl<S: AgentService> AgentHost for Dispatcher<S> {
    fn kind(&self) -> AgentKind {
        self.service.kind()
    }

    fn health(&self) -> HealthReport {
        HealthReport {
            agent: self.service.kind().agent_name(),
            status: "healthy".to_string(),
            timestamp: Utc::now(),
            remote_agents: self.registry.health_map(),
        }
    }

    fn card(&self, url: &str) -> AgentCard {
        agent_card::<S::Action>(self.service.kind(), url)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use careline_core::TaskStatus;
    use serde_json::json;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum EchoAction {
        Echo,
        Explode,
        Panic,
    }

    impl ActionSet for EchoAction {
        const ALL: &'static [Self] = &[EchoAction::Echo, EchoAction::Explode, EchoAction::Panic];

        fn as_str(&self) -> &'static str {
            match self {
                EchoAction::Echo => "echo",
                EchoAction::Explode => "explode",
                EchoAction::Panic => "panic",
            }
        }

        fn description(&self) -> &'static str {
            "test action"
        }

        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
    }

    struct EchoService;

    #[async_trait]
    impl AgentService for EchoService {
        type Action = EchoAction;

        fn kind(&self) -> AgentKind {
            AgentKind::Directory
        }

        async fn handle(
            &self,
            action: EchoAction,
            payload: &Payload,
            ctx: &TaskContext,
        ) -> CarelineResult<Payload> {
            match action {
                EchoAction::Echo => {
                    let mut out = payload.clone();
                    out.insert("task_id".into(), json!(ctx.task_id));
                    Ok(out)
                }
                EchoAction::Explode => Err(CarelineError::validation("specialty required")),
                EchoAction::Panic => panic!("provider index out of range"),
            }
        }
    }

    fn dispatcher() -> Dispatcher<EchoService> {
        Dispatcher::new(
            Arc::new(EchoService),
            Arc::new(AgentRegistry::empty(AgentKind::Directory)),
        )
    }

    fn payload(v: Value) -> Payload {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_success_records_completed_task() {
        let d = dispatcher();
        let msg = Message::new(
            "test",
            AgentKind::Directory,
            "echo",
            payload(json!({"referral_id": "r1", "x": 1})),
        )
        .unwrap();
        let resp = d.handle(msg.clone()).await;
        assert!(resp.is_success());
        assert_eq!(resp.message_id(), msg.id());
        let out = resp.payload().unwrap();
        assert_eq!(out["x"], 1);
        let task_id = out["task_id"].as_str().unwrap();
        assert!(task_id.starts_with("task_directory_echo_"));

        let tasks = d.tasks().read().await;
        let task = tasks.get(task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.referral_id, "r1");
        assert!(task.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_handler_error_records_failed_task() {
        let d = dispatcher();
        let msg = Message::new("test", AgentKind::Directory, "explode", Payload::new()).unwrap();
        let resp = d.handle(msg).await;
        assert!(!resp.is_success());
        assert_eq!(resp.error(), Some("specialty required"));

        let tasks = d.tasks().read().await;
        let all = tasks.all_tasks();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, TaskStatus::Failed);
        assert_eq!(all[0].referral_id, UNKNOWN_REFERRAL);
    }

    #[tokio::test]
    async fn test_panicking_handler_fails_task() {
        let d = dispatcher();
        let msg = Message::new(
            "test",
            AgentKind::Directory,
            "panic",
            payload(json!({"referral_id": "r9"})),
        )
        .unwrap();
        let resp = d.handle(msg).await;
        assert!(!resp.is_success());
        assert_eq!(
            resp.error(),
            Some("handler panicked: provider index out of range")
        );

        let tasks = d.tasks().read().await;
        let all = tasks.all_tasks();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, TaskStatus::Failed);
        assert!(all[0].outputs.is_none());
        assert!(all[0].completed_at.is_some());
        assert_eq!(tasks.running_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_action_creates_no_task() {
        let d = dispatcher();
        let msg = Message::new("test", AgentKind::Directory, "fly", Payload::new()).unwrap();
        let resp = d.handle(msg).await;
        assert_eq!(resp.error(), Some("unknown action: fly"));
        assert_eq!(d.tasks().read().await.total_count(), 0);
    }

    #[tokio::test]
    async fn test_misaddressed_message_rejected() {
        let d = dispatcher();
        let msg = Message::new("test", AgentKind::Cost, "echo", Payload::new()).unwrap();
        let resp = d.handle(msg).await;
        assert!(!resp.is_success());
        assert_eq!(d.tasks().read().await.total_count(), 0);
    }

    #[tokio::test]
    async fn test_task_ids_unique() {
        let d = dispatcher();
        let mut ids = std::collections::HashSet::new();
        for _ in 0..50 {
            let msg = Message::new("test", AgentKind::Directory, "echo", Payload::new()).unwrap();
            let resp = d.handle(msg).await;
            ids.insert(resp.payload().unwrap()["task_id"].as_str().unwrap().to_string());
        }
        assert_eq!(ids.len(), 50);
    }

    #[test]
    fn test_health_and_card() {
        let d = dispatcher();
        let health = d.health();
        assert_eq!(health.agent, "DirectoryAgent");
        assert_eq!(health.status, "healthy");
        assert_eq!(health.remote_agents.len(), 6);
        assert!(health
            .remote_agents
            .values()
            .all(|s| *s == PeerStatus::Disconnected));

        let card = d.card("http://localhost:8001/a2a");
        assert_eq!(card.actions.len(), 3);
        assert_eq!(card.actions[0].name, "echo");
    }
}
