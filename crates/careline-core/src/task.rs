use crate::agent::AgentKind;
use crate::envelope::Payload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Referral key used when a payload carries no `referral_id`.
pub const UNKNOWN_REFERRAL: &str = "unknown";

/// Lifecycle state of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, not started.
    Pending,
    /// Handler in progress.
    Running,
    /// Finished with outputs.
    Completed,
    /// Finished with an error.
    Failed,
}

impl TaskStatus {
    /// `Completed` and `Failed` are final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// One unit of work processed by an agent, owned by that agent only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique within the owning agent.
    pub id: String,
    /// Agent that owns the task.
    pub agent_type: AgentKind,
    /// The action that started this task.
    pub action: String,
    /// Referral from the payload, or `unknown`.
    pub referral_id: String,
    /// Lifecycle state.
    pub status: TaskStatus,
    /// Payload of the message that started the task.
    pub inputs: Payload,
    /// Set once completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Payload>,
    /// Set once failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When processing began.
    pub created_at: DateTime<Utc>,
    /// When the task became terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a task already in the `Running` state.
    pub fn start(
        id: impl Into<String>,
        agent_type: AgentKind,
        action: impl Into<String>,
        referral_id: impl Into<String>,
        inputs: Payload,
    ) -> Self {
        Self {
            id: id.into(),
            agent_type,
            action: action.into(),
            referral_id: referral_id.into(),
            status: TaskStatus::Running,
            inputs,
            outputs: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Transition to `Completed`. Returns `false` if the task was already terminal.
    pub fn complete(&mut self, outputs: Payload) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = TaskStatus::Completed;
        self.outputs = Some(outputs);
        self.error = None;
        self.completed_at = Some(Utc::now());
        true
    }

    /// Transition to `Failed`. Returns `false` if the task was already terminal.
    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let error = error.into();
        self.status = TaskStatus::Failed;
        self.outputs = None;
        self.error = Some(if error.trim().is_empty() {
            "unspecified failure".to_string()
        } else {
            error
        });
        self.completed_at = Some(Utc::now());
        true
    }
}
