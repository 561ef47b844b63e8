//! Messaging and orchestration substrate for CareLine agents.
//!
//! Provides the agent registry, the uniform dispatch core every agent runs
//! behind, concurrent fan-out to peers, the two-phase referral saga and the
//! continuous monitoring engine.
//!
//! # Main types
//!
//! - [`AgentRegistry`]: Logical agent name to endpoint mapping, built once at startup.
//! - [`Dispatcher`]: Action parsing, task bookkeeping and response shaping around an [`AgentService`].
//! - [`FanOut`]: Concurrent sends whose results keep input order.
//! - [`Orchestrator`]: Referral saga producing a [`careline_core::DecisionCard`].
//! - [`MonitoringEngine`]: Monitor registry plus its self-terminating polling loop.
//! - [`LoopService`]: The loop agent: record-change handling and monitor control.

/// Collaborator traits injected into the loop agent.
pub mod capabilities;
/// Agent self-description cards.
pub mod cards;
/// Clinician brief change detection.
pub mod change;
/// Inbound dispatch core.
pub mod dispatch;
/// Two-phase referral orchestration.
pub mod engine;
/// Parallel fan-out coordinator.
pub mod fanout;
/// Loop agent service.
pub mod loop_agent;
/// Monitor registry and polling loop.
pub mod monitor;
/// Agent registry and endpoint abstraction.
pub mod registry;
/// Per-agent task table.
pub mod task_store;

pub use capabilities::{BriefStore, ChangeSignal, Notifier, ReferralLookup, UpdateNotification};
pub use cards::{agent_card, ActionCard, AgentCard};
pub use change::{assess, is_significant_change, ChangeAssessment};
pub use dispatch::{ActionSet, AgentHost, AgentService, Dispatcher, HealthReport, TaskContext};
pub use engine::{aggregate, OrchestrationOutcome, Orchestrator, OrchestratorAction};
pub use fanout::{FanOut, OutboundRequest};
pub use loop_agent::{LoopAction, LoopService, ReferralUpdate, UpdateBatch};
pub use monitor::{MonitoringConfig, MonitoringEngine, PollReport};
pub use registry::{AgentEndpoint, AgentRegistry, DeadlineEndpoint, EndpointResolver};
pub use task_store::TaskStore;
