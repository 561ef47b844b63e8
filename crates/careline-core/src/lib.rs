//! Core types and error definitions for the CareLine agent substrate.
//!
//! This crate provides the data contract shared by every CareLine agent:
//! the request/response envelopes, task and monitor records, referral domain
//! models, and the unified error type.
//!
//! # Main types
//!
//! - [`CarelineError`]: Unified error enum; its `Display` text is what failed responses carry.
//! - [`Message`] / [`Response`]: The point-to-point request/response envelope.
//! - [`AgentKind`]: The closed set of cooperating agents.
//! - [`Task`]: Per-agent lifecycle record of one processed action.
//! - [`Monitor`]: A standing change-monitoring subscription.
//! - [`DecisionCard`]: Aggregate result of one orchestration run.

/// Agent identities.
pub mod agent;
/// Envelope types and payload helpers.
pub mod envelope;
/// Unified error type.
pub mod error;
/// Inbound events and typed worker inputs/outputs.
pub mod events;
/// Referral, provider, record and decision card models.
pub mod models;
/// Monitor subscription record.
pub mod monitor;
/// Task lifecycle record.
pub mod task;

pub use agent::{AgentKind, PeerStatus};
pub use envelope::{from_payload, to_payload, Message, Payload, Response};
pub use error::{CarelineError, CarelineResult};
pub use events::{EventType, RecordsUpdatedEvent, ReferralCreatedEvent};
pub use models::{ClinicianBrief, DecisionCard, Referral};
pub use monitor::{Monitor, DEFAULT_CHECK_INTERVAL_SECS};
pub use task::{Task, TaskStatus, UNKNOWN_REFERRAL};
