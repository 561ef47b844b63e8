//! Worker agents for CareLine and the wiring to run them in one process.
//!
//! The worker services are deterministic stand-ins for the external data
//! sources a deployment would use. [`LocalCluster`] builds all seven agents
//! around a [`Fixtures`] bundle and connects them through an
//! [`InProcessNetwork`].

/// Availability agent.
pub mod availability;
/// Seeded provider catalog and record source.
pub mod catalog;
/// Cost agent.
pub mod cost;
/// Agent construction and the local cluster.
pub mod deployment;
/// Directory agent.
pub mod directory;
/// In-memory referral, brief, notification and change-signal implementations.
pub mod memory;
/// In-process endpoint resolution.
pub mod network;
/// Records agent.
pub mod records;
/// Summarizer agent.
pub mod summarizer;

pub use availability::{AvailabilityAction, AvailabilityService};
pub use catalog::{ProviderCatalog, RecordSource};
pub use cost::{CostAction, CostService};
pub use deployment::{build_agent, demo_referral, Fixtures, LocalCluster, EXTERNAL_SENDER};
pub use directory::{DirectoryAction, DirectoryService};
pub use memory::{InMemoryBriefStore, InMemoryReferrals, LogNotifier, ManualChangeSignal};
pub use network::{AgentHandle, InProcessNetwork};
pub use records::{RecordsAction, RecordsService};
pub use summarizer::{SummarizerAction, SummarizerService};
