use crate::error::CarelineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The fixed set of cooperating agents in a CareLine deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Composes the referral workflow into a decision card.
    Orchestrator,
    /// Provider lookup by specialty.
    Directory,
    /// Appointment availability.
    Availability,
    /// Out-of-pocket cost estimation.
    Cost,
    /// Medical record parsing and normalization.
    Records,
    /// Clinician brief and patient explainer generation.
    Summarizer,
    /// Continuous monitoring of record changes.
    Loop,
}

impl AgentKind {
    /// Every known agent, in registry order.
    pub const ALL: [AgentKind; 7] = [
        AgentKind::Orchestrator,
        AgentKind::Directory,
        AgentKind::Availability,
        AgentKind::Cost,
        AgentKind::Records,
        AgentKind::Summarizer,
        AgentKind::Loop,
    ];

    /// The logical agent name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Orchestrator => "orchestrator",
            AgentKind::Directory => "directory",
            AgentKind::Availability => "availability",
            AgentKind::Cost => "cost",
            AgentKind::Records => "records",
            AgentKind::Summarizer => "summarizer",
            AgentKind::Loop => "loop",
        }
    }

    /// Display name, e.g. `DirectoryAgent`.
    pub fn agent_name(&self) -> String {
        let name = self.as_str();
        let mut chars = name.chars();
        match chars.next() {
            Some(first) => format!("{}{}Agent", first.to_ascii_uppercase(), chars.as_str()),
            None => "Agent".to_string(),
        }
    }

    /// All agents except `self`: the peers an agent of this kind talks to.
    pub fn peers(&self) -> impl Iterator<Item = AgentKind> + '_ {
        Self::ALL.into_iter().filter(move |k| k != self)
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = CarelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CarelineError::validation(format!("unknown agent: {s}")))
    }
}

/// Registry membership of a peer, as reported by the health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    /// The peer resolved at startup.
    Connected,
    /// The peer failed to resolve and is absent.
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_name() {
        assert_eq!(AgentKind::Directory.agent_name(), "DirectoryAgent");
        assert_eq!(AgentKind::Loop.agent_name(), "LoopAgent");
    }

    #[test]
    fn test_peers_exclude_self() {
        let peers: Vec<AgentKind> = AgentKind::Loop.peers().collect();
        assert_eq!(peers.len(), 6);
        assert!(!peers.contains(&AgentKind::Loop));
    }

    #[test]
    fn test_from_str() {
        assert_eq!("Cost".parse::<AgentKind>().ok(), Some(AgentKind::Cost));
        assert!("billing".parse::<AgentKind>().is_err());
    }
}
