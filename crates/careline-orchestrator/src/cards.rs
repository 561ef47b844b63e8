use crate::dispatch::ActionSet;
use careline_core::AgentKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version advertised on every card.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Self-description of one agent: name, endpoint and the actions it accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCard {
    /// Display name, e.g. `DirectoryAgent`.
    pub name: String,
    /// Agent kind.
    pub kind: AgentKind,
    /// What the agent does.
    pub description: String,
    /// Where the agent accepts envelopes.
    pub url: String,
    /// Protocol version.
    pub version: String,
    /// Accepted actions.
    pub actions: Vec<ActionCard>,
}

/// One accepted action and the shape of its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionCard {
    /// Wire name.
    pub name: String,
    /// What the action does.
    pub description: String,
    /// JSON schema of the payload.
    pub input_schema: Value,
}

/// Build the card for an agent of `kind` reachable at `url`, whose actions are `A`.
pub fn agent_card<A: ActionSet>(kind: AgentKind, url: impl Into<String>) -> AgentCard {
    AgentCard {
        name: kind.agent_name(),
        kind,
        description: describe(kind).to_string(),
        url: url.into(),
        version: PROTOCOL_VERSION.to_string(),
        actions: A::ALL
            .iter()
            .map(|action| ActionCard {
                name: action.as_str().to_string(),
                description: action.description().to_string(),
                input_schema: action.input_schema(),
            })
            .collect(),
    }
}

fn describe(kind: AgentKind) -> &'static str {
    match kind {
        AgentKind::Orchestrator => {
            "Coordinates the referral workflow and assembles decision cards"
        }
        AgentKind::Directory => "Finds specialists by specialty, network status and distance",
        AgentKind::Availability => "Proposes appointment slots for candidate providers",
        AgentKind::Cost => "Estimates out-of-pocket costs against the patient's insurance",
        AgentKind::Records => "Parses and normalizes a patient's medical records",
        AgentKind::Summarizer => "Generates clinician briefs and patient explainers",
        AgentKind::Loop => "Monitors patients for record changes and refreshes summaries",
    }
}

/// Minimal JSON-schema object with the given required string properties.
pub fn object_schema(required: &[&str], optional: &[&str]) -> Value {
    let mut properties = serde_json::Map::new();
    for name in required.iter().chain(optional) {
        properties.insert((*name).to_string(), serde_json::json!({}));
    }
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_object_schema_lists_required() {
        let schema = object_schema(&["referral_id"], &["patient_id"]);
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"][0], "referral_id");
        assert!(schema["properties"].get("patient_id").is_some());
    }
}
