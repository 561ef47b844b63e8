use async_trait::async_trait;
use careline_core::events::{CostInput, CostOutput};
use careline_core::models::{CostEstimate, Provider};
use careline_core::{from_payload, to_payload, AgentKind, CarelineResult, Payload};
use careline_orchestrator::cards::object_schema;
use careline_orchestrator::{ActionSet, AgentService, TaskContext};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::info;

/// Insurance assumed when the request carries none.
pub const DEFAULT_INSURER: &str = "Blue Cross Blue Shield";
/// Plan type assumed when the insurance omits one.
pub const DEFAULT_PLAN: &str = "PPO";

/// Actions of the cost agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostAction {
    /// Per-provider cost estimates for the patient's insurance.
    EstimateCosts,
}

impl ActionSet for CostAction {
    const ALL: &'static [Self] = &[CostAction::EstimateCosts];

    fn as_str(&self) -> &'static str {
        "estimate_costs"
    }

    fn description(&self) -> &'static str {
        "Out-of-pocket estimate for a new-patient consultation with each provider"
    }

    fn input_schema(&self) -> Value {
        object_schema(&["referral_id", "providers"], &["patient_insurance"])
    }
}

/// Benefits of one insurance plan and the providers in its network.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkPlan {
    /// Insurer name as it appears in the patient's insurance.
    pub insurer: &'static str,
    /// Plan type, e.g. `PPO`.
    pub plan_type: &'static str,
    /// Provider ids in the plan's network.
    pub in_network: &'static [&'static str],
    /// Flat copay per visit.
    pub copay: f64,
    /// Share of the remaining cost the patient pays, 0..1.
    pub coinsurance: f64,
    /// Deductible applied before coinsurance.
    pub deductible: f64,
}

const PLANS: &[NetworkPlan] = &[
    NetworkPlan {
        insurer: "Blue Cross Blue Shield",
        plan_type: "PPO",
        in_network: &["provider-cardio-001", "provider-cardio-002", "provider-derm-001"],
        copay: 30.0,
        coinsurance: 0.2,
        deductible: 1500.0,
    },
    NetworkPlan {
        insurer: "Blue Cross Blue Shield",
        plan_type: "HMO",
        in_network: &["provider-cardio-001", "provider-ortho-001"],
        copay: 15.0,
        coinsurance: 0.1,
        deductible: 500.0,
    },
    NetworkPlan {
        insurer: "Kaiser Permanente",
        plan_type: "HMO",
        in_network: &["provider-cardio-002", "provider-derm-001"],
        copay: 20.0,
        coinsurance: 0.15,
        deductible: 750.0,
    },
    NetworkPlan {
        insurer: "Aetna",
        plan_type: "PPO",
        in_network: &["provider-cardio-001", "provider-cardio-003", "provider-ortho-001"],
        copay: 35.0,
        coinsurance: 0.25,
        deductible: 2000.0,
    },
];

/// Typical price of a new-patient consultation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsultationPrice {
    /// Typical consultation price.
    pub base: f64,
    /// Lower end of the price range.
    pub low: f64,
    /// Upper end of the price range.
    pub high: f64,
}

/// Consultation price range for a specialty.
pub fn consultation_price(specialty: &str) -> ConsultationPrice {
    match specialty.to_ascii_lowercase().as_str() {
        "dermatology" => ConsultationPrice {
            base: 300.0,
            low: 250.0,
            high: 400.0,
        },
        "orthopedics" => ConsultationPrice {
            base: 350.0,
            low: 300.0,
            high: 450.0,
        },
        _ => ConsultationPrice {
            base: 400.0,
            low: 350.0,
            high: 500.0,
        },
    }
}

/// Plan by insurer and plan type, case-insensitive.
pub fn find_plan(insurer: &str, plan_type: &str) -> Option<&'static NetworkPlan> {
    PLANS
        .iter()
        .find(|p| p.insurer.eq_ignore_ascii_case(insurer) && p.plan_type.eq_ignore_ascii_case(plan_type))
}

/// Estimate the patient's share for one provider under `plan`.
pub fn estimate(provider: &Provider, plan: Option<&NetworkPlan>) -> CostEstimate {
    let price = consultation_price(&provider.specialty);
    match plan.filter(|p| p.in_network.contains(&provider.id.as_str())) {
        Some(plan) => {
            let after_copay = (price.base - plan.copay).max(0.0);
            let after_deductible = (after_copay - plan.deductible).max(0.0);
            let coinsurance_amount = after_deductible * plan.coinsurance;
            let fixed = plan.copay + plan.deductible.min(after_copay);
            let low = (fixed + (price.low - price.base) * plan.coinsurance).round().max(0.0);
            let high = (fixed + (price.high - price.base) * plan.coinsurance + coinsurance_amount)
                .round()
                .max(low);
            CostEstimate {
                provider_id: provider.id.clone(),
                estimate_low: low,
                estimate_high: high,
                copay: Some(plan.copay),
                deductible: Some(plan.deductible),
                coinsurance: Some(plan.coinsurance),
                notes: Some(
                    "In-network provider. Costs may vary based on deductible remaining."
                        .to_string(),
                ),
            }
        }
        None => {
            let low = (price.low * 1.5).round();
            CostEstimate {
                provider_id: provider.id.clone(),
                estimate_low: low,
                estimate_high: (price.high * 2.0).round().max(low),
                copay: None,
                deductible: None,
                coinsurance: None,
                notes: Some("Out-of-network provider. Higher costs apply.".to_string()),
            }
        }
    }
}

/// Cost estimation against the built-in plan table.
#[derive(Default)]
pub struct CostService;

impl CostService {
    /// A cost service over the built-in plan table.
    pub fn new() -> Self {
        Self
    }

    /// Estimates for each provider, in input order.
    pub fn estimates(
        &self,
        providers: &[Provider],
        insurance: Option<&BTreeMap<String, String>>,
    ) -> Vec<CostEstimate> {
        let insurer = insurance
            .and_then(|i| i.get("provider"))
            .map(String::as_str)
            .unwrap_or(DEFAULT_INSURER);
        let plan_type = insurance
            .and_then(|i| i.get("plan_type"))
            .map(String::as_str)
            .unwrap_or(DEFAULT_PLAN);
        let plan = find_plan(insurer, plan_type);
        providers.iter().map(|p| estimate(p, plan)).collect()
    }
}

#[async_trait]
impl AgentService for CostService {
    type Action = CostAction;

    fn kind(&self) -> AgentKind {
        AgentKind::Cost
    }

    async fn handle(
        &self,
        _action: CostAction,
        payload: &Payload,
        _ctx: &TaskContext,
    ) -> CarelineResult<Payload> {
        let input: CostInput = from_payload(payload)?;
        let estimates = self.estimates(&input.providers, input.patient_insurance.as_ref());
        info!(count = estimates.len(), "Generated cost estimates");
        to_payload(&CostOutput { estimates })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::catalog::ProviderCatalog;

    fn provider(id: &str) -> Provider {
        ProviderCatalog::seeded().get(id).cloned().unwrap()
    }

    #[test]
    fn test_in_network_estimate() {
        let plan = find_plan("Blue Cross Blue Shield", "PPO");
        let e = estimate(&provider("provider-cardio-001"), plan);
        // copay 30 + min(1500, 370) = 400; low adds (350-400)*0.2, high adds (500-400)*0.2
        assert_eq!(e.estimate_low, 390.0);
        assert_eq!(e.estimate_high, 420.0);
        assert_eq!(e.copay, Some(30.0));
        assert!(e.notes.unwrap().starts_with("In-network"));
    }

    #[test]
    fn test_out_of_network_estimate() {
        let plan = find_plan("Kaiser Permanente", "HMO");
        let e = estimate(&provider("provider-ortho-001"), plan);
        assert_eq!(e.estimate_low, 450.0);
        assert_eq!(e.estimate_high, 900.0);
        assert!(e.copay.is_none());
    }

    #[test]
    fn test_unknown_plan_is_out_of_network() {
        let service = CostService::new();
        let insurance = BTreeMap::from([
            ("provider".to_string(), "Acme Health".to_string()),
            ("plan_type".to_string(), "EPO".to_string()),
        ]);
        let estimates = service.estimates(&[provider("provider-cardio-001")], Some(&insurance));
        assert!(estimates[0].notes.as_deref().unwrap().starts_with("Out-of-network"));
    }

    #[test]
    fn test_default_plan_applies() {
        let service = CostService::new();
        let estimates = service.estimates(&[provider("provider-derm-001")], None);
        assert_eq!(estimates[0].deductible, Some(1500.0));
    }
}
