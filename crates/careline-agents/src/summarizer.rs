use crate::catalog::RecordSource;
use async_trait::async_trait;
use careline_core::events::{SummarizerInput, SummarizerOutput};
use careline_core::models::{MedicalRecord, PatientExplainer, Urgency};
use careline_core::{
    from_payload, to_payload, AgentKind, CarelineResult, ClinicianBrief, Payload, Referral,
};
use careline_orchestrator::cards::object_schema;
use careline_orchestrator::{ActionSet, AgentService, TaskContext};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Actions of the summarizer agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummarizerAction {
    /// Clinician brief and patient explainer for one referral.
    GenerateSummaries,
}

impl ActionSet for SummarizerAction {
    const ALL: &'static [Self] = &[SummarizerAction::GenerateSummaries];

    fn as_str(&self) -> &'static str {
        "generate_summaries"
    }

    fn description(&self) -> &'static str {
        "Clinician brief and patient explainer for a referral"
    }

    fn input_schema(&self) -> Value {
        object_schema(
            &["referral_id", "patient_id", "referral"],
            &["medical_record"],
        )
    }
}

/// Format a lab result as `"<test>: <value> <unit> (<status>)"`.
pub fn lab_line(test: &str, value: &str, unit: Option<&str>, status: &str) -> String {
    match unit.filter(|u| !u.is_empty()) {
        Some(unit) => format!("{test}: {value} {unit} ({status})"),
        None => format!("{test}: {value} ({status})"),
    }
}

/// Structured clinician brief derived from a record.
pub fn clinician_brief(referral: &Referral, record: &MedicalRecord) -> ClinicianBrief {
    let problem_list: Vec<String> = record
        .conditions
        .iter()
        .filter(|c| c.status == "active")
        .map(|c| c.display.clone())
        .collect();
    let current_medications = record
        .medications
        .iter()
        .filter(|m| m.status == "active")
        .map(|m| format!("{} {} {}", m.name, m.dosage, m.frequency))
        .collect();
    let allergies = record
        .allergies
        .iter()
        .map(|a| format!("{} ({})", a.allergen, a.reaction))
        .collect();
    let key_labs = record
        .lab_results
        .iter()
        .map(|l| lab_line(&l.test_name, &l.value, l.unit.as_deref(), &l.status))
        .collect();

    let mut red_flags: Vec<String> = record
        .lab_results
        .iter()
        .filter(|l| l.status == "critical")
        .map(|l| format!("Critical lab: {}", lab_line(&l.test_name, &l.value, l.unit.as_deref(), &l.status)))
        .collect();
    red_flags.extend(
        record
            .allergies
            .iter()
            .filter(|a| a.severity == "severe")
            .map(|a| format!("Severe allergy: {} ({})", a.allergen, a.reaction)),
    );

    let specialty = display_specialty(referral);
    let clinical_summary = if problem_list.is_empty() {
        format!("Patient referred to {specialty} for {}.", reason(referral))
    } else {
        format!(
            "Patient referred to {specialty} for {}. Active problems: {}.",
            reason(referral),
            problem_list.join("; ")
        )
    };

    let mut recommendations = vec![format!("{specialty} consultation")];
    if !red_flags.is_empty() {
        recommendations.push("Review red flags before the visit".to_string());
    }
    if referral.urgency != Urgency::Routine {
        recommendations.push("Prioritize scheduling".to_string());
    }

    ClinicianBrief {
        id: format!("brief-{}", referral.id),
        referral_id: referral.id.clone(),
        patient_id: record.patient_id.clone(),
        problem_list,
        current_medications,
        allergies,
        key_labs,
        red_flags,
        clinical_summary,
        recommendations,
        generated_at: Utc::now(),
    }
}

/// Plain-language explanation for the patient.
pub fn patient_explainer(referral: &Referral, patient_id: &str) -> PatientExplainer {
    let specialty = display_specialty(referral);
    let what_to_expect = match referral.urgency {
        Urgency::Stat => "You should be seen within the next few days. Your specialist will review your records and examine you.",
        Urgency::Urgent => "You should be seen within a week. Your specialist will review your records and examine you.",
        Urgency::Routine => "Your first visit will be a consultation where the specialist reviews your history and examines you.",
    };
    PatientExplainer {
        id: format!("explainer-{}", referral.id),
        referral_id: referral.id.clone(),
        patient_id: patient_id.to_string(),
        summary: format!(
            "Your doctor has referred you to a {specialty} specialist for {}.",
            reason(referral)
        ),
        what_to_expect: what_to_expect.to_string(),
        what_to_bring: vec![
            "Photo ID and insurance card".to_string(),
            "List of current medications".to_string(),
            "Recent test results".to_string(),
        ],
        questions: vec![
            "What is causing my symptoms?".to_string(),
            "What tests will I need?".to_string(),
            "How will this affect my current treatment?".to_string(),
        ],
        generated_at: Utc::now(),
    }
}

fn display_specialty(referral: &Referral) -> &str {
    if referral.specialty.is_empty() {
        "specialist care"
    } else {
        &referral.specialty
    }
}

fn reason(referral: &Referral) -> &str {
    if referral.reason.is_empty() {
        "further evaluation"
    } else {
        &referral.reason
    }
}

/// Summary generation. Falls back to the record source when the request
/// carries no record.
pub struct SummarizerService {
    records: Arc<RecordSource>,
}

impl SummarizerService {
    /// Summarizer falling back to `records` when no record is supplied.
    pub fn new(records: Arc<RecordSource>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl AgentService for SummarizerService {
    type Action = SummarizerAction;

    fn kind(&self) -> AgentKind {
        AgentKind::Summarizer
    }

    async fn handle(
        &self,
        _action: SummarizerAction,
        payload: &Payload,
        _ctx: &TaskContext,
    ) -> CarelineResult<Payload> {
        let input: SummarizerInput = from_payload(payload)?;
        let record = match input.medical_record {
            Some(record) => record,
            None => self.records.get(&input.patient_id)?,
        };
        let clinician_brief = clinician_brief(&input.referral, &record);
        let patient_explainer = patient_explainer(&input.referral, &input.patient_id);
        info!(
            referral_id = %input.referral_id,
            problems = clinician_brief.problem_list.len(),
            red_flags = clinician_brief.red_flags.len(),
            "Generated summaries"
        );
        to_payload(&SummarizerOutput {
            clinician_brief,
            patient_explainer,
        })
    }
}
