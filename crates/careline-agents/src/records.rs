use crate::catalog::RecordSource;
use async_trait::async_trait;
use careline_core::events::{RecordsInput, RecordsOutput};
use careline_core::models::MedicalRecord;
use careline_core::{from_payload, to_payload, AgentKind, CarelineError, CarelineResult, Payload};
use careline_orchestrator::cards::object_schema;
use careline_orchestrator::{ActionSet, AgentService, TaskContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// More active medications than this is flagged as polypharmacy.
const POLYPHARMACY_THRESHOLD: usize = 10;

/// Actions of the records agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordsAction {
    /// The normalized record of a patient.
    ParseRecords,
    /// Consistency checks on a patient's record.
    ValidateRecords,
}

impl ActionSet for RecordsAction {
    const ALL: &'static [Self] = &[RecordsAction::ParseRecords, RecordsAction::ValidateRecords];

    fn as_str(&self) -> &'static str {
        match self {
            RecordsAction::ParseRecords => "parse_records",
            RecordsAction::ValidateRecords => "validate_records",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            RecordsAction::ParseRecords => "Normalize a patient's medical record",
            RecordsAction::ValidateRecords => "Check a patient's record for integrity warnings",
        }
    }

    fn input_schema(&self) -> Value {
        match self {
            RecordsAction::ParseRecords => {
                object_schema(&["referral_id", "patient_id"], &["record_sources"])
            }
            RecordsAction::ValidateRecords => object_schema(&["patient_id"], &[]),
        }
    }
}

/// Integrity report for one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordValidation {
    /// No errors were found.
    pub valid: bool,
    /// Problems that make the record unusable.
    pub errors: Vec<String>,
    /// Findings a clinician should look at.
    pub warnings: Vec<String>,
}

/// Check a record for missing identity and clinically notable content.
pub fn validate(record: &MedicalRecord) -> RecordValidation {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if record.patient_id.is_empty() {
        errors.push("Patient ID is required".to_string());
    }

    let active = record
        .medications
        .iter()
        .filter(|m| m.status == "active")
        .count();
    if active > POLYPHARMACY_THRESHOLD {
        warnings.push(
            "Patient is on a high number of medications - check for polypharmacy".to_string(),
        );
    }

    let severe: Vec<&str> = record
        .allergies
        .iter()
        .filter(|a| a.severity == "severe")
        .map(|a| a.allergen.as_str())
        .collect();
    if !severe.is_empty() {
        warnings.push(format!("Patient has severe allergies: {}", severe.join(", ")));
    }

    let abnormal: Vec<&str> = record
        .lab_results
        .iter()
        .filter(|l| l.status == "abnormal" || l.status == "critical")
        .map(|l| l.test_name.as_str())
        .collect();
    if !abnormal.is_empty() {
        warnings.push(format!("Abnormal lab values found: {}", abnormal.join(", ")));
    }

    RecordValidation {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

/// Serves normalized records from a [`RecordSource`].
pub struct RecordsService {
    source: Arc<RecordSource>,
}

impl RecordsService {
    /// Records agent reading from `source`.
    pub fn new(source: Arc<RecordSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl AgentService for RecordsService {
    type Action = RecordsAction;

    fn kind(&self) -> AgentKind {
        AgentKind::Records
    }

    async fn handle(
        &self,
        action: RecordsAction,
        payload: &Payload,
        _ctx: &TaskContext,
    ) -> CarelineResult<Payload> {
        match action {
            RecordsAction::ParseRecords => {
                let input: RecordsInput = from_payload(payload)?;
                let medical_record = self.source.get(&input.patient_id)?;
                let records_processed = (medical_record.conditions.len()
                    + medical_record.medications.len()
                    + medical_record.lab_results.len()) as u32;
                info!(
                    patient_id = %input.patient_id,
                    records_processed,
                    "Processed medical records"
                );
                to_payload(&RecordsOutput {
                    medical_record,
                    records_processed,
                })
            }
            RecordsAction::ValidateRecords => {
                let patient_id = payload
                    .get("patient_id")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| CarelineError::validation("patient_id required"))?;
                to_payload(&validate(&self.source.get(patient_id)?))
            }
        }
    }
}
