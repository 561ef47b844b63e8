//! Inbound events and the typed inputs/outputs of every worker action.

use crate::envelope::{from_payload, Payload};
use crate::error::{CarelineError, CarelineResult};
use crate::models::{
    AvailabilitySlot, ClinicianBrief, CostEstimate, MedicalRecord, PatientExplainer, Provider,
    Referral, Urgency,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Discriminator carried in the `type` field of every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    /// `referral.created`
    #[serde(rename = "referral.created")]
    ReferralCreated,
    /// `records.updated`
    #[serde(rename = "records.updated")]
    RecordsUpdated,
}

fn expect_type(actual: EventType, expected: EventType) -> CarelineResult<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(CarelineError::validation(format!(
            "expected event type {expected:?}, got {actual:?}"
        )))
    }
}

/// A new referral entered the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferralCreatedEvent {
    /// Always [`EventType::ReferralCreated`].
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Id of the new referral.
    pub referral_id: String,
    /// Patient the referral is for.
    pub patient_id: String,
    /// Requested specialty.
    pub specialty: String,
    /// When the referral was created.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Full referral, when the sender has it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referral: Option<Referral>,
}

impl ReferralCreatedEvent {
    /// Build an event for the given referral.
    pub fn new(
        referral_id: impl Into<String>,
        patient_id: impl Into<String>,
        specialty: impl Into<String>,
    ) -> Self {
        Self {
            event_type: EventType::ReferralCreated,
            referral_id: referral_id.into(),
            patient_id: patient_id.into(),
            specialty: specialty.into(),
            timestamp: Utc::now(),
            referral: None,
        }
    }

    /// Decode and check the discriminator.
    pub fn from_payload(payload: &Payload) -> CarelineResult<Self> {
        let event: Self = from_payload(payload)?;
        expect_type(event.event_type, EventType::ReferralCreated)?;
        Ok(event)
    }

    /// The referral carried by the event, or one reconstructed from its fields.
    pub fn referral(&self) -> Referral {
        self.referral.clone().unwrap_or_else(|| Referral {
            id: self.referral_id.clone(),
            patient_id: self.patient_id.clone(),
            specialty: self.specialty.clone(),
            reason: String::new(),
            urgency: Urgency::default(),
            status: Default::default(),
            notes: None,
        })
    }
}

/// A patient's records changed upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordsUpdatedEvent {
    /// Always [`EventType::RecordsUpdated`].
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Patient whose records changed.
    pub patient_id: String,
    /// Referral the change was detected for, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referral_id: Option<String>,
    /// When the change was observed.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl RecordsUpdatedEvent {
    /// Build an event for the given patient.
    pub fn new(patient_id: impl Into<String>, referral_id: Option<String>) -> Self {
        Self {
            event_type: EventType::RecordsUpdated,
            patient_id: patient_id.into(),
            referral_id,
            timestamp: Utc::now(),
        }
    }

    /// Decode and check the discriminator.
    pub fn from_payload(payload: &Payload) -> CarelineResult<Self> {
        let event: Self = from_payload(payload)?;
        expect_type(event.event_type, EventType::RecordsUpdated)?;
        Ok(event)
    }
}

/// Input of the directory agent's `find_providers`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryInput {
    /// Referral the lookup is for.
    pub referral_id: String,
    /// Specialty to search, case-insensitive.
    pub specialty: String,
    /// Patient the providers are for.
    pub patient_id: String,
    /// Patient location, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip_code: Option<String>,
}

/// Output of `find_providers`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryOutput {
    /// Best matches first.
    pub providers: Vec<Provider>,
}

/// Input of the records agent's `parse_records`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordsInput {
    /// Referral the records are for.
    pub referral_id: String,
    /// Patient whose record is parsed.
    pub patient_id: String,
    /// Source systems to read, all when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_sources: Option<Vec<String>>,
}

/// Output of `parse_records`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordsOutput {
    /// The normalized record.
    pub medical_record: MedicalRecord,
    /// Number of conditions, medications and labs read.
    pub records_processed: u32,
}

/// Input of the availability agent's `get_availability`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityInput {
    /// Referral the slots are for.
    pub referral_id: String,
    /// Providers to look up.
    pub provider_ids: Vec<String>,
    /// Urgency that sets the booking window.
    #[serde(default)]
    pub urgency: Urgency,
}

/// Output of `get_availability`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityOutput {
    /// Slots of all requested providers, sorted by time.
    pub availability: Vec<AvailabilitySlot>,
}

/// Input of the cost agent's `estimate_costs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostInput {
    /// Referral the estimates are for.
    pub referral_id: String,
    /// Providers to estimate.
    pub providers: Vec<Provider>,
    /// `provider` (insurer name) and `plan_type`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_insurance: Option<BTreeMap<String, String>>,
}

/// Output of `estimate_costs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostOutput {
    /// One estimate per provider, in input order.
    pub estimates: Vec<CostEstimate>,
}

/// Input of the summarizer agent's `generate_summaries`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummarizerInput {
    /// Referral being summarized.
    pub referral_id: String,
    /// Patient being summarized.
    pub patient_id: String,
    /// The referral itself.
    pub referral: Referral,
    /// Record to summarize; looked up by patient id when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medical_record: Option<MedicalRecord>,
}

/// Output of `generate_summaries`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummarizerOutput {
    /// Summary for the receiving clinician.
    pub clinician_brief: ClinicianBrief,
    /// Plain-language summary for the patient.
    pub patient_explainer: PatientExplainer,
}
