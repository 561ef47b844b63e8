//! Referral domain records exchanged between agents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How soon a referral must be seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    /// Weeks to months.
    #[default]
    Routine,
    /// Within a week.
    Urgent,
    /// Within days.
    Stat,
}

/// Lifecycle of a referral in the referral store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferralStatus {
    /// Created, not yet sent.
    #[default]
    Pending,
    /// Sent to the specialist.
    Sent,
    /// Appointment booked.
    Scheduled,
    /// Visit done.
    Completed,
    /// Withdrawn.
    Cancelled,
}

impl ReferralStatus {
    /// Referrals that still need monitoring.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ReferralStatus::Pending | ReferralStatus::Sent | ReferralStatus::Scheduled
        )
    }
}

/// A referral from one doctor to a specialty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Referral {
    /// Referral id.
    pub id: String,
    /// Referred patient.
    pub patient_id: String,
    /// Target specialty.
    #[serde(default)]
    pub specialty: String,
    /// Clinical reason for the referral.
    #[serde(default)]
    pub reason: String,
    /// How soon the patient must be seen.
    #[serde(default)]
    pub urgency: Urgency,
    /// Lifecycle state.
    #[serde(default)]
    pub status: ReferralStatus,
    /// Free-text notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A specialist in the provider directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    /// Directory id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// National provider identifier.
    pub npi_number: String,
    /// Specialty.
    pub specialty: String,
    /// Practice or clinic name.
    pub practice: String,
    /// Address parts: `street`, `city`, `state`, `zip_code`.
    #[serde(default)]
    pub address: BTreeMap<String, String>,
    /// Office phone.
    pub phone: String,
    /// Contact email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Distance from the patient in kilometres.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
    /// Whether the provider is in the patient's network.
    #[serde(default = "default_true")]
    pub in_network: bool,
    /// Average rating, 0 to 5.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    /// Whether the provider takes new patients.
    #[serde(default = "default_true")]
    pub accepting_new_patients: bool,
}

fn default_true() -> bool {
    true
}

/// One bookable appointment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilitySlot {
    /// Provider offering the slot.
    pub provider_id: String,
    /// Start time.
    pub slot: DateTime<Utc>,
    /// Minutes.
    pub duration: u32,
    /// Visit type, e.g. `Urgent consultation`.
    pub appointment_type: String,
}

/// Expected out-of-pocket cost at one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    /// Provider the estimate is for.
    pub provider_id: String,
    /// Lower bound in dollars.
    pub estimate_low: f64,
    /// Upper bound in dollars.
    pub estimate_high: f64,
    /// Plan copay, in network only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copay: Option<f64>,
    /// Plan deductible, in network only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deductible: Option<f64>,
    /// Plan coinsurance, in network only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coinsurance: Option<f64>,
    /// Caveats such as out-of-network pricing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A diagnosis on the patient's record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Diagnosis code.
    pub code: String,
    /// Human-readable diagnosis.
    pub display: String,
    /// `active` or `resolved`.
    pub status: String,
}

/// A prescribed medication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medication {
    /// Drug name.
    pub name: String,
    /// Dose, e.g. `50mg`.
    pub dosage: String,
    /// How often it is taken.
    pub frequency: String,
    /// `active` or `discontinued`.
    pub status: String,
}

/// A recorded allergy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allergy {
    /// What the patient reacts to.
    pub allergen: String,
    /// Observed reaction.
    pub reaction: String,
    /// `mild`, `moderate` or `severe`.
    pub severity: String,
}

/// A single lab measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabResult {
    /// Test name.
    pub test_name: String,
    /// Measured value as reported.
    pub value: String,
    /// Unit of `value`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// `normal`, `abnormal` or `critical`.
    pub status: String,
    /// Collection date.
    pub date: String,
}

/// A patient's normalized medical record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicalRecord {
    /// Record id.
    pub id: String,
    /// Patient the record belongs to.
    pub patient_id: String,
    /// Diagnoses.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Medications.
    #[serde(default)]
    pub medications: Vec<Medication>,
    /// Allergies.
    #[serde(default)]
    pub allergies: Vec<Allergy>,
    /// Lab results.
    #[serde(default)]
    pub lab_results: Vec<LabResult>,
    /// When the record was first created.
    pub created_at: DateTime<Utc>,
    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
}

/// Structured summary handed to the receiving specialist. This is the
/// snapshot the monitoring engine compares between generations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicianBrief {
    /// Brief id.
    pub id: String,
    /// Referral summarized.
    pub referral_id: String,
    /// Patient summarized.
    pub patient_id: String,
    /// Active conditions.
    #[serde(default)]
    pub problem_list: Vec<String>,
    /// Medications as `name dosage frequency`.
    #[serde(default)]
    pub current_medications: Vec<String>,
    /// Allergies as `allergen (reaction)`.
    #[serde(default)]
    pub allergies: Vec<String>,
    /// Labs as `test: value unit (status)`.
    #[serde(default)]
    pub key_labs: Vec<String>,
    /// Findings needing attention before the visit.
    #[serde(default)]
    pub red_flags: Vec<String>,
    /// Narrative summary.
    #[serde(default)]
    pub clinical_summary: String,
    /// Suggested next steps.
    #[serde(default)]
    pub recommendations: Vec<String>,
    /// Generation time.
    pub generated_at: DateTime<Utc>,
}

/// Plain-language explanation of the referral for the patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientExplainer {
    /// Explainer id.
    pub id: String,
    /// Referral explained.
    pub referral_id: String,
    /// Patient addressed.
    pub patient_id: String,
    /// Why the patient is being referred.
    pub summary: String,
    /// What happens at the visit.
    pub what_to_expect: String,
    /// Items to bring to the visit.
    #[serde(default)]
    pub what_to_bring: Vec<String>,
    /// Questions to ask the specialist.
    #[serde(default)]
    pub questions: Vec<String>,
    /// Generation time.
    pub generated_at: DateTime<Utc>,
}

/// Aggregate result of one orchestration run. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionCard {
    /// Referral the card answers.
    pub referral_id: String,
    /// Candidate providers, best first.
    pub providers: Vec<Provider>,
    /// Open slots; empty when availability failed.
    pub availability: Vec<AvailabilitySlot>,
    /// Cost estimates; empty when costing failed.
    pub cost_estimates: Vec<CostEstimate>,
    /// Absent when summarization failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_explainer: Option<PatientExplainer>,
    /// When the card was built.
    pub created_at: DateTime<Utc>,
}
