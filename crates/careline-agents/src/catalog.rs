//! Seed data: the provider directory and the patient record source.

use careline_core::models::{Allergy, Condition, LabResult, MedicalRecord, Medication, Provider};
use careline_core::{CarelineError, CarelineResult};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// Searchable set of providers.
pub struct ProviderCatalog {
    providers: Vec<Provider>,
}

impl ProviderCatalog {
    /// Catalog over the given providers.
    pub fn new(providers: Vec<Provider>) -> Self {
        Self { providers }
    }

    /// The built-in San Francisco directory.
    pub fn seeded() -> Self {
        Self::new(vec![
            provider(
                "provider-cardio-001",
                "Dr. Sarah Chen",
                "1234567890",
                "Cardiology",
                "Heart & Vascular Institute",
                ("123 Medical Drive", "94102"),
                "(555) 123-4567",
                2.5,
                4.8,
            ),
            provider(
                "provider-cardio-002",
                "Dr. Michael Rodriguez",
                "1234567891",
                "Cardiology",
                "Bay Area Cardiology",
                ("456 Health Plaza", "94105"),
                "(555) 987-6543",
                4.2,
                4.7,
            ),
            provider(
                "provider-cardio-003",
                "Dr. Jennifer Kim",
                "1234567892",
                "Cardiology",
                "UCSF Cardiology",
                ("789 Parnassus Ave", "94143"),
                "(555) 456-7890",
                3.8,
                4.9,
            ),
            provider(
                "provider-derm-001",
                "Dr. Alex Thompson",
                "1234567893",
                "Dermatology",
                "SF Dermatology Center",
                ("321 Market Street", "94102"),
                "(555) 234-5678",
                1.2,
                4.6,
            ),
            provider(
                "provider-ortho-001",
                "Dr. Lisa Park",
                "1234567894",
                "Orthopedics",
                "Bay Area Orthopedics",
                ("654 Mission Street", "94105"),
                "(555) 345-6789",
                2.1,
                4.7,
            ),
        ])
    }

    /// Every provider, in catalog order.
    pub fn all(&self) -> &[Provider] {
        &self.providers
    }

    /// Provider by id.
    pub fn get(&self, id: &str) -> Option<&Provider> {
        self.providers.iter().find(|p| p.id == id)
    }
}

#[allow(clippy::too_many_arguments)]
fn provider(
    id: &str,
    name: &str,
    npi: &str,
    specialty: &str,
    practice: &str,
    (street, zip): (&str, &str),
    phone: &str,
    distance_km: f64,
    rating: f64,
) -> Provider {
    let address = BTreeMap::from([
        ("street".to_string(), street.to_string()),
        ("city".to_string(), "San Francisco".to_string()),
        ("state".to_string(), "CA".to_string()),
        ("zip_code".to_string(), zip.to_string()),
    ]);
    Provider {
        id: id.to_string(),
        name: name.to_string(),
        npi_number: npi.to_string(),
        specialty: specialty.to_string(),
        practice: practice.to_string(),
        address,
        phone: phone.to_string(),
        email: None,
        distance_km: Some(distance_km),
        in_network: true,
        rating: Some(rating),
        accepting_new_patients: true,
    }
}

/// Normalized medical records keyed by patient id.
///
/// Writable so that a record update can be simulated while agents run.
#[derive(Default)]
pub struct RecordSource {
    records: RwLock<HashMap<String, MedicalRecord>>,
}

impl RecordSource {
    /// An empty record source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records for `patient-001` (ischemic heart disease) and `patient-002`
    /// (atrial fibrillation).
    pub fn seeded() -> Self {
        let source = Self::new();
        source.upsert(patient_001());
        source.upsert(patient_002());
        source
    }

    /// The patient's record, or a validation error when none exists.
    pub fn get(&self, patient_id: &str) -> CarelineResult<MedicalRecord> {
        self.records.read().get(patient_id).cloned().ok_or_else(|| {
            CarelineError::validation(format!("No medical records found for patient {patient_id}"))
        })
    }

    /// Insert or replace the record of `record.patient_id`.
    pub fn upsert(&self, record: MedicalRecord) {
        self.records.write().insert(record.patient_id.clone(), record);
    }

    /// Append a lab result to a patient's record and bump `updated_at`.
    pub fn add_lab(&self, patient_id: &str, lab: LabResult) -> CarelineResult<()> {
        let mut records = self.records.write();
        let record = records.get_mut(patient_id).ok_or_else(|| {
            CarelineError::validation(format!("No medical records found for patient {patient_id}"))
        })?;
        record.lab_results.push(lab);
        record.updated_at = Utc::now();
        Ok(())
    }
}

fn condition(code: &str, display: &str) -> Condition {
    Condition {
        code: code.to_string(),
        display: display.to_string(),
        status: "active".to_string(),
    }
}

fn medication(name: &str, dosage: &str, frequency: &str) -> Medication {
    Medication {
        name: name.to_string(),
        dosage: dosage.to_string(),
        frequency: frequency.to_string(),
        status: "active".to_string(),
    }
}

fn allergy(allergen: &str, reaction: &str, severity: &str) -> Allergy {
    Allergy {
        allergen: allergen.to_string(),
        reaction: reaction.to_string(),
        severity: severity.to_string(),
    }
}

/// Build a lab result entry.
pub fn lab(test_name: &str, value: &str, unit: &str, status: &str, date: &str) -> LabResult {
    LabResult {
        test_name: test_name.to_string(),
        value: value.to_string(),
        unit: Some(unit.to_string()).filter(|u| !u.is_empty()),
        status: status.to_string(),
        date: date.to_string(),
    }
}

fn record(patient_id: &str) -> MedicalRecord {
    let now = Utc::now();
    MedicalRecord {
        id: format!("record-{patient_id}"),
        patient_id: patient_id.to_string(),
        conditions: Vec::new(),
        medications: Vec::new(),
        allergies: Vec::new(),
        lab_results: Vec::new(),
        created_at: now,
        updated_at: now,
    }
}

fn patient_001() -> MedicalRecord {
    MedicalRecord {
        conditions: vec![
            condition("I25.9", "Chronic ischemic heart disease, unspecified"),
            condition("I10", "Essential hypertension"),
            condition("E78.5", "Hyperlipidemia, unspecified"),
        ],
        medications: vec![
            medication("Metoprolol", "50mg", "twice daily"),
            medication("Lisinopril", "10mg", "once daily"),
            medication("Atorvastatin", "20mg", "once daily at bedtime"),
            medication("Aspirin", "81mg", "once daily"),
        ],
        allergies: vec![
            allergy("Penicillin", "Skin rash, hives", "moderate"),
            allergy("Shellfish", "Anaphylaxis", "severe"),
        ],
        lab_results: vec![
            lab("BNP", "450", "pg/mL", "abnormal", "2024-01-10"),
            lab("Troponin I", "<0.01", "ng/mL", "normal", "2024-01-10"),
            lab("Creatinine", "1.2", "mg/dL", "normal", "2024-01-10"),
            lab("LDL Cholesterol", "95", "mg/dL", "normal", "2024-01-05"),
        ],
        ..record("patient-001")
    }
}

fn patient_002() -> MedicalRecord {
    MedicalRecord {
        conditions: vec![
            condition("I48.91", "Atrial fibrillation, unspecified"),
            condition("I10", "Essential hypertension"),
        ],
        medications: vec![
            medication("Amlodipine", "5mg", "once daily"),
            medication("Hydrochlorothiazide", "25mg", "once daily"),
        ],
        allergies: vec![allergy("No known drug allergies", "None", "mild")],
        lab_results: vec![
            lab("TSH", "2.1", "mIU/L", "normal", "2024-01-18"),
            lab("Sodium", "140", "mmol/L", "normal", "2024-01-18"),
        ],
        ..record("patient-002")
    }
}
