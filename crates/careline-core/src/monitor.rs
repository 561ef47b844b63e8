use crate::envelope::Payload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default time between two checks of the same monitor.
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 30 * 60;

/// A standing subscription for periodic change checks on one patient or referral.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monitor {
    /// Registry key, see [`Monitor::key_for`].
    pub key: String,
    /// Patient watched.
    pub patient_id: String,
    /// Referral watched, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referral_id: Option<String>,
    /// When monitoring started.
    pub started_at: DateTime<Utc>,
    /// Last time a check ran.
    pub last_check_at: DateTime<Utc>,
    /// Seconds between checks.
    pub check_interval_secs: u64,
    /// Caller-supplied thresholds, stored as given.
    #[serde(default)]
    pub critical_thresholds: Payload,
}

impl Monitor {
    /// The registry key: the referral id when present, otherwise the patient id.
    pub fn key_for(patient_id: &str, referral_id: Option<&str>) -> String {
        referral_id.unwrap_or(patient_id).to_string()
    }

    /// A fresh monitor whose last check is `now`.
    pub fn new(
        patient_id: impl Into<String>,
        referral_id: Option<String>,
        check_interval_secs: u64,
        critical_thresholds: Payload,
    ) -> Self {
        let patient_id = patient_id.into();
        let now = Utc::now();
        Self {
            key: Self::key_for(&patient_id, referral_id.as_deref()),
            patient_id,
            referral_id,
            started_at: now,
            last_check_at: now,
            check_interval_secs,
            critical_thresholds,
        }
    }

    /// Whether the check interval has elapsed since the last check.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        let elapsed = now.signed_duration_since(self.last_check_at);
        u64::try_from(elapsed.num_milliseconds())
            .is_ok_and(|ms| ms >= self.check_interval_secs.saturating_mul(1000))
    }
}
