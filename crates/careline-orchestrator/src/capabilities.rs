//! Collaborators the monitoring engine depends on, injected at construction.

use async_trait::async_trait;
use careline_core::{CarelineResult, ClinicianBrief, Monitor, Referral};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Finds the referrals still in progress for a patient.
#[async_trait]
pub trait ReferralLookup: Send + Sync {
    async fn active_referrals(&self, patient_id: &str) -> CarelineResult<Vec<Referral>>;
}

/// Keeps the most recent clinician brief per referral.
#[async_trait]
pub trait BriefStore: Send + Sync {
    async fn last_brief(&self, referral_id: &str) -> CarelineResult<Option<ClinicianBrief>>;

    async fn save_brief(&self, brief: &ClinicianBrief) -> CarelineResult<()>;
}

/// Delivers update notifications to whoever follows a referral.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &UpdateNotification) -> CarelineResult<()>;
}

/// Decides whether a monitored subject has new upstream data.
#[async_trait]
pub trait ChangeSignal: Send + Sync {
    async fn has_new_data(&self, monitor: &Monitor) -> CarelineResult<bool>;
}

/// Kind of update notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// The clinician brief changed significantly.
    SignificantUpdate,
}

/// Sent when a regenerated brief differs significantly from the last one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateNotification {
    /// Referral the update concerns.
    pub referral_id: String,
    /// Patient the update concerns.
    pub patient_id: String,
    /// Serialized as `type`.
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    /// Human-readable text.
    pub message: String,
    /// When the notification was built.
    pub timestamp: DateTime<Utc>,
}

impl UpdateNotification {
    /// Notification that a referral's summary was refreshed with significant changes.
    pub fn significant_update(referral_id: impl Into<String>, patient_id: impl Into<String>) -> Self {
        let referral_id = referral_id.into();
        Self {
            message: format!("Updated medical summary available for referral {referral_id}"),
            referral_id,
            patient_id: patient_id.into(),
            kind: NotificationKind::SignificantUpdate,
            timestamp: Utc::now(),
        }
    }
}
