//! In-memory implementations of the loop agent's collaborators.

use async_trait::async_trait;
use careline_core::{CarelineResult, ClinicianBrief, Monitor, Referral};
use careline_orchestrator::{BriefStore, ChangeSignal, Notifier, ReferralLookup, UpdateNotification};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::info;

/// Referral store keyed by referral id.
#[derive(Default)]
pub struct InMemoryReferrals {
    referrals: RwLock<BTreeMap<String, Referral>>,
}

impl InMemoryReferrals {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a referral by id.
    pub fn upsert(&self, referral: Referral) {
        self.referrals.write().insert(referral.id.clone(), referral);
    }

    /// Referral by id.
    pub fn get(&self, referral_id: &str) -> Option<Referral> {
        self.referrals.read().get(referral_id).cloned()
    }
}

#[async_trait]
impl ReferralLookup for InMemoryReferrals {
    async fn active_referrals(&self, patient_id: &str) -> CarelineResult<Vec<Referral>> {
        Ok(self
            .referrals
            .read()
            .values()
            .filter(|r| r.patient_id == patient_id && r.status.is_active())
            .cloned()
            .collect())
    }
}

/// Latest clinician brief per referral.
#[derive(Default)]
pub struct InMemoryBriefStore {
    briefs: RwLock<HashMap<String, ClinicianBrief>>,
}

impl InMemoryBriefStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of referrals with a stored brief.
    pub fn len(&self) -> usize {
        self.briefs.read().len()
    }

    /// Whether no brief has been stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BriefStore for InMemoryBriefStore {
    async fn last_brief(&self, referral_id: &str) -> CarelineResult<Option<ClinicianBrief>> {
        Ok(self.briefs.read().get(referral_id).cloned())
    }

    async fn save_brief(&self, brief: &ClinicianBrief) -> CarelineResult<()> {
        self.briefs
            .write()
            .insert(brief.referral_id.clone(), brief.clone());
        Ok(())
    }
}

/// Logs each notification and keeps them for inspection.
#[derive(Default)]
pub struct LogNotifier {
    sent: Mutex<Vec<UpdateNotification>>,
}

impl LogNotifier {
    /// A notifier with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every notification delivered so far, oldest first.
    pub fn sent(&self) -> Vec<UpdateNotification> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &UpdateNotification) -> CarelineResult<()> {
        info!(
            referral_id = %notification.referral_id,
            patient_id = %notification.patient_id,
            message = %notification.message,
            "Update notification"
        );
        self.sent.lock().push(notification.clone());
        Ok(())
    }
}

/// Change signal driven explicitly: a monitor reports new data once after
/// its key has been flagged.
#[derive(Default)]
pub struct ManualChangeSignal {
    pending: Mutex<HashSet<String>>,
}

impl ManualChangeSignal {
    /// A signal with nothing flagged.
    pub fn new() -> Self {
        Self::default()
    }

    /// Report new data for `monitor_key` on its next check.
    pub fn flag(&self, monitor_key: impl Into<String>) {
        self.pending.lock().insert(monitor_key.into());
    }

    /// Whether `monitor_key` is flagged and not yet consumed.
    pub fn is_flagged(&self, monitor_key: &str) -> bool {
        self.pending.lock().contains(monitor_key)
    }
}

#[async_trait]
impl ChangeSignal for ManualChangeSignal {
    async fn has_new_data(&self, monitor: &Monitor) -> CarelineResult<bool> {
        Ok(self.pending.lock().remove(&monitor.key))
    }
}
