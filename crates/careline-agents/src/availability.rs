use async_trait::async_trait;
use careline_core::events::{AvailabilityInput, AvailabilityOutput};
use careline_core::models::{AvailabilitySlot, Urgency};
use careline_core::{from_payload, to_payload, AgentKind, CarelineResult, Payload};
use careline_orchestrator::cards::object_schema;
use careline_orchestrator::{ActionSet, AgentService, TaskContext};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde_json::Value;
use tracing::info;

/// First clinic hour of the day.
const OPENING_HOUR: u32 = 8;
/// Number of distinct starting hours offered (8:00 through 16:30).
const CLINIC_HOURS: u32 = 9;

/// Actions of the availability agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityAction {
    /// Open slots for each provider, sorted by time.
    GetAvailability,
}

impl ActionSet for AvailabilityAction {
    const ALL: &'static [Self] = &[AvailabilityAction::GetAvailability];

    fn as_str(&self) -> &'static str {
        "get_availability"
    }

    fn description(&self) -> &'static str {
        "Open appointment slots for each provider within the urgency window"
    }

    fn input_schema(&self) -> Value {
        object_schema(&["referral_id", "provider_ids"], &["urgency"])
    }
}

/// Booking horizon for one urgency level, in days from today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UrgencyWindow {
    /// First day offset from the origin, inclusive.
    pub first_day: i64,
    /// Last day offset from the origin, inclusive.
    pub last_day: i64,
    /// Slots offered per provider.
    pub slots: i64,
}

/// Booking window for an urgency level.
pub fn window(urgency: Urgency) -> UrgencyWindow {
    match urgency {
        Urgency::Stat => UrgencyWindow {
            first_day: 0,
            last_day: 3,
            slots: 2,
        },
        Urgency::Urgent => UrgencyWindow {
            first_day: 1,
            last_day: 7,
            slots: 3,
        },
        Urgency::Routine => UrgencyWindow {
            first_day: 7,
            last_day: 60,
            slots: 5,
        },
    }
}

/// Visit length in minutes, by the specialty encoded in the provider id.
pub fn appointment_duration(provider_id: &str) -> u32 {
    if provider_id.contains("cardio") {
        60
    } else if provider_id.contains("derm") {
        30
    } else {
        45
    }
}

/// Appointment type offered for an urgency level.
pub fn appointment_type(urgency: Urgency) -> &'static str {
    match urgency {
        Urgency::Stat => "emergency_consultation",
        Urgency::Urgent => "urgent_consultation",
        Urgency::Routine => "new_patient_consultation",
    }
}

/// Deterministic slot generator: the same provider, urgency and day always
/// yield the same slots.
#[derive(Default)]
pub struct AvailabilityService {
    origin: Option<DateTime<Utc>>,
}

impl AvailabilityService {
    /// Slots counted from the current time.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute slots relative to a fixed instant instead of the current time.
    pub fn with_origin(origin: DateTime<Utc>) -> Self {
        Self {
            origin: Some(origin),
        }
    }

    /// Slots for one provider, spread evenly over the urgency window.
    pub fn slots_for(&self, provider_id: &str, urgency: Urgency) -> Vec<AvailabilitySlot> {
        let origin = self.origin.unwrap_or_else(Utc::now);
        let today = origin.date_naive();
        let w = window(urgency);
        let span = w.last_day - w.first_day;
        let seed: u32 = provider_id.bytes().map(u32::from).sum();

        (0..w.slots)
            .filter_map(|i| {
                let day = w.first_day + i * span / w.slots;
                let step = i as u32;
                let hour = OPENING_HOUR + (seed + step * 4) % CLINIC_HOURS;
                let minute = if (seed + step) % 2 == 0 { 0 } else { 30 };
                let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
                let slot = (today + Duration::days(day)).and_time(time).and_utc();
                Some(AvailabilitySlot {
                    provider_id: provider_id.to_string(),
                    slot,
                    duration: appointment_duration(provider_id),
                    appointment_type: appointment_type(urgency).to_string(),
                })
            })
            .collect()
    }

    /// Slots for every provider, earliest first.
    pub fn availability(&self, provider_ids: &[String], urgency: Urgency) -> Vec<AvailabilitySlot> {
        let mut slots: Vec<AvailabilitySlot> = provider_ids
            .iter()
            .flat_map(|id| self.slots_for(id, urgency))
            .collect();
        slots.sort_by(|a, b| a.slot.cmp(&b.slot).then_with(|| a.provider_id.cmp(&b.provider_id)));
        slots
    }
}

#[async_trait]
impl AgentService for AvailabilityService {
    type Action = AvailabilityAction;

    fn kind(&self) -> AgentKind {
        AgentKind::Availability
    }

    async fn handle(
        &self,
        _action: AvailabilityAction,
        payload: &Payload,
        _ctx: &TaskContext,
    ) -> CarelineResult<Payload> {
        let input: AvailabilityInput = from_payload(payload)?;
        let availability = self.availability(&input.provider_ids, input.urgency);
        info!(
            providers = input.provider_ids.len(),
            slots = availability.len(),
            "Found available slots"
        );
        to_payload(&AvailabilityOutput { availability })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn origin() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 6, 0, 0).unwrap()
    }

    #[test]
    fn test_slot_counts_and_windows() {
        let service = AvailabilityService::with_origin(origin());
        for urgency in [Urgency::Stat, Urgency::Urgent, Urgency::Routine] {
            let w = window(urgency);
            let slots = service.slots_for("provider-cardio-001", urgency);
            assert_eq!(slots.len() as i64, w.slots);
            for s in &slots {
                let days = (s.slot.date_naive() - origin().date_naive()).num_days();
                assert!(days >= w.first_day && days <= w.last_day, "{urgency:?}: {days}");
                assert_eq!(s.appointment_type, appointment_type(urgency));
            }
        }
    }

    #[test]
    fn test_durations_by_specialty() {
        assert_eq!(appointment_duration("provider-cardio-002"), 60);
        assert_eq!(appointment_duration("provider-derm-001"), 30);
        assert_eq!(appointment_duration("provider-ortho-001"), 45);
        assert_eq!(appointment_duration("provider-neuro-001"), 45);
    }

    #[test]
    fn test_deterministic_and_sorted() {
        let service = AvailabilityService::with_origin(origin());
        let ids = vec!["provider-cardio-001".to_string(), "provider-derm-001".to_string()];
        let a = service.availability(&ids, Urgency::Urgent);
        let b = service.availability(&ids, Urgency::Urgent);
        assert_eq!(a, b);
        assert_eq!(a.len(), 6);
        assert!(a.windows(2).all(|w| w[0].slot <= w[1].slot));
    }

    #[test]
    fn test_slots_within_clinic_hours() {
        let service = AvailabilityService::with_origin(origin());
        for s in service.slots_for("provider-ortho-001", Urgency::Routine) {
            let hour = s.slot.format("%H").to_string().parse::<u32>().unwrap();
            assert!((8..17).contains(&hour));
        }
    }
}
