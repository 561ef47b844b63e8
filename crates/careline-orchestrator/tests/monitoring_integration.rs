#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use careline_core::models::{ReferralStatus, Urgency};
use careline_core::*;
use careline_orchestrator::*;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Test collaborators
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Referrals(HashMap<String, Vec<Referral>>);

impl Referrals {
    fn with(patient: &str, ids: &[&str]) -> Self {
        let referrals = ids
            .iter()
            .map(|id| Referral {
                id: id.to_string(),
                patient_id: patient.to_string(),
                specialty: "cardiology".into(),
                reason: "Chest pain on exertion".into(),
                urgency: Urgency::Urgent,
                status: ReferralStatus::Pending,
                notes: None,
            })
            .collect();
        Self(HashMap::from([(patient.to_string(), referrals)]))
    }
}

#[async_trait]
impl ReferralLookup for Referrals {
    async fn active_referrals(&self, patient_id: &str) -> CarelineResult<Vec<Referral>> {
        Ok(self.0.get(patient_id).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
struct Briefs(Mutex<HashMap<String, ClinicianBrief>>);

#[async_trait]
impl BriefStore for Briefs {
    async fn last_brief(&self, referral_id: &str) -> CarelineResult<Option<ClinicianBrief>> {
        Ok(self.0.lock().get(referral_id).cloned())
    }

    async fn save_brief(&self, brief: &ClinicianBrief) -> CarelineResult<()> {
        self.0.lock().insert(brief.referral_id.clone(), brief.clone());
        Ok(())
    }
}

#[derive(Default)]
struct Outbox(Mutex<Vec<UpdateNotification>>);

impl Outbox {
    fn referral_ids(&self) -> Vec<String> {
        self.0.lock().iter().map(|n| n.referral_id.clone()).collect()
    }
}

#[async_trait]
impl Notifier for Outbox {
    async fn notify(&self, notification: &UpdateNotification) -> CarelineResult<()> {
        self.0.lock().push(notification.clone());
        Ok(())
    }
}

/// Change signal scripted per monitor key: `true`, `false`, error or panic.
#[derive(Default)]
struct Signal {
    calls: Mutex<HashMap<String, usize>>,
}

impl Signal {
    fn calls(&self, key: &str) -> usize {
        self.calls.lock().get(key).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ChangeSignal for Signal {
    async fn has_new_data(&self, monitor: &Monitor) -> CarelineResult<bool> {
        *self.calls.lock().entry(monitor.key.clone()).or_default() += 1;
        match monitor.key.as_str() {
            "broken" => Err(CarelineError::Transport("feed unavailable".into())),
            "crashing" => panic!("signal crashed"),
            "quiet" => Ok(false),
            _ => Ok(true),
        }
    }
}

/// Summarizer endpoint producing a brief for whatever referral it is asked about.
struct Summarizer {
    problems: Mutex<Vec<String>>,
    fail_for: Option<&'static str>,
    calls: AtomicUsize,
}

impl Summarizer {
    fn new(problems: &[&str], fail_for: Option<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            problems: Mutex::new(problems.iter().map(|s| s.to_string()).collect()),
            fail_for,
            calls: AtomicUsize::new(0),
        })
    }

    fn set_problems(&self, problems: &[&str]) {
        *self.problems.lock() = problems.iter().map(|s| s.to_string()).collect();
    }
}

#[async_trait]
impl AgentEndpoint for Summarizer {
    async fn call(&self, message: Message) -> CarelineResult<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let referral_id = message.payload()["referral_id"].as_str().unwrap_or_default();
        if Some(referral_id) == self.fail_for {
            return Ok(Response::failure(message.id(), "summarizer overloaded"));
        }
        let patient_id = message.payload()["patient_id"].as_str().unwrap_or_default();
        let problems = self.problems.lock().clone();
        let payload = json!({
            "clinician_brief": {
                "id": format!("brief_{referral_id}"),
                "referral_id": referral_id,
                "patient_id": patient_id,
                "problem_list": problems,
                "generated_at": "2026-01-01T00:00:00Z"
            },
            "patient_explainer": {
                "id": format!("exp_{referral_id}"),
                "referral_id": referral_id,
                "patient_id": patient_id,
                "summary": "summary",
                "what_to_expect": "consultation",
                "generated_at": "2026-01-01T00:00:00Z"
            }
        });
        Ok(Response::success(message.id(), to_payload(&payload)?))
    }
}

struct Harness {
    dispatcher: Arc<Dispatcher<LoopService>>,
    engine: MonitoringEngine,
    signal: Arc<Signal>,
    summarizer: Arc<Summarizer>,
    briefs: Arc<Briefs>,
    outbox: Arc<Outbox>,
}

fn harness(config: MonitoringConfig, referrals: Referrals, summarizer: Arc<Summarizer>) -> Harness {
    let registry = Arc::new(
        AgentRegistry::empty(AgentKind::Loop).with_endpoint(AgentKind::Summarizer, summarizer.clone()),
    );
    let signal = Arc::new(Signal::default());
    let briefs = Arc::new(Briefs::default());
    let outbox = Arc::new(Outbox::default());
    let engine = MonitoringEngine::new(config, signal.clone());
    let service = LoopService::new(
        FanOut::new(registry.clone()),
        engine.clone(),
        Arc::new(referrals),
        briefs.clone(),
        outbox.clone(),
    );
    Harness {
        dispatcher: service.into_dispatcher(registry),
        engine,
        signal,
        summarizer,
        briefs,
        outbox,
    }
}

fn fast() -> MonitoringConfig {
    MonitoringConfig {
        tick: Duration::from_millis(20),
        check_interval: Duration::from_secs(1800),
    }
}

fn message(action: &str, payload: Value) -> Message {
    Message::new("test", AgentKind::Loop, action, to_payload(&payload).unwrap()).unwrap()
}

async fn send(h: &Harness, action: &str, payload: Value) -> Response {
    h.dispatcher.handle(message(action, payload)).await
}

fn records_updated(patient: &str) -> Value {
    serde_json::to_value(RecordsUpdatedEvent::new(patient, None)).unwrap()
}

// ---------------------------------------------------------------------------
// 1. Records-updated handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_summary_is_significant_and_notifies() {
    let h = harness(
        fast(),
        Referrals::with("p1", &["r1"]),
        Summarizer::new(&["Hypertension"], None),
    );

    let response = send(&h, "process_records_updated", records_updated("p1")).await;
    let batch: UpdateBatch = response.decode().unwrap();

    assert_eq!(batch.referrals_processed, 1);
    assert_eq!(batch.successful_updates, 1);
    assert_eq!(batch.significant_changes, 1);
    assert_eq!(batch.results[0].has_significant_changes, Some(true));
    assert_eq!(h.outbox.referral_ids(), vec!["r1"]);
    assert!(h.briefs.0.lock().contains_key("r1"));

    let notes = h.outbox.0.lock();
    let note = &notes[0];
    assert_eq!(
        note.message,
        "Updated medical summary available for referral r1"
    );
}

#[tokio::test]
async fn unchanged_summary_is_not_significant() {
    let h = harness(
        fast(),
        Referrals::with("p1", &["r1"]),
        Summarizer::new(&["Hypertension"], None),
    );
    send(&h, "process_records_updated", records_updated("p1")).await;
    let batch: UpdateBatch = send(&h, "process_records_updated", records_updated("p1"))
        .await
        .decode()
        .unwrap();

    assert_eq!(batch.successful_updates, 1);
    assert_eq!(batch.significant_changes, 0);
    assert_eq!(h.outbox.referral_ids().len(), 1);
}

#[tokio::test]
async fn new_problem_triggers_second_notification() {
    let h = harness(
        fast(),
        Referrals::with("p1", &["r1"]),
        Summarizer::new(&["Hypertension"], None),
    );
    send(&h, "process_records_updated", records_updated("p1")).await;
    h.summarizer.set_problems(&["Hypertension", "Atrial fibrillation"]);
    let batch: UpdateBatch = send(&h, "process_records_updated", records_updated("p1"))
        .await
        .decode()
        .unwrap();

    assert_eq!(batch.significant_changes, 1);
    assert_eq!(h.outbox.referral_ids(), vec!["r1", "r1"]);
}

#[tokio::test]
async fn one_referral_failing_does_not_affect_others() {
    let h = harness(
        fast(),
        Referrals::with("p1", &["r1", "r2"]),
        Summarizer::new(&["Hypertension"], Some("r2")),
    );
    let batch: UpdateBatch = send(&h, "process_records_updated", records_updated("p1"))
        .await
        .decode()
        .unwrap();

    assert_eq!(batch.referrals_processed, 2);
    assert_eq!(batch.successful_updates, 1);
    let r2 = batch.results.iter().find(|r| r.referral_id == "r2").unwrap();
    assert!(!r2.updated);
    assert_eq!(r2.error.as_deref(), Some("summarizer overloaded"));
    assert_eq!(h.outbox.referral_ids(), vec!["r1"]);
}

#[tokio::test]
async fn no_active_referrals() {
    let h = harness(fast(), Referrals::default(), Summarizer::new(&[], None));
    let out = send(&h, "process_records_updated", records_updated("p9"))
        .await
        .into_result()
        .unwrap();
    assert_eq!(out["message"], "No active referrals to update");
    assert_eq!(h.summarizer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn loop_agent_rejects_unknown_action() {
    let h = harness(fast(), Referrals::default(), Summarizer::new(&[], None));
    let response = send(&h, "reboot", json!({})).await;
    assert_eq!(response.error(), Some("unknown action: reboot"));
}

// ---------------------------------------------------------------------------
// 2. Monitor registry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn start_requires_patient_id() {
    let h = harness(fast(), Referrals::default(), Summarizer::new(&[], None));
    let response = send(&h, "start_monitoring", json!({"referral_id": "r1"})).await;
    assert_eq!(response.error(), Some("patient_id required"));
    assert!(h.engine.is_empty());
}

#[tokio::test]
async fn start_is_an_upsert_keyed_by_referral_then_patient() {
    let h = harness(fast(), Referrals::default(), Summarizer::new(&[], None));

    let first = send(&h, "start_monitoring", json!({"patient_id": "p1", "referral_id": "r1"}))
        .await
        .into_result()
        .unwrap();
    assert_eq!(first["monitor_key"], "r1");
    let original = h.engine.get("r1").unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    send(
        &h,
        "start_monitoring",
        json!({
            "patient_id": "p1",
            "referral_id": "r1",
            "critical_thresholds": {"potassium": 6.0}
        }),
    )
    .await;
    assert_eq!(h.engine.len(), 1);
    let replaced = h.engine.get("r1").unwrap();
    assert!(replaced.last_check_at > original.last_check_at);
    assert!(original.critical_thresholds.is_empty());
    assert_eq!(replaced.critical_thresholds["potassium"], 6.0);

    let by_patient = send(&h, "start_monitoring", json!({"patient_id": "p2"}))
        .await
        .into_result()
        .unwrap();
    assert_eq!(by_patient["monitor_key"], "p2");
    assert_eq!(h.engine.len(), 2);
    assert!(h.engine.is_running());

    let status = send(&h, "get_monitoring_status", json!({}))
        .await
        .into_result()
        .unwrap();
    assert_eq!(status["active_monitors"], 2);
    assert_eq!(status["monitors"][0]["key"], "p2");
    assert_eq!(status["monitors"][1]["key"], "r1");
}

#[tokio::test]
async fn oversized_interval_saturates_and_completes_the_task() {
    let h = harness(fast(), Referrals::default(), Summarizer::new(&[], None));
    let response = send(
        &h,
        "start_monitoring",
        json!({"patient_id": "p1", "check_interval_minutes": u64::MAX}),
    )
    .await;
    assert!(response.is_success(), "{:?}", response.error());
    assert_eq!(h.engine.get("p1").unwrap().check_interval_secs, u64::MAX);

    let tasks = h.dispatcher.tasks().read().await;
    assert_eq!(tasks.running_count(), 0);
    assert_eq!(tasks.completed_count(), 1);
    drop(tasks);

    // a saturated interval is never due
    let report = h.engine.poll_now().await;
    assert_eq!(report.checked, 0);
    h.engine.stop("p1");
}

#[tokio::test]
async fn stop_of_unknown_key_is_not_an_error() {
    let h = harness(fast(), Referrals::default(), Summarizer::new(&[], None));
    let out = send(&h, "stop_monitoring", json!({"referral_id": "nope"}))
        .await
        .into_result()
        .unwrap();
    assert_eq!(out["stopped"], false);

    let missing = send(&h, "stop_monitoring", json!({})).await;
    assert_eq!(missing.error(), Some("referral_id or patient_id required"));
}

#[tokio::test]
async fn start_then_stop_never_checks_and_loop_exits() {
    let h = harness(fast(), Referrals::default(), Summarizer::new(&[], None));
    send(&h, "start_monitoring", json!({"patient_id": "p1", "referral_id": "r1"})).await;
    let out = send(&h, "stop_monitoring", json!({"referral_id": "r1"}))
        .await
        .into_result()
        .unwrap();
    assert_eq!(out["stopped"], true);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(h.signal.calls("r1"), 0);
    assert!(h.engine.is_empty());
    assert!(!h.engine.is_running());
}

#[tokio::test]
async fn loop_restarts_after_exiting() {
    let h = harness(fast(), Referrals::default(), Summarizer::new(&[], None));
    h.engine.start("p1", None, Payload::new(), None).unwrap();
    h.engine.stop("p1");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!h.engine.is_running());

    h.engine.start("p1", None, Payload::new(), None).unwrap();
    assert!(h.engine.is_running());
    h.engine.stop("p1");
}

// ---------------------------------------------------------------------------
// 3. Polling loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn due_monitor_feeds_records_update_back_through_dispatch() {
    let h = harness(
        fast(),
        Referrals::with("p1", &["r1"]),
        Summarizer::new(&["Hypertension"], None),
    );
    send(
        &h,
        "start_monitoring",
        json!({"patient_id": "p1", "referral_id": "r1", "check_interval_secs": 0}),
    )
    .await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    h.engine.stop("r1");

    assert!(h.signal.calls("r1") >= 1);
    assert!(h.summarizer.calls.load(Ordering::SeqCst) >= 1);
    assert_eq!(h.outbox.referral_ids()[0], "r1");

    let tasks = h.dispatcher.tasks().read().await;
    assert!(tasks
        .all_tasks()
        .iter()
        .any(|t| t.action == "process_records_updated" && t.status == TaskStatus::Completed));
}

#[tokio::test]
async fn failing_and_panicking_checks_do_not_stop_the_loop() {
    let h = harness(
        fast(),
        Referrals::with("p1", &["r1"]),
        Summarizer::new(&["Hypertension"], None),
    );
    for key in ["broken", "crashing", "r1"] {
        h.engine
            .start("p1", Some(key.to_string()), Payload::new(), Some(Duration::ZERO))
            .unwrap();
    }

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(h.signal.calls("broken") >= 2);
    assert!(h.signal.calls("crashing") >= 2);
    assert!(h.signal.calls("r1") >= 2);
    assert!(!h.outbox.referral_ids().is_empty());
    assert_eq!(h.engine.len(), 3);
    assert!(h.engine.is_running());

    for key in ["broken", "crashing", "r1"] {
        h.engine.stop(key);
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!h.engine.is_running());
}

#[tokio::test]
async fn quiet_monitor_is_checked_but_never_triggers() {
    let h = harness(fast(), Referrals::default(), Summarizer::new(&[], None));
    h.engine
        .start("p1", Some("quiet".into()), Payload::new(), Some(Duration::ZERO))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let report = h.engine.poll_now().await;
    h.engine.stop("quiet");

    assert!(h.signal.calls("quiet") >= 1);
    assert_eq!(report.triggered, 0);
    assert_eq!(report.failed, 0);
    assert!(h.outbox.referral_ids().is_empty());
}

#[tokio::test]
async fn monitors_are_not_checked_before_their_interval() {
    let h = harness(fast(), Referrals::default(), Summarizer::new(&[], None));
    h.engine.start("p1", Some("r1".into()), Payload::new(), None).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.signal.calls("r1"), 0);
    assert_eq!(h.engine.poll_now().await.checked, 0);
    h.engine.stop("r1");
}
