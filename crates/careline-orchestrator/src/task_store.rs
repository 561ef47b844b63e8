use careline_core::{Payload, Task, TaskStatus};
use std::collections::{HashMap, VecDeque};

/// Default number of finished tasks retained per agent.
pub const DEFAULT_RETAINED_TASKS: usize = 10_000;

/// Per-agent table of tasks keyed by task id.
///
/// Running tasks are never evicted. Once more than `retain` finished tasks
/// are held, the oldest finished ones are dropped on insert.
pub struct TaskStore {
    tasks: HashMap<String, Task>,
    order: VecDeque<String>,
    retain: usize,
}

impl TaskStore {
    /// Store with the default retention.
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETAINED_TASKS)
    }

    /// A store that keeps at most `retain` finished tasks.
    pub fn with_retention(retain: usize) -> Self {
        Self {
            tasks: HashMap::new(),
            order: VecDeque::new(),
            retain: retain.max(1),
        }
    }

    /// Insert a task. Returns its id.
    pub fn insert(&mut self, task: Task) -> String {
        let id = task.id.clone();
        if self.tasks.insert(id.clone(), task).is_none() {
            self.order.push_back(id.clone());
        }
        self.evict();
        id
    }

    /// Mark a task completed with `outputs`. False if unknown or already terminal.
    pub fn complete(&mut self, id: &str, outputs: Payload) -> bool {
        self.tasks
            .get_mut(id)
            .map(|task| task.complete(outputs))
            .unwrap_or(false)
    }

    /// Mark a task failed with `error`. False if unknown or already terminal.
    pub fn fail(&mut self, id: &str, error: impl Into<String>) -> bool {
        self.tasks
            .get_mut(id)
            .map(|task| task.fail(error))
            .unwrap_or(false)
    }

    /// Get a task by id.
    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// All tasks for one referral, oldest first.
    pub fn for_referral(&self, referral_id: &str) -> Vec<&Task> {
        self.ordered()
            .filter(|t| t.referral_id == referral_id)
            .collect()
    }

    /// The most recent task for `referral_id` started by `action`.
    pub fn latest(&self, referral_id: &str, action: &str) -> Option<&Task> {
        self.ordered()
            .filter(|t| t.referral_id == referral_id && t.action == action)
            .last()
    }

    /// List all tasks in insertion order.
    pub fn all_tasks(&self) -> Vec<&Task> {
        self.ordered().collect()
    }

    /// Count of running tasks.
    pub fn running_count(&self) -> usize {
        self.count(TaskStatus::Running)
    }

    /// Count of completed tasks.
    pub fn completed_count(&self) -> usize {
        self.count(TaskStatus::Completed)
    }

    /// Count of failed tasks.
    pub fn failed_count(&self) -> usize {
        self.count(TaskStatus::Failed)
    }

    /// Total number of retained tasks.
    pub fn total_count(&self) -> usize {
        self.tasks.len()
    }

    /// True when no task is running.
    pub fn is_idle(&self) -> bool {
        self.running_count() == 0
    }

    fn count(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|t| t.status == status).count()
    }

    fn ordered(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    fn evict(&mut self) {
        let finished = self
            .tasks
            .values()
            .filter(|t| t.status.is_terminal())
            .count();
        let mut excess = finished.saturating_sub(self.retain);
        if excess == 0 {
            return;
        }
        let tasks = &mut self.tasks;
        self.order.retain(|id| {
            if excess > 0 && tasks.get(id).is_some_and(|t| t.status.is_terminal()) {
                tasks.remove(id);
                excess -= 1;
                false
            } else {
                true
            }
        });
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use careline_core::AgentKind;

    fn task(id: &str, referral: &str) -> Task {
        Task::start(
            id,
            AgentKind::Orchestrator,
            "process_referral_created",
            referral,
            Payload::new(),
        )
    }

    #[test]
    fn test_insert_and_complete() {
        let mut store = TaskStore::new();
        let id = store.insert(task("t1", "r1"));
        assert_eq!(store.running_count(), 1);
        assert!(store.complete(&id, Payload::new()));
        assert_eq!(store.completed_count(), 1);
        assert!(store.is_idle());
    }

    #[test]
    fn test_terminal_task_is_frozen() {
        let mut store = TaskStore::new();
        store.insert(task("t1", "r1"));
        assert!(store.fail("t1", "Directory agent failed: boom"));
        assert!(!store.complete("t1", Payload::new()));
        let t = store.get("t1").unwrap();
        assert_eq!(t.status, TaskStatus::Failed);
        assert_eq!(t.error.as_deref(), Some("Directory agent failed: boom"));
        assert!(t.outputs.is_none());
    }

    #[test]
    fn test_unknown_task() {
        let mut store = TaskStore::new();
        assert!(!store.complete("nope", Payload::new()));
        assert!(!store.fail("nope", "x"));
        assert!(store.get("nope").is_none());
    }

    #[test]
    fn test_for_referral_and_latest() {
        let mut store = TaskStore::new();
        store.insert(task("t1", "r1"));
        store.insert(task("t2", "r2"));
        store.insert(task("t3", "r1"));
        let ids: Vec<_> = store.for_referral("r1").iter().map(|t| t.id.clone()).collect();
        assert_eq!(ids, vec!["t1", "t3"]);
        assert_eq!(
            store.latest("r1", "process_referral_created").unwrap().id,
            "t3"
        );
        assert!(store.latest("r1", "get_orchestration_status").is_none());
    }

    #[test]
    fn test_eviction_keeps_running_tasks() {
        let mut store = TaskStore::with_retention(2);
        store.insert(task("running", "r0"));
        for i in 0..5 {
            let id = store.insert(task(&format!("t{i}"), "r1"));
            store.complete(&id, Payload::new());
        }
        // eviction happens on the next insert
        store.insert(task("last", "r1"));
        assert!(store.get("running").is_some());
        assert!(store.get("t0").is_none());
        assert!(store.get("t4").is_some());
        assert!(store.completed_count() <= 2);
    }
}
