//! Task domain model.
//!
//! A task is a single unit of implementation work inside a sprint's
//! plan. Tasks are identified by a small integer scoped to their
//! sprint (not a UUID — plans are human-authored/reviewed documents
//! and small sequential ids read better in a review diff).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting on a dependency in an earlier wave.
    Blocked,
    /// Dependencies satisfied, waiting for a free developer slot.
    Ready,
    /// Assigned to a developer slot, agent running.
    Running,
    /// Developer finished; waiting for its wave to close and merge.
    AwaitingMerge,
    /// Merged into the sprint integration branch.
    Done,
    /// Developer agent failed and retries are exhausted.
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blocked => "blocked",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::AwaitingMerge => "awaiting_merge",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Valid forward transitions, mirroring the wave scheduler's own checks.
    pub fn valid_transitions(&self) -> &'static [TaskState] {
        match self {
            Self::Blocked => &[Self::Ready],
            Self::Ready => &[Self::Running, Self::Blocked],
            Self::Running => &[Self::AwaitingMerge, Self::Failed],
            Self::AwaitingMerge => &[Self::Done, Self::Failed],
            Self::Done => &[],
            Self::Failed => &[Self::Ready],
        }
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// What kind of task this is, for prompt assembly and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Ordinary implementation work from the plan.
    Feature,
    /// A bug task injected by a review cycle finding.
    ReviewFix,
}

impl Default for TaskKind {
    fn default() -> Self {
        Self::Feature
    }
}

/// Who a task is assigned to: a parallel developer-slot queue, or the
/// singleton tester role. Only `Developer` tasks participate in wave
/// gating and the wave-scheduler's developer-slot queues (§4.7); a
/// `Tester` task is plan-carried but driven by the `testing` worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRole {
    Developer,
    Tester,
}

impl Default for TaskRole {
    fn default() -> Self {
        Self::Developer
    }
}

impl TaskRole {
    /// Tolerant parse of a planner-authored role string. Unrecognised
    /// or legacy names (e.g. an older planner emitting "implementer")
    /// are rewritten to the canonical `developer`, per the plan-ingest
    /// normalisation rule.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "tester" | "test" | "qa" => Self::Tester,
            _ => Self::Developer,
        }
    }
}

/// A single unit of implementation work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Id scoped to the sprint's plan (1-based, stable across replans).
    pub id: u64,
    /// Short human title, as written in the plan.
    pub title: String,
    /// Full instructions handed to the developer agent.
    pub description: String,
    /// Ids of tasks that must be `Done` before this one is `Ready`.
    pub depends_on: Vec<u64>,
    /// Paths this task is expected to touch; used for same-wave isolation checks.
    pub files_touched: Vec<String>,
    pub state: TaskState,
    pub kind: TaskKind,
    /// "developer" or "tester" (spec §3's Task data model); only
    /// developer-role tasks gate wave completion or queue onto an
    /// `impl-<slot>` queue.
    #[serde(default)]
    pub role: TaskRole,
    /// Wave index this task was scheduled into, assigned once by the scheduler.
    pub wave: Option<u32>,
    /// Developer slot currently (or last) running this task.
    pub developer_slot: Option<u32>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Set when this task exists because of a review finding.
    pub originating_review_cycle: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(id: u64, title: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: title.into(),
            description: description.into(),
            depends_on: Vec::new(),
            files_touched: Vec::new(),
            state: TaskState::Blocked,
            kind: TaskKind::default(),
            role: TaskRole::default(),
            wave: None,
            developer_slot: None,
            retry_count: 0,
            max_retries: 2,
            originating_review_cycle: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn transition_to(&mut self, next: TaskState) -> Result<(), String> {
        if !self.state.can_transition_to(next) {
            return Err(format!(
                "cannot transition task {} from {} to {}",
                self.id,
                self.state.as_str(),
                next.as_str()
            ));
        }
        self.state = next;
        self.updated_at = Utc::now();
        match next {
            TaskState::Running => self.started_at = Some(Utc::now()),
            TaskState::Done | TaskState::Failed => self.completed_at = Some(Utc::now()),
            _ => {}
        }
        Ok(())
    }

    pub fn can_retry(&self) -> bool {
        self.state == TaskState::Failed && self.retry_count < self.max_retries
    }

    pub fn retry(&mut self) -> Result<(), String> {
        if !self.can_retry() {
            return Err(format!("task {} has exhausted its retries", self.id));
        }
        self.retry_count += 1;
        self.started_at = None;
        self.completed_at = None;
        self.transition_to(TaskState::Ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_defaults_to_developer_role() {
        let t = Task::new(1, "do thing", "do the thing");
        assert_eq!(t.role, TaskRole::Developer);
    }

    #[test]
    fn role_parse_recognises_tester_variants_and_falls_back_to_developer() {
        assert_eq!(TaskRole::parse("tester"), TaskRole::Tester);
        assert_eq!(TaskRole::parse("QA"), TaskRole::Tester);
        assert_eq!(TaskRole::parse("implementer"), TaskRole::Developer);
        assert_eq!(TaskRole::parse(""), TaskRole::Developer);
    }

    #[test]
    fn new_task_starts_blocked() {
        let t = Task::new(1, "do thing", "do the thing");
        assert_eq!(t.state, TaskState::Blocked);
    }

    #[test]
    fn valid_lifecycle() {
        let mut t = Task::new(1, "t", "d");
        t.transition_to(TaskState::Ready).unwrap();
        t.transition_to(TaskState::Running).unwrap();
        t.transition_to(TaskState::AwaitingMerge).unwrap();
        t.transition_to(TaskState::Done).unwrap();
        assert!(t.state.is_terminal());
        assert!(t.completed_at.is_some());
    }

    #[test]
    fn rejects_skipping_running() {
        let mut t = Task::new(1, "t", "d");
        t.transition_to(TaskState::Ready).unwrap();
        assert!(t.transition_to(TaskState::Done).is_err());
    }

    #[test]
    fn retry_resets_to_ready_and_clamps() {
        let mut t = Task::new(1, "t", "d");
        t.max_retries = 1;
        t.transition_to(TaskState::Ready).unwrap();
        t.transition_to(TaskState::Running).unwrap();
        t.transition_to(TaskState::Failed).unwrap();
        assert!(t.can_retry());
        t.retry().unwrap();
        assert_eq!(t.state, TaskState::Ready);
        assert_eq!(t.retry_count, 1);

        t.transition_to(TaskState::Running).unwrap();
        t.transition_to(TaskState::Failed).unwrap();
        assert!(!t.can_retry());
        assert!(t.retry().is_err());
    }
}
