//! Wave Scheduler (C8).
//!
//! Triggered after every successful developer task completion (spec
//! §4.7). Owns wave-completion detection, wave-to-wave merges via the
//! Git Coordinator, and the transition into `reviewing` once no
//! developer-role wave remains.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::sprint::SprintStatus;
use crate::domain::models::task::{Task, TaskRole, TaskState};
use crate::domain::ports::queue_broker::QueueBroker;
use crate::services::event_bus::{EventBus, ServerEvent};
use crate::services::git_coordinator::GitCoordinator;
use crate::services::state_store::StateStore;

pub struct WaveScheduler {
    state: Arc<StateStore>,
    git: Arc<GitCoordinator>,
    broker: Arc<dyn QueueBroker>,
    events: Arc<EventBus>,
    queue_max_attempts: u32,
}

impl WaveScheduler {
    pub fn new(
        state: Arc<StateStore>,
        git: Arc<GitCoordinator>,
        broker: Arc<dyn QueueBroker>,
        events: Arc<EventBus>,
        queue_max_attempts: u32,
    ) -> Self {
        Self { state, git, broker, events, queue_max_attempts }
    }

    /// On the `approved` → `running` transition: enqueue every wave-1
    /// task, or (if the plan omits explicit waves) every task with no
    /// dependencies.
    #[instrument(skip(self))]
    pub async fn bootstrap_wave_one(&self, sprint_id: &str) -> DomainResult<()> {
        let sprint = self.state.get_or_hydrate(sprint_id).await?;
        let plan = sprint.plan.as_ref().ok_or_else(|| DomainError::CorruptPlan("no plan to bootstrap".to_string()))?;

        let has_explicit_waves = plan.tasks.iter().any(|t| t.wave.is_some());
        let wave1: Vec<&Task> = if has_explicit_waves {
            plan.tasks.iter().filter(|t| t.role == TaskRole::Developer && t.wave == Some(1)).collect()
        } else {
            plan.tasks.iter().filter(|t| t.role == TaskRole::Developer && t.depends_on.is_empty()).collect()
        };

        self.state.set_current_wave(sprint_id, 1).await?;
        self.events.publish(ServerEvent::WaveStarted { sprint_id: sprint_id.to_string(), wave: 1, task_ids: wave1.iter().map(|t| t.id).collect() });

        for task in wave1 {
            self.enqueue_task(sprint_id, task).await?;
        }
        Ok(())
    }

    async fn enqueue_task(&self, sprint_id: &str, task: &Task) -> DomainResult<()> {
        let slot = task.developer_slot.unwrap_or(0);
        let queue = format!("impl-{slot}");
        let payload = serde_json::json!({"sprint_id": sprint_id, "task_id": task.id});
        self.broker.enqueue(&queue, &format!("impl-{sprint_id}-{}", task.id), payload, self.queue_max_attempts).await?;
        Ok(())
    }

    /// Re-enqueue a single already-known task, for restart/retry paths
    /// that need a fresh idempotency key to bypass a dead job.
    pub async fn re_enqueue_task(&self, sprint_id: &str, task: &Task) -> DomainResult<()> {
        let slot = task.developer_slot.unwrap_or(0);
        let queue = format!("impl-{slot}");
        let payload = serde_json::json!({"sprint_id": sprint_id, "task_id": task.id});
        self.broker.enqueue(&queue, &format!("impl-{sprint_id}-{}-retry-{}", task.id, Utc::now().timestamp()), payload, self.queue_max_attempts).await?;
        Ok(())
    }

    /// Run the full §4.7 algorithm after a developer task reaches `done`.
    #[instrument(skip(self))]
    pub async fn on_task_completed(&self, sprint_id: &str, task_id: u64) -> DomainResult<()> {
        let sprint = self.state.get_or_hydrate(sprint_id).await?;
        let plan = sprint.plan.as_ref().ok_or_else(|| DomainError::CorruptPlan("no plan".to_string()))?;
        let task = plan.task(task_id).ok_or(DomainError::TaskNotFound { sprint: sprint_id.to_string(), task: task_id })?;

        let Some(w) = task.wave else {
            info!(sprint_id, task_id, "completed task has no wave assignment, skipping wave progression");
            return Ok(());
        };

        let wave_tasks: Vec<&Task> = plan.tasks.iter().filter(|t| t.role == TaskRole::Developer && t.wave == Some(w)).collect();
        if wave_tasks.iter().any(|t| t.state != TaskState::Done) {
            return Ok(());
        }

        self.events.publish(ServerEvent::WaveCompleted { sprint_id: sprint_id.to_string(), wave: w });

        let next_wave = plan.tasks.iter().filter(|t| t.role == TaskRole::Developer).filter_map(|t| t.wave).filter(|&w2| w2 > w).min();
        let target = PathBuf::from(&sprint.target_dir);
        let slots: Vec<(u32, PathBuf)> = sprint.worktrees.iter().map(|(s, p)| (*s, p.clone())).collect();

        match next_wave {
            Some(w_next) => self.merge_and_advance(sprint_id, &target, &slots, w_next, plan).await,
            None => self.finalize_and_move_to_review(sprint_id, &target, &slots).await,
        }
    }

    async fn merge_and_advance(
        &self,
        sprint_id: &str,
        target: &Path,
        slots: &[(u32, PathBuf)],
        next_wave: u32,
        plan: &crate::domain::models::plan::Plan,
    ) -> DomainResult<()> {
        let outcomes = self.git.merge_wave_and_reset(target, sprint_id, slots).await?;
        for outcome in &outcomes {
            self.events.publish(ServerEvent::MergeCompleted {
                sprint_id: sprint_id.to_string(),
                slot: outcome.slot,
                success: outcome.success,
                conflicts: outcome.conflicts.clone(),
            });
            if !outcome.success {
                self.events.publish(ServerEvent::Error {
                    sprint_id: sprint_id.to_string(),
                    message: format!("merge conflict on developer slot {}: {:?}", outcome.slot, outcome.conflicts),
                });
            }
        }

        self.state.set_current_wave(sprint_id, next_wave).await?;
        let next_tasks: Vec<&Task> = plan.tasks.iter().filter(|t| t.role == TaskRole::Developer && t.wave == Some(next_wave)).collect();
        self.events.publish(ServerEvent::WaveStarted {
            sprint_id: sprint_id.to_string(),
            wave: next_wave,
            task_ids: next_tasks.iter().map(|t| t.id).collect(),
        });
        for task in next_tasks {
            self.enqueue_task(sprint_id, task).await?;
        }
        Ok(())
    }

    async fn finalize_and_move_to_review(&self, sprint_id: &str, target: &Path, slots: &[(u32, PathBuf)]) -> DomainResult<()> {
        self.git.finalize_implementation(target, sprint_id, slots).await?;
        self.state.set_sprint_status(sprint_id, SprintStatus::Reviewing).await?;
        self.events.publish(ServerEvent::SprintStatus { sprint_id: sprint_id.to_string(), status: SprintStatus::Reviewing.as_str().to_string(), at: Utc::now() });
        self.enqueue_testing(sprint_id).await
    }

    pub async fn enqueue_testing(&self, sprint_id: &str) -> DomainResult<()> {
        let payload = serde_json::json!({"sprint_id": sprint_id});
        self.broker
            .enqueue("testing", &format!("testing-{sprint_id}-{}", Utc::now().timestamp()), payload, self.queue_max_attempts)
            .await?;
        Ok(())
    }

    /// Enqueue the next review cycle once the testing worker has staged
    /// its changes. The cycle number is the sprint's current
    /// `review_cycle` plus one, so the first review after a sprint's
    /// first wave completes is always cycle 1.
    pub async fn enqueue_testing_review(&self, sprint_id: &str) -> DomainResult<()> {
        let sprint = self.state.get_or_hydrate(sprint_id).await?;
        let cycle = sprint.review_cycle + 1;
        let payload = serde_json::json!({"sprint_id": sprint_id, "cycle": cycle});
        self.broker
            .enqueue("review", &format!("review-{sprint_id}-{cycle}"), payload, self.queue_max_attempts)
            .await?;
        Ok(())
    }

    /// Enqueue every currently-`ready` task, grouped under the lowest
    /// wave number among them. Used both to resume a paused sprint (the
    /// developer worker drops jobs for paused sprints rather than
    /// re-enqueueing them) and to restart one after a crash, once
    /// `StateStore::reset_sprint_for_restart` has put the interrupted
    /// wave's tasks back to `ready`/`blocked`.
    #[instrument(skip(self))]
    pub async fn enqueue_ready_tasks(&self, sprint_id: &str) -> DomainResult<()> {
        let sprint = self.state.get_or_hydrate(sprint_id).await?;
        let plan = sprint.plan.as_ref().ok_or_else(|| DomainError::CorruptPlan("no plan".to_string()))?;

        let ready: Vec<&Task> = plan.tasks.iter().filter(|t| t.role == TaskRole::Developer && t.state == TaskState::Ready).collect();
        if ready.is_empty() {
            return Ok(());
        }

        let wave = ready.iter().filter_map(|t| t.wave).min().unwrap_or_else(|| sprint.current_wave.max(1));
        self.state.set_current_wave(sprint_id, wave).await?;
        self.events.publish(ServerEvent::WaveStarted { sprint_id: sprint_id.to_string(), wave, task_ids: ready.iter().map(|t| t.id).collect() });

        for task in ready {
            self.enqueue_task(sprint_id, task).await?;
        }
        Ok(())
    }

    /// Bug-fix tasks share the current (just-bumped) wave; enqueue each
    /// straight onto its assigned slot rather than waiting for a
    /// bootstrap call (spec §4.8).
    pub async fn enqueue_bug_tasks(&self, sprint_id: &str, task_ids: &[u64]) -> DomainResult<()> {
        let sprint = self.state.get_or_hydrate(sprint_id).await?;
        let plan = sprint.plan.as_ref().ok_or_else(|| DomainError::CorruptPlan("no plan".to_string()))?;
        let wave = task_ids.iter().filter_map(|id| plan.task(*id)).filter_map(|t| t.wave).max().unwrap_or(sprint.current_wave + 1);

        self.state.set_current_wave(sprint_id, wave).await?;
        self.events.publish(ServerEvent::WaveStarted { sprint_id: sprint_id.to_string(), wave, task_ids: task_ids.to_vec() });

        for &id in task_ids {
            if let Some(task) = plan.task(id) {
                self.enqueue_task(sprint_id, task).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::developer::DeveloperPool;
    use crate::domain::models::plan::Plan;
    use crate::domain::models::sprint::AutonomyMode;
    use crate::infrastructure::queue::SqliteQueueBroker;

    async fn fixture() -> (WaveScheduler, Arc<StateStore>, Arc<SqliteQueueBroker>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(StateStore::new(dir.path()));
        let git = Arc::new(GitCoordinator::new("git"));
        let broker = Arc::new(SqliteQueueBroker::connect("sqlite::memory:").await.unwrap());
        let events = Arc::new(EventBus::new(dir.path(), 16));
        let scheduler = WaveScheduler::new(state.clone(), git, broker.clone(), events, 3);
        (scheduler, state, broker, dir)
    }

    fn single_wave_task(id: u64, wave: u32, slot: u32) -> Task {
        let mut t = Task::new(id, format!("t{id}"), "d");
        t.wave = Some(wave);
        t.developer_slot = Some(slot);
        t.state = TaskState::Ready;
        t
    }

    #[tokio::test]
    async fn wave_still_in_flight_does_nothing() {
        let (scheduler, state, broker, _dir) = fixture().await;
        state.init_sprint("s1", "spec.md", "# s", "/tmp/x", 2, AutonomyMode::Supervised).await.unwrap();
        let plan = Plan::new(vec![single_wave_task(1, 1, 0), single_wave_task(2, 1, 1)]);
        state.set_sprint_plan("s1", plan).await.unwrap();
        state.set_task_status("s1", 1, TaskState::Running).await.unwrap();
        state.set_task_status("s1", 1, TaskState::AwaitingMerge).await.unwrap();
        state.set_task_status("s1", 1, TaskState::Done).await.unwrap();

        scheduler.on_task_completed("s1", 1).await.unwrap();

        assert!(broker.dequeue("testing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn final_wave_completion_enqueues_testing() {
        let (scheduler, state, broker, _dir) = fixture().await;
        state.init_sprint("s1", "spec.md", "# s", "/tmp/x", 1, AutonomyMode::Supervised).await.unwrap();
        let plan = Plan::new(vec![single_wave_task(1, 1, 0)]);
        state.set_sprint_plan("s1", plan).await.unwrap();
        state.set_task_status("s1", 1, TaskState::Running).await.unwrap();
        state.set_task_status("s1", 1, TaskState::AwaitingMerge).await.unwrap();
        state.set_task_status("s1", 1, TaskState::Done).await.unwrap();

        scheduler.on_task_completed("s1", 1).await.unwrap();

        let sprint = state.get_or_hydrate("s1").await.unwrap();
        assert_eq!(sprint.status, SprintStatus::Reviewing);
        assert!(broker.dequeue("testing").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn tester_role_task_sharing_a_wave_does_not_gate_completion() {
        let (scheduler, state, broker, _dir) = fixture().await;
        state.init_sprint("s1", "spec.md", "# s", "/tmp/x", 1, AutonomyMode::Supervised).await.unwrap();
        let dev_task = single_wave_task(1, 1, 0);
        let mut tester_task = single_wave_task(2, 1, 1);
        tester_task.role = TaskRole::Tester;
        tester_task.state = TaskState::Ready; // never advanced to Done
        state.set_sprint_plan("s1", Plan::new(vec![dev_task, tester_task])).await.unwrap();
        state.set_task_status("s1", 1, TaskState::Running).await.unwrap();
        state.set_task_status("s1", 1, TaskState::AwaitingMerge).await.unwrap();
        state.set_task_status("s1", 1, TaskState::Done).await.unwrap();

        scheduler.on_task_completed("s1", 1).await.unwrap();

        let sprint = state.get_or_hydrate("s1").await.unwrap();
        assert_eq!(sprint.status, SprintStatus::Reviewing, "the wave's only developer task is done, so the wave gate must clear even though a same-wave tester task is still Ready");
        assert!(broker.dequeue("testing").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn bootstrap_without_explicit_waves_uses_dependency_free_tasks() {
        let (scheduler, state, broker, _dir) = fixture().await;
        state.init_sprint("s1", "spec.md", "# s", "/tmp/x", 2, AutonomyMode::Supervised).await.unwrap();
        let mut t1 = Task::new(1, "a", "d");
        t1.developer_slot = Some(0);
        let mut t2 = Task::new(2, "b", "d");
        t2.developer_slot = Some(1);
        t2.depends_on = vec![1];
        state.set_sprint_plan("s1", Plan::new(vec![t1, t2])).await.unwrap();

        scheduler.bootstrap_wave_one("s1").await.unwrap();

        assert!(broker.dequeue("impl-0").await.unwrap().is_some());
        assert!(broker.dequeue("impl-1").await.unwrap().is_none());
    }
}
