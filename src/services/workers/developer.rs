//! Developer worker: implements one task inside its developer slot's
//! isolated git worktree.
//!
//! Each `impl-<slot>` queue has exactly one consumer, so at most one
//! task per slot runs at a time — no separate concurrency bookkeeping
//! is needed beyond that. Pre-condition: the task is `ready` and
//! assigned to this slot. Post-condition: the task reaches `done` (work
//! committed to the slot branch) or `failed`, and
//! `WaveScheduler::on_task_completed` is invoked so wave progression can
//! run, unless the task still has retries left, in which case it is
//! re-enqueued instead.

use serde::Deserialize;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::task::TaskState;
use crate::domain::ports::agent_runner::AgentRunRequest;
use crate::services::event_bus::ServerEvent;
use crate::services::prompts;

use super::{make_output_sink, record_cost, WorkerContext};

#[derive(Deserialize)]
struct DeveloperPayload {
    sprint_id: String,
    task_id: u64,
}

pub async fn handle(ctx: &WorkerContext, payload: serde_json::Value) -> DomainResult<()> {
    let DeveloperPayload { sprint_id, task_id } = serde_json::from_value(payload)?;

    let sprint = ctx.state.get_or_hydrate(&sprint_id).await?;
    let Some(plan) = sprint.plan.as_ref() else {
        tracing::debug!(sprint_id, task_id, "developer job stale, sprint has no plan");
        return Ok(());
    };
    let Some(task) = plan.task(task_id) else {
        tracing::debug!(sprint_id, task_id, "developer job stale, task no longer in plan");
        return Ok(());
    };
    if task.state != TaskState::Ready {
        tracing::debug!(sprint_id, task_id, state = ?task.state, "developer job stale, task already moved on");
        return Ok(());
    }
    if sprint.status == crate::domain::models::sprint::SprintStatus::Paused {
        tracing::debug!(sprint_id, task_id, "sprint paused, dropping job; resume will re-enqueue ready tasks");
        return Ok(());
    }

    let slot = task.developer_slot.unwrap_or(0);
    let worktree = sprint.worktrees.get(&slot).cloned().ok_or_else(|| DomainError::InvariantViolated(format!("no worktree set up for slot {slot}")))?;
    let branch = format!("sprint/{sprint_id}/{slot}");
    let title = task.title.clone();
    let description = task.description.clone();
    let files_touched = task.files_touched.join(", ");

    ctx.state.set_task_status(&sprint_id, task_id, TaskState::Running).await?;
    ctx.events.publish(ServerEvent::TaskStatus { sprint_id: sprint_id.clone(), task_id, status: TaskState::Running.as_str().to_string(), developer_slot: Some(slot) });

    let template = prompts::template_for("developer").unwrap_or_default();
    let prompt = prompts::render(template, &[("slot", &slot.to_string()), ("branch", &branch), ("title", &title), ("description", &description), ("files_touched", &files_touched)]);

    let sink = make_output_sink(ctx.events.clone(), sprint_id.clone(), format!("impl-{slot}"), Some(task_id));
    let result = ctx
        .agent
        .run(AgentRunRequest {
            role: "developer".to_string(),
            sprint_id: sprint_id.clone(),
            task_id: Some(task_id),
            working_dir: worktree.clone(),
            prompt,
            timeout: ctx.role_timeout("developer"),
            max_turns: None,
            output: sink,
        })
        .await;

    let result = match result {
        Ok(r) => r,
        Err(e) => return fail_task(ctx, &sprint_id, task_id, slot, &e.to_string()).await,
    };

    record_cost(ctx, &sprint_id, &format!("impl-{slot}"), Some(task_id), &result.model, result.usage).await?;

    if result.exit_code != 0 {
        return fail_task(ctx, &sprint_id, task_id, slot, &format!("developer agent exited with code {}", result.exit_code)).await;
    }

    ctx.git.commit_in_worktree(&worktree, &format!("task {task_id}: {title}")).await?;

    ctx.state.set_task_status(&sprint_id, task_id, TaskState::AwaitingMerge).await?;
    ctx.state.set_task_status(&sprint_id, task_id, TaskState::Done).await?;
    ctx.events.publish(ServerEvent::TaskStatus { sprint_id: sprint_id.clone(), task_id, status: TaskState::Done.as_str().to_string(), developer_slot: Some(slot) });

    ctx.wave_scheduler.on_task_completed(&sprint_id, task_id).await
}

/// Mark a task `failed`; retry it if it has attempts left, otherwise
/// fail the whole sprint, since a permanently-stuck task blocks its
/// wave forever.
async fn fail_task(ctx: &WorkerContext, sprint_id: &str, task_id: u64, slot: u32, reason: &str) -> DomainResult<()> {
    ctx.events.publish(ServerEvent::Error { sprint_id: sprint_id.to_string(), message: format!("task {task_id} on slot {slot} failed: {reason}") });

    let sprint = ctx
        .state
        .with_sprint(sprint_id, |s| {
            let plan = s.plan.as_mut().ok_or_else(|| DomainError::CorruptPlan("no plan".to_string()))?;
            let task = plan.task_mut(task_id).ok_or(DomainError::TaskNotFound { sprint: s.id.clone(), task: task_id })?;
            task.transition_to(TaskState::Failed).map_err(DomainError::ValidationFailed)
        })
        .await?;

    ctx.events.publish(ServerEvent::TaskStatus { sprint_id: sprint_id.to_string(), task_id, status: TaskState::Failed.as_str().to_string(), developer_slot: Some(slot) });

    let task = sprint.plan.as_ref().and_then(|p| p.task(task_id)).cloned().ok_or_else(|| DomainError::TaskNotFound { sprint: sprint_id.to_string(), task: task_id })?;

    if task.can_retry() {
        let sprint = ctx
            .state
            .with_sprint(sprint_id, |s| {
                let plan = s.plan.as_mut().ok_or_else(|| DomainError::CorruptPlan("no plan".to_string()))?;
                let task = plan.task_mut(task_id).ok_or(DomainError::TaskNotFound { sprint: s.id.clone(), task: task_id })?;
                task.retry().map_err(DomainError::ValidationFailed)
            })
            .await?;
        let task = sprint.plan.as_ref().and_then(|p| p.task(task_id)).cloned().ok_or_else(|| DomainError::TaskNotFound { sprint: sprint_id.to_string(), task: task_id })?;
        ctx.events.publish(ServerEvent::TaskStatus { sprint_id: sprint_id.to_string(), task_id, status: TaskState::Ready.as_str().to_string(), developer_slot: Some(slot) });
        return ctx.wave_scheduler.re_enqueue_task(sprint_id, &task).await;
    }

    ctx.state.set_sprint_status(sprint_id, crate::domain::models::sprint::SprintStatus::Failed).await?;
    ctx.events.publish(ServerEvent::SprintStatus { sprint_id: sprint_id.to_string(), status: crate::domain::models::sprint::SprintStatus::Failed.as_str().to_string(), at: chrono::Utc::now() });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::developer::DeveloperPool;
    use crate::domain::models::plan::Plan;
    use crate::domain::models::sprint::AutonomyMode;
    use crate::domain::models::task::Task;
    use crate::infrastructure::agent::mock::ScriptedAgentRunner;
    use crate::infrastructure::config::Config;
    use crate::infrastructure::queue::SqliteQueueBroker;
    use crate::services::approval_gate::ApprovalGate;
    use crate::services::event_bus::EventBus;
    use crate::services::git_coordinator::GitCoordinator;
    use crate::services::state_store::StateStore;
    use crate::services::wave_scheduler::WaveScheduler;
    use std::sync::Arc;

    async fn fixture(dir: &std::path::Path, agent: ScriptedAgentRunner) -> (WorkerContext, Arc<StateStore>) {
        let state = Arc::new(StateStore::new(dir));
        let git = Arc::new(GitCoordinator::new("git"));
        let broker = Arc::new(SqliteQueueBroker::connect("sqlite::memory:").await.unwrap());
        let events = Arc::new(EventBus::new(dir, 16));
        let wave_scheduler = Arc::new(WaveScheduler::new(state.clone(), git.clone(), broker.clone(), events.clone(), 3));
        let ctx = WorkerContext {
            state: state.clone(),
            git,
            broker,
            events,
            approvals: Arc::new(ApprovalGate::new()),
            agent: Arc::new(agent),
            wave_scheduler,
            config: Arc::new(Config::default()),
        };
        (ctx, state)
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_sprint() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, state) = fixture(dir.path(), ScriptedAgentRunner::new(vec![Err("boom".to_string())])).await;

        state.init_sprint("s1", "spec.md", "# s", dir.path().to_str().unwrap(), 1, AutonomyMode::Supervised).await.unwrap();
        let mut task = Task::new(1, "t1", "d");
        task.max_retries = 0;
        task.state = TaskState::Ready;
        state.set_sprint_plan("s1", Plan::new(vec![task])).await.unwrap();
        state.set_worktree_path("s1", 0, dir.path().to_path_buf()).await.unwrap();
        let _ = DeveloperPool::new(1);

        handle(&ctx, serde_json::json!({"sprint_id": "s1", "task_id": 1})).await.unwrap();

        let sprint = state.get_or_hydrate("s1").await.unwrap();
        assert_eq!(sprint.status, crate::domain::models::sprint::SprintStatus::Failed);
    }
}
