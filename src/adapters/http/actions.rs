//! Sprint/task lifecycle actions shared between the REST surface and
//! the `/ws` observer protocol's client-emitted events, so `sprint:approve`
//! over the socket and `POST /api/sprints/{id}/approve` stay in lock step.

use chrono::Utc;

use crate::domain::errors::DomainResult;
use crate::domain::models::sprint::{Sprint, SprintStatus};
use crate::domain::models::task::TaskState;
use crate::services::event_bus::ServerEvent;
use crate::services::restart;
use crate::services::workers::{self, WorkerContext};

pub async fn start_sprint(ctx: &WorkerContext, sprint_id: &str) -> DomainResult<Sprint> {
    let sprint = ctx.state.set_sprint_status(sprint_id, SprintStatus::Researching).await?;
    ctx.events.publish(ServerEvent::SprintStatus { sprint_id: sprint_id.to_string(), status: sprint.status.as_str().to_string(), at: Utc::now() });
    ctx.broker.enqueue("research", &format!("research-{sprint_id}"), serde_json::json!({"sprint_id": sprint_id}), ctx.config.queue.max_attempts).await?;
    Ok(sprint)
}

pub async fn approve_plan(ctx: &WorkerContext, sprint_id: &str) -> DomainResult<Sprint> {
    ctx.state.set_sprint_approved_at(sprint_id).await?;
    let sprint = ctx.state.set_sprint_status(sprint_id, SprintStatus::Approved).await?;
    ctx.events.publish(ServerEvent::SprintStatus { sprint_id: sprint_id.to_string(), status: sprint.status.as_str().to_string(), at: Utc::now() });
    workers::begin_running(ctx, sprint_id).await?;
    ctx.state.get_or_hydrate(sprint_id).await
}

pub async fn pause_sprint(ctx: &WorkerContext, sprint_id: &str) -> DomainResult<Sprint> {
    let sprint = ctx.state.set_sprint_status(sprint_id, SprintStatus::Paused).await?;
    ctx.events.publish(ServerEvent::SprintStatus { sprint_id: sprint_id.to_string(), status: sprint.status.as_str().to_string(), at: Utc::now() });
    Ok(sprint)
}

pub async fn resume_sprint(ctx: &std::sync::Arc<WorkerContext>, sprint_id: &str) -> DomainResult<Sprint> {
    restart::resume_sprint(ctx, sprint_id).await?;
    ctx.state.get_or_hydrate(sprint_id).await
}

pub async fn cancel_sprint(ctx: &WorkerContext, sprint_id: &str) -> DomainResult<Sprint> {
    let sprint = ctx.state.set_sprint_status(sprint_id, SprintStatus::Cancelled).await?;
    ctx.broker.drain_sprint(sprint_id).await?;
    ctx.approvals.cancel_sprint(sprint_id).await;
    ctx.events.publish(ServerEvent::SprintStatus { sprint_id: sprint_id.to_string(), status: sprint.status.as_str().to_string(), at: Utc::now() });
    Ok(sprint)
}

pub async fn complete_sprint(ctx: &WorkerContext, sprint_id: &str) -> DomainResult<Sprint> {
    let sprint = ctx.state.set_sprint_status(sprint_id, SprintStatus::Completed).await?;
    ctx.events.publish(ServerEvent::SprintStatus { sprint_id: sprint_id.to_string(), status: sprint.status.as_str().to_string(), at: Utc::now() });
    Ok(sprint)
}

/// Resolve an outstanding local-merge approval in favour of merging,
/// for sprints whose target tree has no remote (see `pr_create::ship_local`).
pub async fn merge_local(ctx: &WorkerContext, sprint_id: &str) -> DomainResult<bool> {
    Ok(ctx
        .approvals
        .resolve_for_sprint(sprint_id, Some(crate::domain::models::approval::ApprovalKind::LocalMergeApproval), crate::domain::models::approval::ApprovalDecision::Approved, None)
        .await)
}

pub async fn restart_sprint(ctx: &std::sync::Arc<WorkerContext>, sprint_id: &str) -> DomainResult<Sprint> {
    restart::restart_sprint(ctx, sprint_id).await?;
    ctx.state.get_or_hydrate(sprint_id).await
}

pub async fn retry_task(ctx: &WorkerContext, sprint_id: &str, task_id: u64) -> DomainResult<()> {
    let sprint = ctx.state.get_or_hydrate(sprint_id).await?;
    let plan = sprint.plan.as_ref().ok_or_else(|| crate::domain::errors::DomainError::CorruptPlan("no plan".to_string()))?;
    let task = plan.task(task_id).ok_or(crate::domain::errors::DomainError::TaskNotFound { sprint: sprint_id.to_string(), task: task_id })?;
    if task.state != TaskState::Failed {
        return Err(crate::domain::errors::DomainError::ValidationFailed(format!("task {task_id} is {} not failed", task.state.as_str())));
    }

    let sprint = ctx.state.reset_task_status(sprint_id, task_id).await?;
    let plan = sprint.plan.as_ref().ok_or_else(|| crate::domain::errors::DomainError::CorruptPlan("no plan".to_string()))?;
    let task = plan.task(task_id).ok_or(crate::domain::errors::DomainError::TaskNotFound { sprint: sprint_id.to_string(), task: task_id })?;
    ctx.events.publish(ServerEvent::TaskStatus { sprint_id: sprint_id.to_string(), task_id, status: TaskState::Ready.as_str().to_string(), developer_slot: task.developer_slot });
    ctx.wave_scheduler.re_enqueue_task(sprint_id, task).await
}
