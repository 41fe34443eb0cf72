//! Restart / resume policy (spec §4.9).
//!
//! Shared by two callers: the orchestrator's boot sequence, which runs
//! this for every sprint `StateStore::load_active_sprints_from_disk`
//! admits, and the `POST /api/sprints/{id}/restart` endpoint, which
//! runs it on demand against a single sprint that an operator believes
//! is stuck.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::domain::errors::DomainResult;
use crate::domain::models::sprint::SprintStatus;
use crate::services::workers::WorkerContext;

/// Inspect a sprint's persisted artefacts and re-enqueue whatever stage
/// was interrupted, per the four cases in §4.9.
#[instrument(skip(ctx))]
pub async fn restart_sprint(ctx: &WorkerContext, sprint_id: &str) -> DomainResult<()> {
    let sprint = ctx.state.get_or_hydrate(sprint_id).await?;

    if !ctx.state.research_doc_exists(sprint_id) {
        info!(sprint_id, "restart: no research.md, re-enqueueing research");
        return ctx.broker.enqueue("research", &format!("research-{sprint_id}-restart"), serde_json::json!({"sprint_id": sprint_id}), ctx.config.queue.max_attempts).await.map(|_| ());
    }

    if !ctx.state.plan_doc_exists(sprint_id) {
        info!(sprint_id, "restart: research.md present but no plan.json, re-enqueueing planning");
        return ctx.broker.enqueue("planning", &format!("planning-{sprint_id}-restart"), serde_json::json!({"sprint_id": sprint_id}), ctx.config.queue.max_attempts).await.map(|_| ());
    }

    if sprint.status == SprintStatus::Reviewing {
        let cycle = ctx.state.latest_review_cycle_on_disk(sprint_id);
        if cycle == 0 || !ctx.state.review_prose_exists(sprint_id, cycle) {
            info!(sprint_id, "restart: reviewing with no review prose on disk, enqueueing review cycle 1");
            return ctx.wave_scheduler.enqueue_testing_review(sprint_id).await;
        }
        info!(sprint_id, cycle, "restart: reviewing with review-{cycle}.md present, re-running testing ahead of a fresh cycle");
        return ctx.wave_scheduler.enqueue_testing(sprint_id).await;
    }

    info!(sprint_id, status = ?sprint.status, "restart: resetting non-completed tasks and re-establishing worktrees");
    ctx.state.reset_sprint_for_restart(sprint_id).await?;

    let slots: Vec<u32> = (0..sprint.developer_pool.slot_count()).collect();
    let target = ctx.sprint_target_dir(&sprint.target_dir);
    let worktrees = ctx.git.setup_sprint_git(&target, sprint_id, &slots).await?;
    for (slot, path) in &worktrees {
        ctx.state.set_worktree_path(sprint_id, *slot, path.clone()).await?;
    }

    if sprint.status != SprintStatus::Running {
        ctx.state.set_sprint_status(sprint_id, SprintStatus::Running).await?;
    }

    ctx.wave_scheduler.enqueue_ready_tasks(sprint_id).await
}

/// `resume`: re-enqueue whatever was `ready` when the sprint was
/// paused, then flip the sprint back to the status it was paused from.
/// A pause with no plan (still in `researching`/`planning`) has nothing
/// to re-enqueue here; the stage's own singleton consumer already holds
/// whatever job was in flight.
pub async fn resume_sprint(ctx: &Arc<WorkerContext>, sprint_id: &str) -> DomainResult<()> {
    let sprint = ctx.state.resume_sprint(sprint_id).await?;
    ctx.events.publish(crate::services::event_bus::ServerEvent::SprintStatus {
        sprint_id: sprint_id.to_string(),
        status: sprint.status.as_str().to_string(),
        at: chrono::Utc::now(),
    });

    if sprint.status == SprintStatus::Running && sprint.plan.is_some() {
        ctx.wave_scheduler.enqueue_ready_tasks(sprint_id).await?;
    }
    Ok(())
}
