//! Testing worker: runs the project's test suite once a wave's
//! implementation has been finalized onto the sprint branch.
//!
//! Pre-condition: sprint is `reviewing` (the Wave Scheduler only enters
//! this status right after `GitCoordinator::finalize_implementation`, so
//! the target directory is already checked out on `sprint/<id>` with no
//! outstanding worktrees). Post-condition: the agent's test run (and any
//! new test files it staged) are committed directly against the target
//! tree, and a `review` job for the next cycle number is enqueued.

use serde::Deserialize;

use crate::domain::errors::DomainResult;
use crate::domain::models::sprint::SprintStatus;
use crate::domain::ports::agent_runner::AgentRunRequest;
use crate::services::event_bus::ServerEvent;
use crate::services::prompts;

use super::{make_output_sink, record_cost, WorkerContext};

#[derive(Deserialize)]
struct TestingPayload {
    sprint_id: String,
}

pub async fn handle(ctx: &WorkerContext, payload: serde_json::Value) -> DomainResult<()> {
    let TestingPayload { sprint_id } = serde_json::from_value(payload)?;

    let sprint = ctx.state.get_or_hydrate(&sprint_id).await?;
    if sprint.status != SprintStatus::Reviewing {
        tracing::debug!(sprint_id, status = ?sprint.status, "testing job stale, sprint already moved on");
        return Ok(());
    }

    let target = ctx.sprint_target_dir(&sprint.target_dir);
    let template = prompts::template_for("testing").unwrap_or_default();
    let prompt = prompts::render(template, &[]);

    let sink = make_output_sink(ctx.events.clone(), sprint_id.clone(), "testing".to_string(), None);
    let result = ctx
        .agent
        .run(AgentRunRequest {
            role: "testing".to_string(),
            sprint_id: sprint_id.clone(),
            task_id: None,
            working_dir: target.clone(),
            prompt,
            timeout: ctx.role_timeout("testing"),
            max_turns: None,
            output: sink,
        })
        .await?;

    record_cost(ctx, &sprint_id, "testing", None, &result.model, result.usage).await?;

    if result.exit_code != 0 {
        let message = format!("testing agent exited with code {}", result.exit_code);
        ctx.events.publish(ServerEvent::Error { sprint_id: sprint_id.clone(), message: message.clone() });
        return Err(crate::domain::errors::DomainError::AgentFailed(message));
    }

    ctx.git.commit_in_worktree(&target, "testing: stage test suite changes").await?;

    ctx.wave_scheduler.enqueue_testing_review(&sprint_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::sprint::AutonomyMode;
    use crate::infrastructure::agent::mock::ScriptedAgentRunner;
    use crate::infrastructure::config::Config;
    use crate::infrastructure::queue::SqliteQueueBroker;
    use crate::services::approval_gate::ApprovalGate;
    use crate::services::event_bus::EventBus;
    use crate::services::git_coordinator::GitCoordinator;
    use crate::services::state_store::StateStore;
    use crate::services::wave_scheduler::WaveScheduler;
    use std::sync::Arc;

    async fn ctx_with(dir: &std::path::Path, agent: ScriptedAgentRunner) -> (WorkerContext, Arc<StateStore>) {
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
    async fn stale_job_for_non_reviewing_sprint_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, state) = ctx_with(dir.path(), ScriptedAgentRunner::always("all green")).await;
        state.init_sprint("s1", "spec.md", "# s", dir.path().to_str().unwrap(), 1, AutonomyMode::Supervised).await.unwrap();

        handle(&ctx, serde_json::json!({"sprint_id": "s1"})).await.unwrap();

        assert!(ctx.broker.dequeue("review").await.unwrap().is_none());
    }
}
