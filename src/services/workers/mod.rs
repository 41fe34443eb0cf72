//! Role Workers (C7).
//!
//! Each submodule implements one named role's pre/post-condition
//! contract (`SPEC_FULL.md` §4.6): pull a job off its queue, run the
//! agent substrate against that role's prompt template, and fold the
//! result back into the State Store, Git Coordinator, and Event Bus.
//!
//! Workers are plain async functions, not a trait object, since each
//! role's payload shape and post-conditions differ enough that a shared
//! interface would just be a `dyn Any` in practice. `WorkerContext`
//! bundles the shared collaborators every role needs.

pub mod developer;
pub mod planning;
pub mod pr_create;
pub mod research;
pub mod review;
pub mod testing;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::errors::DomainResult;
use crate::domain::models::sprint::SprintStatus;
use crate::domain::ports::agent_runner::{AgentRunner, OutputSink};
use crate::domain::ports::queue_broker::QueueBroker;
use crate::infrastructure::config::Config;
use crate::services::approval_gate::ApprovalGate;
use crate::services::event_bus::{EventBus, ServerEvent};
use crate::services::git_coordinator::GitCoordinator;
use crate::services::state_store::StateStore;
use crate::services::wave_scheduler::WaveScheduler;

/// Shared collaborators every role worker needs. Cheap to clone (every
/// field is an `Arc`), so each queue consumer loop holds its own copy.
#[derive(Clone)]
pub struct WorkerContext {
    pub state: Arc<StateStore>,
    pub git: Arc<GitCoordinator>,
    pub broker: Arc<dyn QueueBroker>,
    pub events: Arc<EventBus>,
    pub approvals: Arc<ApprovalGate>,
    pub agent: Arc<dyn AgentRunner>,
    pub wave_scheduler: Arc<WaveScheduler>,
    pub config: Arc<Config>,
}

impl WorkerContext {
    /// Per-role wall-clock budget, falling back to 600s (the same
    /// default `RoleConfig::timeout_secs` carries) when a role has no
    /// explicit override in config.
    pub fn role_timeout(&self, role: &str) -> Duration {
        self.config.roles.get(role).map_or(Duration::from_secs(600), |r| Duration::from_secs(r.timeout_secs))
    }

    pub fn sprint_target_dir(&self, target_dir: &str) -> PathBuf {
        PathBuf::from(target_dir)
    }
}

/// Build an `OutputSink` that forwards every line an agent invocation
/// produces to a `task:log` event, tagging stderr lines with a
/// `-stderr` suffixed role so observers can tell the two streams apart.
pub fn make_output_sink(events: Arc<EventBus>, sprint_id: String, role: String, task_id: Option<u64>) -> OutputSink {
    let (stdout_tx, mut stdout_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let (stderr_tx, mut stderr_rx) = tokio::sync::mpsc::unbounded_channel::<String>();

    let stdout_events = events.clone();
    let stdout_sprint = sprint_id.clone();
    let stdout_role = role.clone();
    tokio::spawn(async move {
        while let Some(line) = stdout_rx.recv().await {
            stdout_events.publish(ServerEvent::TaskLog { sprint_id: stdout_sprint.clone(), task_id, role: stdout_role.clone(), line });
        }
    });

    tokio::spawn(async move {
        while let Some(line) = stderr_rx.recv().await {
            events.publish(ServerEvent::TaskLog { sprint_id: sprint_id.clone(), task_id, role: format!("{role}-stderr"), line });
        }
    });

    OutputSink::new(stdout_tx, stderr_tx)
}

/// Shared `approved` → `running` transition: stand up one git worktree
/// per developer slot, persist the paths, flip the sprint to `running`,
/// and bootstrap wave one. Called both by the planning worker
/// (full-auto, which skips `awaiting-approval` entirely) and by the
/// orchestrator's plan-approval entry point (supervised/semi-auto).
pub async fn begin_running(ctx: &WorkerContext, sprint_id: &str) -> DomainResult<()> {
    let sprint = ctx.state.get_or_hydrate(sprint_id).await?;
    let slots: Vec<u32> = (0..sprint.developer_pool.slot_count()).collect();
    let target = ctx.sprint_target_dir(&sprint.target_dir);

    let worktrees = ctx.git.setup_sprint_git(&target, sprint_id, &slots).await?;
    for (slot, path) in &worktrees {
        ctx.state.set_worktree_path(sprint_id, *slot, path.clone()).await?;
    }

    ctx.state.set_sprint_status(sprint_id, SprintStatus::Running).await?;
    ctx.events.publish(ServerEvent::SprintStatus { sprint_id: sprint_id.to_string(), status: SprintStatus::Running.as_str().to_string(), at: chrono::Utc::now() });

    ctx.wave_scheduler.bootstrap_wave_one(sprint_id).await
}

/// Record one agent invocation's token usage against the sprint's cost
/// ledger and publish a `cost:update` with the running total.
pub async fn record_cost(ctx: &WorkerContext, sprint_id: &str, role: &str, task_id: Option<u64>, model: &str, usage: crate::domain::ports::agent_runner::TokenUsage) -> crate::domain::errors::DomainResult<()> {
    let session = crate::services::pricing::session_for(role, task_id, model, usage);
    let sprint = ctx.state.record_cost_session(sprint_id, session).await?;
    ctx.events.publish(ServerEvent::CostUpdate { sprint_id: sprint_id.to_string(), total_usd: sprint.cost_ledger.total().total_usd });
    Ok(())
}
