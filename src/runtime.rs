//! Process bootstrap: wires the concrete adapters behind every domain
//! port into one [`WorkerContext`], spawns the per-queue consumer
//! loops (C6/C7), and rehydrates sprints that were active when the
//! process last exited (spec §4.9, §8 "Crash-restart mid-wave").
//!
//! This is the one place in the crate that is allowed to know about
//! every concrete adapter at once; everything downstream of here only
//! ever sees the `WorkerContext`'s trait objects and `Arc`s.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::adapters::http::Server;
use crate::domain::ports::agent_runner::AgentRunner;
use crate::domain::ports::queue_broker::QueueBroker;
use crate::infrastructure::agent::{ClaudeCliConfig, ClaudeCliRunner};
use crate::infrastructure::config::Config;
use crate::infrastructure::queue::{DegradedQueueBroker, SqliteQueueBroker};
use crate::services::approval_gate::ApprovalGate;
use crate::services::event_bus::EventBus;
use crate::services::git_coordinator::GitCoordinator;
use crate::services::state_store::StateStore;
use crate::services::wave_scheduler::WaveScheduler;
use crate::services::workers::{self, WorkerContext};

/// Every singleton-consumer queue this orchestrator runs, other than
/// the per-developer-slot `impl-<n>` queues (whose count depends on
/// the configured pool size and is added separately in
/// [`spawn_consumers`]).
const SINGLETON_QUEUES: &[&str] = &["research", "planning", "testing", "review", "pr-create"];

/// Build the shared [`WorkerContext`] from a loaded [`Config`].
///
/// If the SQLite-backed queue broker cannot be opened or migrated, a
/// [`DegradedQueueBroker`] stands in instead: the HTTP surface still
/// starts (spec §6 "Exit codes": a broker outage is logged as degraded,
/// not fatal) and every sprint-mutating endpoint fails loudly with
/// `BrokerUnavailable` rather than the whole process refusing to serve.
pub async fn build_context(config: Config, sprints_root: impl Into<std::path::PathBuf>) -> Arc<WorkerContext> {
    let sprints_root = sprints_root.into();
    let config = Arc::new(config);

    let state = Arc::new(StateStore::new(sprints_root.clone()));
    let git = Arc::new(GitCoordinator::new(config.git_path.clone()));
    let events = Arc::new(EventBus::new(sprints_root, 256));
    let approvals = Arc::new(ApprovalGate::new());

    let database_url = format!("sqlite://{}?mode=rwc", config.queue.database_path);
    let broker: Arc<dyn QueueBroker> = match SqliteQueueBroker::connect(&database_url).await {
        Ok(broker) => Arc::new(broker),
        Err(e) => {
            tracing::error!(error = %e, db = %config.queue.database_path, "queue broker unavailable at boot, starting in degraded mode");
            Arc::new(DegradedQueueBroker::new(e.to_string()))
        }
    };

    let wave_scheduler = Arc::new(WaveScheduler::new(state.clone(), git.clone(), broker.clone(), events.clone(), config.queue.max_attempts));

    let models = config
        .roles
        .iter()
        .filter_map(|(role, cfg)| cfg.model.clone().map(|m| (role.clone(), m)))
        .collect();
    let agent: Arc<dyn AgentRunner> = Arc::new(ClaudeCliRunner::new(ClaudeCliConfig {
        claude_path: config.agent_cli_path.clone(),
        default_model: "claude-sonnet-4-5-20250929".to_string(),
        models,
    }));

    Arc::new(WorkerContext { state, git, broker, events, approvals, agent, wave_scheduler, config })
}

/// Spawn one consumer task per named queue: `research`, `planning`,
/// `testing`, `review`, `pr-create` (singleton across all sprints) plus
/// one `impl-<slot>` queue per configured developer-pool slot.
///
/// Every consumer loops `dequeue_blocking` → `handle` → `ack`/`nack`
/// forever; a worker only ever suspends waiting on its queue, an agent
/// child process, a git subprocess, or the approval gate (spec §5).
pub fn spawn_consumers(ctx: Arc<WorkerContext>) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();

    for &queue in SINGLETON_QUEUES {
        handles.push(spawn_one(ctx.clone(), queue.to_string()));
    }
    for slot in 0..ctx.config.developer_pool.max_concurrent_slots {
        handles.push(spawn_one(ctx.clone(), format!("impl-{slot}")));
    }

    handles
}

fn spawn_one(ctx: Arc<WorkerContext>, queue_name: String) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let job = match ctx.broker.dequeue_blocking(&queue_name).await {
                Ok(job) => job,
                Err(e) => {
                    tracing::warn!(queue = %queue_name, error = %e, "queue unavailable, backing off before retrying");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            let result = dispatch(&ctx, &queue_name, job.payload.clone()).await;
            match result {
                Ok(()) => {
                    if let Err(e) = ctx.broker.ack(job.id).await {
                        tracing::error!(queue = %queue_name, job = %job.id, error = %e, "failed to ack completed job");
                    }
                }
                Err(e) => {
                    tracing::error!(queue = %queue_name, job = %job.id, error = %e, "job failed");
                    let backoff = Duration::from_millis(ctx.config.queue.initial_backoff_ms * u64::from(job.attempt.max(1)));
                    let backoff = backoff.min(Duration::from_millis(ctx.config.queue.max_backoff_ms));
                    if let Err(e) = ctx.broker.nack(job.id, backoff).await {
                        tracing::error!(queue = %queue_name, job = %job.id, error = %e, "failed to nack failed job");
                    }
                }
            }
        }
    })
}

async fn dispatch(ctx: &WorkerContext, queue_name: &str, payload: serde_json::Value) -> crate::domain::errors::DomainResult<()> {
    if let Some(slot) = queue_name.strip_prefix("impl-") {
        let _ = slot;
        return workers::developer::handle(ctx, payload).await;
    }
    match queue_name {
        "research" => workers::research::handle(ctx, payload).await,
        "planning" => workers::planning::handle(ctx, payload).await,
        "testing" => workers::testing::handle(ctx, payload).await,
        "review" => workers::review::handle(ctx, payload).await,
        "pr-create" => workers::pr_create::handle(ctx, payload).await,
        other => {
            tracing::warn!(queue = other, "dropping job on unknown queue");
            Ok(())
        }
    }
}

/// On boot, admit every non-terminal, non-`created` sprint from disk
/// and run its restart policy (spec §4.9) so in-flight work resumes
/// from wherever it was left: a crash mid-wave re-enqueues the
/// `in-progress` task that never finished, rather than losing it.
pub async fn resume_active_sprints(ctx: &Arc<WorkerContext>) -> Result<()> {
    let ids = ctx.state.load_active_sprints_from_disk().await.context("failed to scan sprint directories at boot")?;
    for id in ids {
        tracing::info!(sprint_id = %id, "resuming sprint from disk");
        if let Err(e) = crate::services::restart::restart_sprint(ctx, &id).await {
            tracing::error!(sprint_id = %id, error = %e, "failed to resume sprint at boot");
        }
    }
    Ok(())
}

/// Start the full daemon: build the context, resume whatever was
/// active, spawn every queue consumer, then serve the combined REST +
/// `/ws` surface until `shutdown` resolves.
pub async fn run_daemon<F>(config: Config, sprints_root: impl Into<std::path::PathBuf>, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let ctx = build_context(config, sprints_root).await;
    resume_active_sprints(&ctx).await?;

    let consumers = spawn_consumers(ctx.clone());
    let server = Server::new(ctx);

    let result = server.serve_with_shutdown(shutdown).await;
    for handle in consumers {
        handle.abort();
    }
    result
}
