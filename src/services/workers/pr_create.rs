//! PR-create worker: ships the finished sprint branch.
//!
//! Pre-condition: sprint is `pr-created` (the review worker only enters
//! this status once a cycle approves with zero must-fix findings).
//! Post-condition: if the target has a remote, the sprint branch is
//! pushed and a pull request opened against the configured default
//! branch; otherwise a `local-merge` approval is raised and, on
//! approval, the sprint branch is merged directly into the default
//! branch. Either path ends with the sprint `completed`.

use serde::Deserialize;

use crate::domain::errors::DomainResult;
use crate::domain::models::approval::{ApprovalDecision, ApprovalKind, ApprovalRequest};
use crate::domain::models::sprint::{AutonomyMode, Sprint, SprintStatus};
use crate::domain::ports::agent_runner::AgentRunRequest;
use crate::infrastructure::forge::{parse_owner_repo, ForgeClient};
use crate::services::event_bus::ServerEvent;
use crate::services::git_coordinator::GitCoordinator;
use crate::services::prompts;

use super::{make_output_sink, record_cost, WorkerContext};

#[derive(Deserialize)]
struct PrCreatePayload {
    sprint_id: String,
}

pub async fn handle(ctx: &WorkerContext, payload: serde_json::Value) -> DomainResult<()> {
    let PrCreatePayload { sprint_id } = serde_json::from_value(payload)?;

    let sprint = ctx.state.get_or_hydrate(&sprint_id).await?;
    if sprint.status != SprintStatus::PrCreated {
        tracing::debug!(sprint_id, status = ?sprint.status, "pr-create job stale, sprint already moved on");
        return Ok(());
    }

    let target = ctx.sprint_target_dir(&sprint.target_dir);
    let branch = GitCoordinator::sprint_branch(&sprint_id);
    let plan_summary = sprint.plan.as_ref().map(plan_summary).unwrap_or_default();
    let review_verdict = latest_review_verdict(ctx, &sprint_id, &sprint).await;
    let cost_summary = cost_summary(&sprint);

    let template = prompts::template_for("pr-create").unwrap_or_default();
    let prompt = prompts::render(template, &[("branch", &branch), ("plan_summary", &plan_summary), ("review_verdict", &review_verdict), ("cost_summary", &cost_summary)]);

    let sink = make_output_sink(ctx.events.clone(), sprint_id.clone(), "pr-create".to_string(), None);
    let result = ctx
        .agent
        .run(AgentRunRequest {
            role: "pr-create".to_string(),
            sprint_id: sprint_id.clone(),
            task_id: None,
            working_dir: target.clone(),
            prompt,
            timeout: ctx.role_timeout("pr-create"),
            max_turns: None,
            output: sink,
        })
        .await?;

    record_cost(ctx, &sprint_id, "pr-create", None, &result.model, result.usage).await?;

    if result.exit_code != 0 {
        let message = format!("pr-create agent exited with code {}", result.exit_code);
        ctx.events.publish(ServerEvent::Error { sprint_id: sprint_id.clone(), message: message.clone() });
        return Err(crate::domain::errors::DomainError::AgentFailed(message));
    }

    if ctx.git.has_remote(&target).await {
        ship_remote(ctx, &sprint_id, &target, &branch, &result.output, &plan_summary, &review_verdict, &cost_summary).await
    } else {
        ship_local(ctx, &sprint_id, &target, sprint.autonomy).await
    }
}

/// Push the branch and open a PR. The agent is expected to have already
/// done this itself via whatever forge CLI it has on PATH; if its
/// output doesn't contain a recognizable PR URL, fall back to the
/// forge REST API directly when a token is configured.
async fn ship_remote(
    ctx: &WorkerContext,
    sprint_id: &str,
    target: &std::path::Path,
    branch: &str,
    agent_output: &str,
    plan_summary: &str,
    review_verdict: &str,
    cost_summary: &str,
) -> DomainResult<()> {
    if extract_pr_url(agent_output).is_none() {
        if let Some(token) = ctx.config.forge.token.clone() {
            ctx.git.push_branch(target, sprint_id).await?;
            let remote_url = ctx.git.remote_url(target).await;
            let owner_repo = remote_url.as_deref().and_then(parse_owner_repo);
            if let Some((owner, repo)) = owner_repo {
                let forge = ForgeClient::new(ctx.config.forge.api_base.clone(), token);
                let body = format!("{plan_summary}\n\n## Latest review verdict\n\n{review_verdict}\n\n## Cost summary\n\n{cost_summary}");
                forge.create_pull_request(&owner, &repo, &format!("Sprint {sprint_id}"), &body, branch, &ctx.config.default_branch).await?;
            } else {
                tracing::warn!(sprint_id, "could not determine owner/repo from origin remote for forge fallback");
            }
        }
    }

    complete_sprint(ctx, sprint_id).await
}

/// No remote: gate on a local-merge approval unless full-auto is
/// configured to skip it, then merge the sprint branch into the
/// default branch directly.
async fn ship_local(ctx: &WorkerContext, sprint_id: &str, target: &std::path::Path, autonomy: AutonomyMode) -> DomainResult<()> {
    let skip_gate = matches!(autonomy, AutonomyMode::FullAuto) && ctx.config.full_auto_merges_local;

    if !skip_gate {
        let request = ApprovalRequest::new(ApprovalKind::LocalMergeApproval, format!("No remote configured for {sprint_id}; merge sprint branch into {}?", ctx.config.default_branch));
        let receiver = ctx.approvals.register(request.id, sprint_id, ApprovalKind::LocalMergeApproval).await;
        ctx.events.publish(ServerEvent::ApprovalRequired { sprint_id: sprint_id.to_string(), id: request.id, kind: "local_merge_approval".to_string(), context: request.context });

        let (decision, _feedback) = receiver.await.unwrap_or((ApprovalDecision::Rejected, None));
        if decision == ApprovalDecision::Rejected {
            tracing::info!(sprint_id, "local merge rejected, leaving sprint branch intact");
            return Ok(());
        }
    }

    ctx.git.merge_sprint_to_main(target, sprint_id, &ctx.config.default_branch).await?;
    complete_sprint(ctx, sprint_id).await
}

async fn complete_sprint(ctx: &WorkerContext, sprint_id: &str) -> DomainResult<()> {
    ctx.state.set_sprint_status(sprint_id, SprintStatus::Completed).await?;
    ctx.events.publish(ServerEvent::SprintStatus { sprint_id: sprint_id.to_string(), status: SprintStatus::Completed.as_str().to_string(), at: chrono::Utc::now() });
    Ok(())
}

/// A crude, tolerant scan for a PR URL the agent may have echoed back
/// after pushing and opening it with its own forge CLI.
fn extract_pr_url(agent_output: &str) -> Option<&str> {
    agent_output.split_whitespace().find(|token| token.contains("/pull/") || token.contains("/pulls/"))
}

async fn latest_review_verdict(ctx: &WorkerContext, sprint_id: &str, sprint: &Sprint) -> String {
    if sprint.review_cycle == 0 {
        return "no review cycle on record".to_string();
    }
    let path = ctx.state.review_verdict_path(sprint_id, sprint.review_cycle);
    tokio::fs::read_to_string(&path).await.unwrap_or_else(|_| "verdict file unavailable".to_string())
}

fn cost_summary(sprint: &Sprint) -> String {
    let summary = sprint.cost_ledger.total();
    format!("${:.4} across {} agent invocation(s) ({} input / {} output tokens)", summary.total_usd, summary.session_count, summary.total_input_tokens, summary.total_output_tokens)
}

fn plan_summary(plan: &crate::domain::models::plan::Plan) -> String {
    let mut out = format!("{} task(s):\n", plan.tasks.len());
    for task in &plan.tasks {
        out.push_str(&format!("- #{} {}\n", task.id, task.title));
    }
    out
}
