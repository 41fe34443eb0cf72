//! Review worker: judges one wave's merged diff against the plan.
//!
//! Pre-condition: sprint is `reviewing`. The agent writes
//! `review-<cycle>.md` (prose) and, ideally, `review-<cycle>-verdict.json`
//! (machine-readable). The verdict file is the primary source of truth;
//! if it is missing or unparsable this worker falls back to scanning the
//! agent's own output and the prose file for a literal `APPROVE` or
//! `REQUEST_CHANGES` token, with `APPROVE` only winning when
//! `REQUEST_CHANGES` is absent from the same text.
//!
//! Post-condition on `APPROVE` with zero must-fix findings: gate per
//! autonomy (`SPEC_FULL.md` §10.6 — supervised sprints pause for a
//! `review_approval` before PR creation; semi-auto and full-auto proceed
//! automatically, per `AutonomyMode`'s own doc comment), then move to
//! `pr-created` and enqueue `pr-create`. Post-condition on
//! `REQUEST_CHANGES` below `max_review_cycles`: parse findings, inject
//! bug-fix tasks, re-establish worktrees, and return to `running`. At or
//! above `max_review_cycles`, fail the sprint outright.

use serde::Deserialize;
use serde_json::Value;

use crate::domain::errors::DomainResult;
use crate::domain::models::approval::{ApprovalDecision, ApprovalKind, ApprovalRequest};
use crate::domain::models::review::{parse_review_report, Verdict};
use crate::domain::models::sprint::{AutonomyMode, SprintStatus};
use crate::domain::ports::agent_runner::AgentRunRequest;
use crate::services::event_bus::ServerEvent;
use crate::services::prompts;

use super::{make_output_sink, record_cost, WorkerContext};

#[derive(Deserialize)]
struct ReviewPayload {
    sprint_id: String,
    cycle: u32,
}

/// Primary-source verdict shape the review prompt asks the agent for.
#[derive(Deserialize)]
struct VerdictFile {
    verdict: String,
    #[serde(default)]
    must_fix_count: u32,
    #[serde(default)]
    summary: Option<String>,
}

pub async fn handle(ctx: &WorkerContext, payload: Value) -> DomainResult<()> {
    let ReviewPayload { sprint_id, cycle } = serde_json::from_value(payload)?;

    let sprint = ctx.state.get_or_hydrate(&sprint_id).await?;
    if sprint.status != SprintStatus::Reviewing {
        tracing::debug!(sprint_id, status = ?sprint.status, "review job stale, sprint already moved on");
        return Ok(());
    }

    let plan_summary = sprint.plan.as_ref().map(plan_summary).unwrap_or_default();
    let template = prompts::template_for("review").unwrap_or_default();
    let prompt = prompts::render(template, &[("cycle", &cycle.to_string()), ("plan", &plan_summary)]);

    let sink = make_output_sink(ctx.events.clone(), sprint_id.clone(), "review".to_string(), None);
    let result = ctx
        .agent
        .run(AgentRunRequest {
            role: "review".to_string(),
            sprint_id: sprint_id.clone(),
            task_id: None,
            working_dir: ctx.sprint_target_dir(&sprint.target_dir),
            prompt,
            timeout: ctx.role_timeout("review"),
            max_turns: None,
            output: sink,
        })
        .await?;

    record_cost(ctx, &sprint_id, "review", None, &result.model, result.usage).await?;

    if result.exit_code != 0 {
        let message = format!("review agent exited with code {}", result.exit_code);
        ctx.events.publish(ServerEvent::Error { sprint_id: sprint_id.clone(), message: message.clone() });
        return Err(crate::domain::errors::DomainError::AgentFailed(message));
    }

    let prose = if ctx.state.review_prose_exists(&sprint_id, cycle) {
        tokio::fs::read_to_string(ctx.state.review_prose_path(&sprint_id, cycle)).await?
    } else {
        result.output.clone()
    };

    let verdict_json: Option<Value> = {
        let path = ctx.state.review_verdict_path(&sprint_id, cycle);
        if path.exists() {
            tokio::fs::read(&path).await.ok().and_then(|raw| serde_json::from_slice(&raw).ok())
        } else {
            None
        }
    };

    let (verdict, must_fix_count, summary) = match verdict_json.as_ref().and_then(|v| serde_json::from_value::<VerdictFile>(v.clone()).ok()) {
        Some(v) if v.verdict.eq_ignore_ascii_case("approve") => (Verdict::Approved, v.must_fix_count, v.summary),
        Some(v) if v.verdict.eq_ignore_ascii_case("request_changes") => (Verdict::ChangesRequested, v.must_fix_count, v.summary),
        _ => (scan_for_verdict(&prose, &result.output), 0, None),
    };

    ctx.state.write_review_artifacts(&sprint_id, cycle, &prose, verdict_json.as_ref()).await?;
    ctx.state.set_review_cycle(&sprint_id, cycle).await?;

    let review_cycle = parse_review_report(&prose, cycle);
    let must_fix_count = if must_fix_count > 0 { must_fix_count } else { review_cycle.blocking_findings().count() as u32 };

    ctx.events.publish(ServerEvent::ReviewUpdate {
        sprint_id: sprint_id.clone(),
        cycle,
        status: verdict_as_str(verdict).to_string(),
        summary: summary.clone(),
    });

    match verdict {
        Verdict::Approved if must_fix_count == 0 => handle_approved(ctx, &sprint_id, cycle, sprint.autonomy, &plan_summary, summary).await,
        Verdict::Approved => {
            // Approved but with leftover must-fix findings is treated the
            // same as changes-requested: the reviewer's prose disagrees
            // with its own verdict field, so trust the findings.
            handle_changes_requested(ctx, &sprint_id, cycle, sprint.max_review_cycles, &review_cycle).await
        }
        Verdict::ChangesRequested => handle_changes_requested(ctx, &sprint_id, cycle, sprint.max_review_cycles, &review_cycle).await,
    }
}

async fn handle_approved(ctx: &WorkerContext, sprint_id: &str, cycle: u32, autonomy: AutonomyMode, plan_summary: &str, summary: Option<String>) -> DomainResult<()> {
    if matches!(autonomy, AutonomyMode::Supervised) {
        let context = format!("Review approved.\n\n{}\n\n{}", summary.unwrap_or_default(), plan_summary);
        let request = ApprovalRequest::new(ApprovalKind::ReviewApproval, context);
        let receiver = ctx.approvals.register(request.id, sprint_id, ApprovalKind::ReviewApproval).await;
        ctx.events.publish(ServerEvent::ApprovalRequired { sprint_id: sprint_id.to_string(), id: request.id, kind: "review_approval".to_string(), context: request.context });

        let (decision, _feedback) = receiver.await.unwrap_or((ApprovalDecision::Rejected, None));
        if decision == ApprovalDecision::Rejected {
            ctx.events.publish(ServerEvent::ReviewUpdate { sprint_id: sprint_id.to_string(), cycle, status: "pr-creation-deferred".to_string(), summary: None });
            return Ok(());
        }
    }

    ctx.state.set_sprint_status(sprint_id, SprintStatus::PrCreated).await?;
    ctx.events.publish(ServerEvent::SprintStatus { sprint_id: sprint_id.to_string(), status: SprintStatus::PrCreated.as_str().to_string(), at: chrono::Utc::now() });
    ctx.broker.enqueue("pr-create", &format!("pr-create-{sprint_id}"), serde_json::json!({"sprint_id": sprint_id}), ctx.config.queue.max_attempts).await?;
    Ok(())
}

async fn handle_changes_requested(
    ctx: &WorkerContext,
    sprint_id: &str,
    cycle: u32,
    max_review_cycles: u32,
    review_cycle: &crate::domain::models::review::ReviewCycle,
) -> DomainResult<()> {
    if cycle >= max_review_cycles {
        ctx.events.publish(ServerEvent::Error { sprint_id: sprint_id.to_string(), message: format!("review cycle {cycle} reached max_review_cycles ({max_review_cycles})") });
        ctx.state.set_sprint_status(sprint_id, SprintStatus::Failed).await?;
        ctx.events.publish(ServerEvent::SprintStatus { sprint_id: sprint_id.to_string(), status: SprintStatus::Failed.as_str().to_string(), at: chrono::Utc::now() });
        ctx.events.publish(ServerEvent::ReviewUpdate { sprint_id: sprint_id.to_string(), cycle, status: "max-cycles-reached".to_string(), summary: None });
        return Ok(());
    }

    let fixes: Vec<(String, String)> = review_cycle.blocking_findings().map(|f| (format!("Fix: {}", f.description), f.file_hint.clone().unwrap_or_default())).collect();

    if fixes.is_empty() {
        // Changes requested but nothing blocking parsed out of the
        // prose: nothing actionable to inject, so loop back to running
        // and let the next wave's developer pass pick up on its own.
        ctx.state.set_sprint_status(sprint_id, SprintStatus::Running).await?;
        ctx.events.publish(ServerEvent::SprintStatus { sprint_id: sprint_id.to_string(), status: SprintStatus::Running.as_str().to_string(), at: chrono::Utc::now() });
        return Ok(());
    }

    let task_ids = ctx.state.add_bug_tasks(sprint_id, fixes).await?;

    let sprint = ctx.state.get_or_hydrate(sprint_id).await?;
    let slots: Vec<u32> = (0..sprint.developer_pool.slot_count()).collect();
    let target = ctx.sprint_target_dir(&sprint.target_dir);
    let worktrees = ctx.git.setup_sprint_git(&target, sprint_id, &slots).await?;
    for (slot, path) in &worktrees {
        ctx.state.set_worktree_path(sprint_id, *slot, path.clone()).await?;
    }

    ctx.state.set_sprint_status(sprint_id, SprintStatus::Running).await?;
    ctx.events.publish(ServerEvent::SprintStatus { sprint_id: sprint_id.to_string(), status: SprintStatus::Running.as_str().to_string(), at: chrono::Utc::now() });

    ctx.wave_scheduler.enqueue_bug_tasks(sprint_id, &task_ids).await
}

/// Fall back to a literal-token scan when no parseable verdict JSON was
/// produced. `APPROVE` only wins when `REQUEST_CHANGES` is absent from
/// the same text, since a reviewer might mention the word in passing
/// ("no changes requested") while still approving.
fn scan_for_verdict(prose: &str, agent_output: &str) -> Verdict {
    let combined = format!("{prose}\n{agent_output}").to_uppercase();
    if combined.contains("REQUEST_CHANGES") || combined.contains("REQUEST CHANGES") {
        Verdict::ChangesRequested
    } else if combined.contains("APPROVE") {
        Verdict::Approved
    } else {
        Verdict::ChangesRequested
    }
}

fn verdict_as_str(v: Verdict) -> &'static str {
    match v {
        Verdict::Approved => "approved",
        Verdict::ChangesRequested => "changes-requested",
    }
}

fn plan_summary(plan: &crate::domain::models::plan::Plan) -> String {
    let mut out = format!("{} task(s):\n", plan.tasks.len());
    for task in &plan.tasks {
        out.push_str(&format!("- #{} {}\n", task.id, task.title));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_prefers_request_changes_over_approve_mention() {
        let verdict = scan_for_verdict("Overall looks okay but REQUEST_CHANGES on the null check", "");
        assert_eq!(verdict, Verdict::ChangesRequested);
    }

    #[test]
    fn scan_falls_back_to_approve_when_unambiguous() {
        let verdict = scan_for_verdict("APPROVE, nice work", "");
        assert_eq!(verdict, Verdict::Approved);
    }

    #[test]
    fn scan_defaults_to_changes_requested_when_neither_token_present() {
        let verdict = scan_for_verdict("some unrelated prose", "also unrelated");
        assert_eq!(verdict, Verdict::ChangesRequested);
    }
}
