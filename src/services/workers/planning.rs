//! Planning worker: turns research notes into a validated task DAG.
//!
//! Pre-condition: sprint is `planning`. Post-condition: `plan.json`
//! exists and has passed `StateStore::set_sprint_plan`'s structural
//! validation; the sprint has moved to `awaiting-approval` (supervised,
//! semi-auto) or directly to `approved` with wave one bootstrapped
//! (full-auto), per `Sprint::autonomy`.
//!
//! This worker does not itself wait on a human decision: raising
//! `awaiting-approval` and returning keeps the (single, global)
//! planning queue consumer from stalling every other sprint's planning
//! behind one reviewer. The `approved` transition is driven externally,
//! by the orchestrator's approve/reject entry points.

use serde::Deserialize;
use serde_json::Value;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::plan::Plan;
use crate::domain::models::sprint::{AutonomyMode, SprintStatus};
use crate::domain::models::task::{Task, TaskRole};
use crate::domain::ports::agent_runner::{extract_last_json_value, AgentRunRequest};
use crate::services::event_bus::ServerEvent;
use crate::services::prompts;

use super::{make_output_sink, record_cost, WorkerContext};

#[derive(Deserialize)]
struct PlanningPayload {
    sprint_id: String,
}

#[derive(Deserialize)]
struct RawPlan {
    tasks: Vec<RawTask>,
}

#[derive(Deserialize)]
struct RawTask {
    id: Value,
    title: String,
    description: String,
    #[serde(default)]
    depends_on: Vec<Value>,
    #[serde(default)]
    files_touched: Vec<String>,
    #[serde(default)]
    wave: Option<u32>,
    #[serde(default)]
    developer_slot: Option<u32>,
    #[serde(default)]
    role: Option<String>,
}

fn coerce_id(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

/// Normalise the planner agent's loosely-typed JSON (string or numeric
/// ids, optional wave/slot) into proper domain `Task`s.
fn normalize_plan(raw: RawPlan) -> DomainResult<Plan> {
    let mut tasks = Vec::with_capacity(raw.tasks.len());
    for raw_task in raw.tasks {
        let id = coerce_id(&raw_task.id).ok_or_else(|| DomainError::CorruptPlan("plan task has a non-numeric id".to_string()))?;
        let mut task = Task::new(id, raw_task.title, raw_task.description);
        task.depends_on = raw_task.depends_on.iter().filter_map(coerce_id).collect();
        task.files_touched = raw_task.files_touched;
        task.wave = raw_task.wave;
        task.developer_slot = raw_task.developer_slot;
        task.role = raw_task.role.as_deref().map(TaskRole::parse).unwrap_or_default();
        tasks.push(task);
    }
    Ok(Plan::new(tasks))
}

async fn load_plan(ctx: &WorkerContext, sprint_id: &str, agent_output: &str) -> DomainResult<Plan> {
    let path = ctx.state.sprint_dir(sprint_id).join("plan.json");
    if path.exists() {
        let raw = tokio::fs::read(&path).await?;
        let parsed: RawPlan = serde_json::from_slice(&raw)?;
        return normalize_plan(parsed);
    }

    let value = extract_last_json_value(agent_output).ok_or_else(|| DomainError::CorruptPlan("planner produced no plan.json and no JSON in its output".to_string()))?;
    let parsed: RawPlan = serde_json::from_value(value)?;
    normalize_plan(parsed)
}

/// Whether `awaiting-approval` must precede `approved` for this autonomy
/// mode (`SPEC_FULL.md` §10.6: supervised and semi-auto both require
/// plan review; only full-auto can skip straight to `approved`).
fn needs_plan_approval(autonomy: AutonomyMode) -> bool {
    !matches!(autonomy, AutonomyMode::FullAuto)
}

pub async fn handle(ctx: &WorkerContext, payload: Value) -> DomainResult<()> {
    let PlanningPayload { sprint_id } = serde_json::from_value(payload)?;

    let sprint = ctx.state.get_or_hydrate(&sprint_id).await?;
    if sprint.status != SprintStatus::Planning {
        tracing::debug!(sprint_id, status = ?sprint.status, "planning job stale, sprint already moved on");
        return Ok(());
    }

    let research = ctx.state.read_research_doc(&sprint_id).await?;
    let developer_count = sprint.developer_pool.slot_count().to_string();
    let template = prompts::template_for("planning").unwrap_or_default();
    let prompt = prompts::render(template, &[("research", &research), ("developer_count", &developer_count)]);

    let sink = make_output_sink(ctx.events.clone(), sprint_id.clone(), "planning".to_string(), None);
    let result = ctx
        .agent
        .run(AgentRunRequest {
            role: "planning".to_string(),
            sprint_id: sprint_id.clone(),
            task_id: None,
            working_dir: ctx.sprint_target_dir(&sprint.target_dir),
            prompt,
            timeout: ctx.role_timeout("planning"),
            max_turns: None,
            output: sink,
        })
        .await?;

    record_cost(ctx, &sprint_id, "planning", None, &result.model, result.usage).await?;

    if result.exit_code != 0 {
        let message = format!("planning agent exited with code {}", result.exit_code);
        ctx.events.publish(ServerEvent::Error { sprint_id: sprint_id.clone(), message: message.clone() });
        return Err(DomainError::AgentFailed(message));
    }

    let plan = match load_plan(ctx, &sprint_id, &result.output).await {
        Ok(plan) => plan,
        Err(e) if e.is_structural() => {
            ctx.state.set_sprint_status(&sprint_id, SprintStatus::Failed).await?;
            ctx.events.publish(ServerEvent::Error { sprint_id: sprint_id.clone(), message: e.to_string() });
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    let plan = match ctx.state.set_sprint_plan(&sprint_id, plan).await {
        Ok(sprint) => sprint.plan.expect("set_sprint_plan always leaves a plan"),
        Err(e) if e.is_structural() => {
            ctx.state.set_sprint_status(&sprint_id, SprintStatus::Failed).await?;
            ctx.events.publish(ServerEvent::Error { sprint_id: sprint_id.clone(), message: e.to_string() });
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    if needs_plan_approval(sprint.autonomy) {
        ctx.state.set_sprint_status(&sprint_id, SprintStatus::AwaitingApproval).await?;
        ctx.events.publish(ServerEvent::SprintStatus { sprint_id: sprint_id.clone(), status: SprintStatus::AwaitingApproval.as_str().to_string(), at: chrono::Utc::now() });

        let request = crate::domain::models::approval::ApprovalRequest::new(crate::domain::models::approval::ApprovalKind::PlanApproval, plan_summary(&plan));
        ctx.events.publish(ServerEvent::ApprovalRequired { sprint_id: sprint_id.clone(), id: request.id, kind: "plan_approval".to_string(), context: request.context });
    } else {
        ctx.state.set_sprint_approved_at(&sprint_id).await?;
        ctx.state.set_sprint_status(&sprint_id, SprintStatus::Approved).await?;
        ctx.events.publish(ServerEvent::SprintStatus { sprint_id: sprint_id.clone(), status: SprintStatus::Approved.as_str().to_string(), at: chrono::Utc::now() });

        super::begin_running(ctx, &sprint_id).await?;
    }

    Ok(())
}

fn plan_summary(plan: &Plan) -> String {
    let mut out = format!("{} task(s):\n", plan.tasks.len());
    for task in &plan.tasks {
        out.push_str(&format!("- #{} {} (wave {:?}, slot {:?})\n", task.id, task.title, task.wave, task.developer_slot));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_string_ids_and_dependencies() {
        let raw: RawPlan = serde_json::from_value(serde_json::json!({
            "tasks": [
                {"id": "1", "title": "a", "description": "d", "wave": 1, "developer_slot": 0},
                {"id": 2, "title": "b", "description": "d", "depends_on": ["1"], "wave": 2, "developer_slot": 0}
            ]
        }))
        .unwrap();

        let plan = normalize_plan(raw).unwrap();
        assert_eq!(plan.tasks.len(), 2);
        assert_eq!(plan.task(2).unwrap().depends_on, vec![1]);
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn normalizes_legacy_role_names_to_canonical_developer() {
        let raw: RawPlan = serde_json::from_value(serde_json::json!({
            "tasks": [
                {"id": 1, "title": "a", "description": "d", "role": "implementer"},
                {"id": 2, "title": "b", "description": "d", "role": "tester"}
            ]
        }))
        .unwrap();

        let plan = normalize_plan(raw).unwrap();
        assert_eq!(plan.task(1).unwrap().role, crate::domain::models::task::TaskRole::Developer);
        assert_eq!(plan.task(2).unwrap().role, crate::domain::models::task::TaskRole::Tester);
    }

    #[test]
    fn rejects_non_numeric_id() {
        let raw: RawPlan = serde_json::from_value(serde_json::json!({
            "tasks": [{"id": "not-a-number", "title": "a", "description": "d"}]
        }))
        .unwrap();
        assert!(normalize_plan(raw).is_err());
    }

    #[test]
    fn full_auto_skips_approval_everything_else_needs_it() {
        assert!(!needs_plan_approval(AutonomyMode::FullAuto));
        assert!(needs_plan_approval(AutonomyMode::Supervised));
        assert!(needs_plan_approval(AutonomyMode::SemiAuto));
    }
}
