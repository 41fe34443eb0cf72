//! Research worker: the first stage after a sprint is created.
//!
//! Pre-condition: sprint is `researching`. Post-condition: `research.md`
//! exists in the sprint directory (written by the agent, or by this
//! worker if the agent left none behind) and the sprint has moved to
//! `planning` with a `planning` job enqueued.

use serde::Deserialize;

use crate::domain::errors::DomainResult;
use crate::domain::models::sprint::SprintStatus;
use crate::domain::ports::agent_runner::AgentRunRequest;
use crate::services::event_bus::ServerEvent;
use crate::services::prompts;

use super::{make_output_sink, record_cost, WorkerContext};

#[derive(Deserialize)]
struct ResearchPayload {
    sprint_id: String,
}

pub async fn handle(ctx: &WorkerContext, payload: serde_json::Value) -> DomainResult<()> {
    let ResearchPayload { sprint_id } = serde_json::from_value(payload)?;

    let sprint = ctx.state.get_or_hydrate(&sprint_id).await?;
    if sprint.status != SprintStatus::Researching {
        tracing::debug!(sprint_id, status = ?sprint.status, "research job stale, sprint already moved on");
        return Ok(());
    }

    let spec = ctx.state.read_spec(&sprint_id).await?;
    let template = prompts::template_for("research").unwrap_or_default();
    let prompt = prompts::render(template, &[("spec", &spec)]);

    let sink = make_output_sink(ctx.events.clone(), sprint_id.clone(), "research".to_string(), None);
    let result = ctx
        .agent
        .run(AgentRunRequest {
            role: "research".to_string(),
            sprint_id: sprint_id.clone(),
            task_id: None,
            working_dir: ctx.sprint_target_dir(&sprint.target_dir),
            prompt,
            timeout: ctx.role_timeout("research"),
            max_turns: None,
            output: sink,
        })
        .await?;

    record_cost(ctx, &sprint_id, "research", None, &result.model, result.usage).await?;

    if result.exit_code != 0 {
        let message = format!("research agent exited with code {}", result.exit_code);
        ctx.events.publish(ServerEvent::Error { sprint_id: sprint_id.clone(), message: message.clone() });
        return Err(crate::domain::errors::DomainError::AgentFailed(message));
    }

    ctx.state.write_research_doc_if_missing(&sprint_id, &result.output).await?;

    ctx.state.set_sprint_status(&sprint_id, SprintStatus::Planning).await?;
    ctx.events.publish(ServerEvent::SprintStatus { sprint_id: sprint_id.clone(), status: SprintStatus::Planning.as_str().to_string(), at: chrono::Utc::now() });

    ctx.broker.enqueue("planning", &format!("planning-{sprint_id}"), serde_json::json!({"sprint_id": sprint_id}), ctx.config.queue.max_attempts).await?;
    Ok(())
}
