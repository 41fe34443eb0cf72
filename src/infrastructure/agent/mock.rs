//! Scripted fake `AgentRunner`, used by integration tests so they never
//! shell out to a real model.

use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::Mutex;

use crate::domain::errors::DomainError;
use crate::domain::ports::agent_runner::{AgentRunRequest, AgentRunResult, AgentRunner, TokenUsage};

pub struct ScriptedAgentRunner {
    responses: Mutex<VecDeque<Result<String, String>>>,
}

impl ScriptedAgentRunner {
    pub fn new(responses: Vec<Result<String, String>>) -> Self {
        Self { responses: Mutex::new(responses.into_iter().collect()) }
    }

    /// Always succeeds, echoing a fixed string for every call.
    pub fn always(output: impl Into<String>) -> Self {
        let output = output.into();
        Self { responses: Mutex::new(VecDeque::from([Ok(output)])) }
    }
}

#[async_trait]
impl AgentRunner for ScriptedAgentRunner {
    async fn run(&self, request: AgentRunRequest) -> Result<AgentRunResult, DomainError> {
        let mut responses = self.responses.lock().await;
        let next = if responses.len() > 1 { responses.pop_front() } else { responses.front().cloned() };
        let next = next.ok_or_else(|| DomainError::AgentFailed("no scripted response left".to_string()))?;

        match next {
            Ok(output) => {
                request.output.emit_output(output.clone());
                Ok(AgentRunResult {
                    model: "mock-model".to_string(),
                    output,
                    usage: TokenUsage { input_tokens: 100, output_tokens: 50, ..Default::default() },
                    stderr_lines: Vec::new(),
                    duration_secs: 0,
                    exit_code: 0,
                })
            }
            Err(message) => Err(DomainError::AgentFailed(format!("{} (role={})", message, request.role))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::agent_runner::OutputSink;
    use std::path::PathBuf;
    use std::time::Duration;

    fn request() -> AgentRunRequest {
        AgentRunRequest {
            role: "planning".to_string(),
            sprint_id: "s1".to_string(),
            task_id: None,
            working_dir: PathBuf::from("."),
            prompt: "plan it".to_string(),
            timeout: Duration::from_secs(5),
            max_turns: None,
            output: OutputSink::discard(),
        }
    }

    #[tokio::test]
    async fn always_repeats_the_same_response() {
        let runner = ScriptedAgentRunner::always("ok");
        assert_eq!(runner.run(request()).await.unwrap().output, "ok");
        assert_eq!(runner.run(request()).await.unwrap().output, "ok");
    }

    #[tokio::test]
    async fn scripted_sequence_is_consumed_in_order() {
        let runner = ScriptedAgentRunner::new(vec![Ok("first".to_string()), Err("boom".to_string())]);
        assert_eq!(runner.run(request()).await.unwrap().output, "first");
        assert!(runner.run(request()).await.is_err());
    }
}
