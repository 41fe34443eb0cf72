//! Claude CLI agent runner.
//!
//! Shells out to the `claude` CLI (or any CLI honoring the same
//! contract) as the opaque agent substrate described in `SPEC_FULL.md`
//! §4.4: prompt piped over stdin then stdin closed, stdout read as
//! line-delimited JSON, stderr captured as raw lines for logging.
//! Assistant text and condensed tool-use summaries are forwarded to
//! the caller's `OutputSink` as each line arrives.

use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;

use crate::domain::errors::DomainError;
use crate::domain::ports::agent_runner::{AgentRunRequest, AgentRunResult, AgentRunner, TokenUsage};

/// Configuration for the claude CLI agent runner.
#[derive(Debug, Clone)]
pub struct ClaudeCliConfig {
    /// Path to the claude CLI executable (defaults to "claude" in PATH).
    pub claude_path: String,
    /// Model used when a role has no override in `models`.
    pub default_model: String,
    /// Per-role model override (research, planning, developer, testing,
    /// review, pr-create), sourced from `Config::roles` at startup.
    pub models: std::collections::HashMap<String, String>,
}

impl Default for ClaudeCliConfig {
    fn default() -> Self {
        Self {
            claude_path: "claude".to_string(),
            default_model: "claude-sonnet-4-5-20250929".to_string(),
            models: std::collections::HashMap::new(),
        }
    }
}

/// One line of the CLI's line-delimited JSON stdout stream.
///
/// Only the fields this orchestrator reads are modeled; anything else
/// in the line is ignored rather than rejected, since the CLI's own
/// output schema isn't a contract this crate owns.
#[derive(Debug, Deserialize, Default)]
struct CliEnvelopeLine {
    #[serde(default)]
    r#type: Option<String>,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<CliUsage>,
    #[serde(default)]
    message: Option<CliMessage>,
}

#[derive(Debug, Deserialize, Default)]
struct CliMessage {
    #[serde(default)]
    content: Vec<CliContentBlock>,
}

#[derive(Debug, Deserialize, Default)]
struct CliContentBlock {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CliUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
}

pub struct ClaudeCliRunner {
    config: ClaudeCliConfig,
}

impl ClaudeCliRunner {
    pub fn new(config: ClaudeCliConfig) -> Self {
        Self { config }
    }

    fn configured_model_for(&self, role: &str) -> &str {
        self.config.models.get(role).unwrap_or(&self.config.default_model)
    }

    fn model_for(&self, request: &AgentRunRequest, override_model: Option<&str>) -> String {
        override_model.map(str::to_string).unwrap_or_else(|| self.configured_model_for(&request.role).to_string())
    }

    fn build_command(&self, request: &AgentRunRequest) -> Command {
        let mut cmd = Command::new(&self.config.claude_path);
        cmd.current_dir(&request.working_dir);
        cmd.arg("--model").arg(self.configured_model_for(&request.role));
        cmd.arg("--print");
        cmd.arg("--output-format").arg("stream-json");
        cmd.arg("--verbose");
        cmd.arg("--dangerously-skip-permissions");
        if let Some(turns) = request.max_turns {
            cmd.arg("--max-turns").arg(turns.to_string());
        }
        cmd.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd
    }

    /// Pull human-visible assistant text and a condensed tool-use
    /// summary line out of one stream-json envelope.
    fn visible_lines(envelope: &CliEnvelopeLine) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(message) = &envelope.message {
            for block in &message.content {
                match block.kind.as_str() {
                    "text" => {
                        if let Some(text) = &block.text {
                            lines.push(text.clone());
                        }
                    }
                    "tool_use" => {
                        let name = block.name.as_deref().unwrap_or("tool");
                        lines.push(format!("[tool] {name}"));
                    }
                    _ => {}
                }
            }
        }
        lines
    }
}

#[async_trait]
impl AgentRunner for ClaudeCliRunner {
    async fn run(&self, request: AgentRunRequest) -> Result<AgentRunResult, DomainError> {
        let mut cmd = self.build_command(&request);
        let started = Instant::now();

        tracing::info!(
            role = %request.role,
            sprint_id = %request.sprint_id,
            task_id = ?request.task_id,
            working_dir = %request.working_dir.display(),
            "spawning agent cli"
        );

        let mut child = cmd
            .spawn()
            .map_err(|e| DomainError::AgentFailed(format!("failed to spawn agent cli: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| DomainError::AgentFailed("missing stdin handle".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DomainError::AgentFailed("missing stdout handle".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DomainError::AgentFailed("missing stderr handle".to_string()))?;

        stdin
            .write_all(request.prompt.as_bytes())
            .await
            .map_err(|e| DomainError::AgentFailed(format!("failed to write prompt: {e}")))?;
        drop(stdin);

        let output_sink = request.output.clone();
        let run = timeout(request.timeout, async {
            let mut stdout_lines = BufReader::new(stdout).lines();
            let mut stderr_lines = BufReader::new(stderr).lines();

            let mut output = String::new();
            let mut model = self.configured_model_for(&request.role).to_string();
            let mut usage = TokenUsage::default();
            let mut stderr_collected = Vec::new();

            loop {
                tokio::select! {
                    line = stdout_lines.next_line() => {
                        match line {
                            Ok(Some(line)) => {
                                if let Ok(envelope) = serde_json::from_str::<CliEnvelopeLine>(&line) {
                                    for visible in Self::visible_lines(&envelope) {
                                        output_sink.emit_output(visible);
                                    }
                                    if envelope.r#type.as_deref() == Some("result") {
                                        if let Some(result) = &envelope.result {
                                            output.push_str(result);
                                        }
                                    }
                                    if let Some(m) = envelope.model {
                                        model = m;
                                    }
                                    if let Some(u) = envelope.usage {
                                        usage.input_tokens += u.input_tokens;
                                        usage.output_tokens += u.output_tokens;
                                        usage.cache_read_tokens += u.cache_read_input_tokens;
                                        usage.cache_write_tokens += u.cache_creation_input_tokens;
                                    }
                                } else {
                                    output.push_str(&line);
                                    output.push('\n');
                                    output_sink.emit_output(line);
                                }
                            }
                            Ok(None) => break,
                            Err(e) => return Err(DomainError::AgentFailed(format!("failed reading stdout: {e}"))),
                        }
                    }
                    line = stderr_lines.next_line() => {
                        if let Ok(Some(line)) = line {
                            tracing::debug!(role = %request.role, "agent stderr: {}", line);
                            output_sink.emit_error(line.clone());
                            stderr_collected.push(line);
                        }
                    }
                }
            }

            let status = child
                .wait()
                .await
                .map_err(|e| DomainError::AgentFailed(format!("failed waiting for agent cli: {e}")))?;

            Ok((status, output, model, usage, stderr_collected))
        })
        .await;

        let duration_secs = started.elapsed().as_secs();

        match run {
            Ok(Ok((status, output, model, usage, stderr_lines))) => Ok(AgentRunResult {
                model: self.model_for(&request, Some(&model)),
                output,
                usage,
                stderr_lines,
                duration_secs,
                exit_code: status.code().unwrap_or(-1),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                let _ = child.kill().await;
                Err(DomainError::AgentFailed(format!(
                    "agent cli timed out after {:?}",
                    request.timeout
                )))
            }
        }
    }
}
