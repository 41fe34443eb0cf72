//! Agent Runner port: the boundary between the orchestrator and the
//! opaque agent CLI substrate.
//!
//! The contract (spec §4.4): a prompt is piped over stdin and stdin is
//! immediately closed; stdout is read as line-delimited JSON; stderr is
//! captured as raw lines for logging. Implementations never parse
//! model-specific output beyond this envelope. Every line forwarded
//! through `output` becomes a `task:log` event upstream; callers that
//! don't care about live streaming can pass a sink that drops lines.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::errors::DomainResult;

/// Where an in-flight agent invocation forwards its line-oriented
/// output as it's produced, so a worker can publish `task:log` events
/// while the child process is still running rather than only at exit.
#[derive(Clone)]
pub struct OutputSink {
    stdout: tokio::sync::mpsc::UnboundedSender<String>,
    stderr: tokio::sync::mpsc::UnboundedSender<String>,
}

impl OutputSink {
    pub fn new(
        stdout: tokio::sync::mpsc::UnboundedSender<String>,
        stderr: tokio::sync::mpsc::UnboundedSender<String>,
    ) -> Self {
        Self { stdout, stderr }
    }

    /// A sink that discards every line, for callers that only want the
    /// final joined result (e.g. tests, or a scripted fake).
    pub fn discard() -> Self {
        let (stdout, _) = tokio::sync::mpsc::unbounded_channel();
        let (stderr, _) = tokio::sync::mpsc::unbounded_channel();
        Self { stdout, stderr }
    }

    pub fn emit_output(&self, line: impl Into<String>) {
        let _ = self.stdout.send(line.into());
    }

    pub fn emit_error(&self, line: impl Into<String>) {
        let _ = self.stderr.send(line.into());
    }
}

/// A single request to run an agent on a prompt.
#[derive(Clone)]
pub struct AgentRunRequest {
    /// Which role this invocation serves; used for routing model/budget
    /// config and for locating the role's prompt template.
    pub role: String,
    pub sprint_id: String,
    pub task_id: Option<u64>,
    pub working_dir: std::path::PathBuf,
    pub prompt: String,
    /// Wall-clock budget for the whole invocation.
    pub timeout: Duration,
    /// Maximum agentic turns, when the substrate honours one; `None`
    /// leaves it to the substrate's own default.
    pub max_turns: Option<u32>,
    /// Where to forward live output lines as the child process runs.
    pub output: OutputSink,
}

/// Token usage reported back by the substrate for cost-ledger recording.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
}

/// The result of a single agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRunResult {
    pub model: String,
    /// The agent's final structured or free-form output, joined from stdout.
    pub output: String,
    pub usage: TokenUsage,
    pub stderr_lines: Vec<String>,
    /// Whole seconds the child process ran for.
    pub duration_secs: u64,
    pub exit_code: i32,
}

/// Port implemented by whatever can shell out to an agent CLI.
///
/// Kept as a trait (rather than a concrete struct) specifically so
/// tests can substitute a scripted fake instead of spawning a real
/// process.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(&self, request: AgentRunRequest) -> DomainResult<AgentRunResult>;
}

/// Scan `text` for the last balanced top-level JSON object or array,
/// aware of string literals and backslash escapes so braces inside
/// quoted strings don't throw off the balance count. Tries candidates
/// from most-recent to oldest, returning the first that parses.
///
/// Used by planner/reviewer workers that must recover a structured
/// verdict from an agent's otherwise free-form transcript.
pub fn extract_last_json_value(text: &str) -> Option<serde_json::Value> {
    let bytes = text.as_bytes();
    let mut candidates: Vec<(usize, usize)> = Vec::new();
    let mut stack: Vec<(u8, usize)> = Vec::new();
    let mut in_string = false;
    let mut escape = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' | b'[' => stack.push((b, i)),
            b'}' | b']' => {
                if let Some((open, start)) = stack.pop() {
                    let matches = (open == b'{' && b == b'}') || (open == b'[' && b == b']');
                    if matches && stack.is_empty() {
                        candidates.push((start, i));
                    }
                }
            }
            _ => {}
        }
    }

    for (start, end) in candidates.into_iter().rev() {
        let slice = std::str::from_utf8(&bytes[start..=end]).ok()?;
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(slice) {
            return Some(value);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_last_object_ignoring_earlier_ones() {
        let text = r#"thinking... {"a": 1} more text {"verdict": "APPROVE", "must_fix_count": 0}"#;
        let value = extract_last_json_value(text).unwrap();
        assert_eq!(value["verdict"], "APPROVE");
    }

    #[test]
    fn ignores_braces_inside_string_literals() {
        let text = r#"blah {"summary": "uses a { brace } in prose", "verdict": "APPROVE"}"#;
        let value = extract_last_json_value(text).unwrap();
        assert_eq!(value["verdict"], "APPROVE");
    }

    #[test]
    fn falls_back_through_unparsable_candidates() {
        let text = r#"{"verdict": "APPROVE"} then garbage: {not json}"#;
        let value = extract_last_json_value(text).unwrap();
        assert_eq!(value["verdict"], "APPROVE");
    }

    #[test]
    fn returns_none_when_no_json_present() {
        assert!(extract_last_json_value("just prose, no braces here").is_none());
    }
}
