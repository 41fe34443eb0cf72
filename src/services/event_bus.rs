//! Event Bus (C4).
//!
//! The observer protocol is a single `/ws` channel carrying many event
//! shapes (spec §6, design note "dynamic event payloads → tagged
//! variants"), so it's modelled here as one tagged-union enum with a
//! string discriminator. Fan-out uses a `tokio::sync::broadcast`
//! channel: a slow observer lags and drops the oldest events rather
//! than blocking a developer worker mid-publish (§5 "per-observer
//! back-pressure").
//!
//! Every `task:log` line is additionally appended to
//! `role-logs/<role-id>.log` under the sprint directory (§6), so the
//! persisted transcript survives even if no observer was connected
//! when the line was produced.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

/// Server-emitted event, one JSON object per message over `/ws`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "sprint:status")]
    SprintStatus { sprint_id: String, status: String, at: DateTime<Utc> },

    #[serde(rename = "task:status")]
    TaskStatus { sprint_id: String, task_id: u64, status: String, developer_slot: Option<u32> },

    #[serde(rename = "task:log")]
    TaskLog { sprint_id: String, task_id: Option<u64>, role: String, line: String },

    #[serde(rename = "wave:started")]
    WaveStarted { sprint_id: String, wave: u32, task_ids: Vec<u64> },

    #[serde(rename = "wave:completed")]
    WaveCompleted { sprint_id: String, wave: u32 },

    #[serde(rename = "merge:completed")]
    MergeCompleted { sprint_id: String, slot: u32, success: bool, conflicts: Vec<String> },

    #[serde(rename = "approval:required")]
    ApprovalRequired { sprint_id: String, id: Uuid, kind: String, context: String },

    #[serde(rename = "review:update")]
    ReviewUpdate { sprint_id: String, cycle: u32, status: String, summary: Option<String> },

    #[serde(rename = "cost:update")]
    CostUpdate { sprint_id: String, total_usd: f64 },

    #[serde(rename = "error")]
    Error { sprint_id: String, message: String },
}

impl ServerEvent {
    pub fn sprint_id(&self) -> &str {
        match self {
            Self::SprintStatus { sprint_id, .. }
            | Self::TaskStatus { sprint_id, .. }
            | Self::TaskLog { sprint_id, .. }
            | Self::WaveStarted { sprint_id, .. }
            | Self::WaveCompleted { sprint_id, .. }
            | Self::MergeCompleted { sprint_id, .. }
            | Self::ApprovalRequired { sprint_id, .. }
            | Self::ReviewUpdate { sprint_id, .. }
            | Self::CostUpdate { sprint_id, .. }
            | Self::Error { sprint_id, .. } => sprint_id,
        }
    }
}

/// Client-emitted event, deserialized from an incoming `/ws` message.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "approval:response")]
    ApprovalResponse { id: Uuid, approved: bool, comment: Option<String>, data: Option<Value> },

    #[serde(rename = "task:retry")]
    TaskRetry { sprint_id: String, task_id: u64 },

    #[serde(rename = "sprint:approve")]
    SprintApprove { sprint_id: String },

    #[serde(rename = "sprint:cancel")]
    SprintCancel { sprint_id: String },
}

/// Broadcasts [`ServerEvent`]s to every connected observer and mirrors
/// `task:log` lines into the sprint's role-log files.
pub struct EventBus {
    sprints_root: PathBuf,
    sender: broadcast::Sender<ServerEvent>,
}

impl EventBus {
    /// `capacity` bounds how many events a lagging subscriber can fall
    /// behind by before it starts missing the oldest ones.
    pub fn new(sprints_root: impl Into<PathBuf>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sprints_root: sprints_root.into(), sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Publish to every subscriber; never blocks on a slow observer.
    /// `task:log` events are also appended to disk in the background.
    pub fn publish(&self, event: ServerEvent) {
        if let ServerEvent::TaskLog { sprint_id, role, line, .. } = &event {
            self.spawn_role_log_append(sprint_id.clone(), role.clone(), line.clone());
        }
        // No subscribers is a normal state (no observer connected yet).
        let _ = self.sender.send(event);
    }

    fn spawn_role_log_append(&self, sprint_id: String, role: String, line: String) {
        let path = self.sprints_root.join(&sprint_id).join("role-logs").join(format!("{role}.log"));
        tokio::spawn(async move {
            if let Some(parent) = path.parent() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    warn!(error = %e, path = %path.display(), "failed to create role-logs directory");
                    return;
                }
            }
            use tokio::io::AsyncWriteExt;
            match tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await {
                Ok(mut file) => {
                    if let Err(e) = file.write_all(format!("{line}\n").as_bytes()).await {
                        warn!(error = %e, path = %path.display(), "failed to append role log line");
                    }
                }
                Err(e) => warn!(error = %e, path = %path.display(), "failed to open role log file"),
            }
        });
    }
}
