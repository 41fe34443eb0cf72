//! Domain errors for the sprint orchestrator.
//!
//! Variants are grouped to match the five error kinds in the design:
//! validation, transient external, structural, merge conflict, and
//! fatal internal. Callers branch on the kind to decide retryability
//! rather than string-matching messages.

use thiserror::Error;

/// Domain-level errors raised by the sprint orchestrator's core.
#[derive(Debug, Error)]
pub enum DomainError {
    // -- Validation: bad request shape, illegal transition, no mutation --
    #[error("sprint not found: {0}")]
    SprintNotFound(String),

    #[error("task not found: sprint={sprint} task={task}")]
    TaskNotFound { sprint: String, task: u64 },

    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    // -- Structural: cyclic DAG, conflicting claims, corrupt plan --
    #[error("task dependency cycle detected involving task {0}")]
    DependencyCycle(u64),

    #[error("tasks {a} and {b} in wave {wave} claim overlapping files: {files:?}")]
    OverlappingFilesTouched { wave: u32, a: u64, b: u64, files: Vec<String> },

    #[error("corrupt plan: {0}")]
    CorruptPlan(String),

    // -- Transient external: broker, git, agent CLI --
    #[error("git operation failed: {0}")]
    GitFailed(String),

    #[error("agent invocation failed: {0}")]
    AgentFailed(String),

    #[error("queue broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("forge API request failed: {0}")]
    ForgeFailed(String),

    // -- Merge conflict: not fatal, surfaced as an event --
    #[error("merge conflict on {source} into {target}: {files:?}")]
    MergeConflict { source: String, target: String, files: Vec<String> },

    // -- Fatal internal: invariant violated --
    #[error("invariant violated: {0}")]
    InvariantViolated(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result alias used throughout the domain and service layers.
pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    /// Whether this error represents a transient condition a `restart` can retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::GitFailed(_) | Self::AgentFailed(_) | Self::BrokerUnavailable(_) | Self::ForgeFailed(_)
        )
    }

    /// Whether this error should move the sprint to `failed` outright.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::DependencyCycle(_)
                | Self::OverlappingFilesTouched { .. }
                | Self::CorruptPlan(_)
                | Self::InvariantViolated(_)
        )
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}
