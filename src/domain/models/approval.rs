//! Approval gate domain model.
//!
//! An approval request is a one-shot rendezvous point: the orchestrator
//! parks the sprint at `awaiting-approval` and waits for exactly one
//! observer response keyed by `id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What the approval is gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    /// Plan review before any wave starts.
    PlanApproval,
    /// Gate before entering `pr-created` (approve outcome) or injecting
    /// bug-fix tasks (changes-requested outcome) for supervised sprints.
    ReviewApproval,
    /// Gate before merging to the default branch when no remote exists.
    LocalMergeApproval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub kind: ApprovalKind,
    /// Human-readable context shown to the observer (e.g. the plan text).
    pub context: String,
    pub requested_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub decision: Option<ApprovalDecision>,
    /// Optional feedback accompanying a rejection, fed back into replanning.
    pub feedback: Option<String>,
}

impl ApprovalRequest {
    pub fn new(kind: ApprovalKind, context: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            context: context.into(),
            requested_at: Utc::now(),
            resolved_at: None,
            decision: None,
            feedback: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.decision.is_none()
    }

    pub fn resolve(&mut self, decision: ApprovalDecision, feedback: Option<String>) {
        self.decision = Some(decision);
        self.feedback = feedback;
        self.resolved_at = Some(Utc::now());
    }
}
