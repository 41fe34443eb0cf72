//! Sprint domain model: the top-level lifecycle state machine and the
//! aggregate that owns a plan, a developer pool, and a cost ledger.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::cost::CostLedger;
use crate::domain::models::developer::DeveloperPool;
use crate::domain::models::plan::Plan;

/// Where a sprint currently sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SprintStatus {
    Created,
    Researching,
    Planning,
    AwaitingApproval,
    Approved,
    Running,
    Reviewing,
    PrCreated,
    Completed,
    Paused,
    Cancelled,
    Failed,
}

impl SprintStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Researching => "researching",
            Self::Planning => "planning",
            Self::AwaitingApproval => "awaiting-approval",
            Self::Approved => "approved",
            Self::Running => "running",
            Self::Reviewing => "reviewing",
            Self::PrCreated => "pr-created",
            Self::Completed => "completed",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// Whether `pause` is a legal action from this status.
    pub fn can_pause(&self) -> bool {
        !self.is_terminal() && *self != Self::Paused
    }

    fn forward_transitions(&self) -> &'static [SprintStatus] {
        match self {
            Self::Created => &[Self::Researching, Self::Cancelled],
            Self::Researching => &[Self::Planning, Self::Failed, Self::Cancelled],
            Self::Planning => &[Self::AwaitingApproval, Self::Approved, Self::Failed, Self::Cancelled],
            Self::AwaitingApproval => &[Self::Approved, Self::Planning, Self::Cancelled],
            Self::Approved => &[Self::Running, Self::Cancelled],
            Self::Running => &[Self::Reviewing, Self::Failed, Self::Cancelled],
            Self::Reviewing => &[Self::Running, Self::PrCreated, Self::Failed, Self::Cancelled],
            Self::PrCreated => &[Self::Completed, Self::Cancelled],
            Self::Completed | Self::Cancelled | Self::Failed => &[],
            Self::Paused => &[],
        }
    }

    /// Any non-terminal, non-paused status can be paused; any paused
    /// sprint resumes back into the status it was paused from, which
    /// `Sprint::resume` tracks via `paused_from`.
    pub fn can_transition_to(&self, next: SprintStatus) -> bool {
        if next == Self::Paused {
            return self.can_pause();
        }
        if *self == Self::Paused {
            return true;
        }
        self.forward_transitions().contains(&next)
    }
}

impl std::str::FromStr for SprintStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "researching" => Ok(Self::Researching),
            "planning" => Ok(Self::Planning),
            "awaiting-approval" => Ok(Self::AwaitingApproval),
            "approved" => Ok(Self::Approved),
            "running" => Ok(Self::Running),
            "reviewing" => Ok(Self::Reviewing),
            "pr-created" => Ok(Self::PrCreated),
            "completed" => Ok(Self::Completed),
            "paused" => Ok(Self::Paused),
            "cancelled" => Ok(Self::Cancelled),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown sprint status: {other}")),
        }
    }
}

/// Autonomy level controlling how much the orchestrator acts without
/// a human approval step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AutonomyMode {
    /// Plan review is mandatory; PR creation is mandatory.
    Supervised,
    /// Plan review is mandatory; PR creation is automatic.
    SemiAuto,
    /// Nothing requires a human unless `full_auto_merges_local` also
    /// gates the local-merge case (see `SPEC_FULL.md` §10.6).
    FullAuto,
}

impl Default for AutonomyMode {
    fn default() -> Self {
        Self::Supervised
    }
}

impl std::str::FromStr for AutonomyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "supervised" => Ok(Self::Supervised),
            "semi-auto" => Ok(Self::SemiAuto),
            "full-auto" => Ok(Self::FullAuto),
            other => Err(format!("unknown autonomy mode: {other}")),
        }
    }
}

/// One orchestration instance: the spec-to-PR pipeline's unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sprint {
    /// Textual, unique, date-prefixed identifier (e.g. `2026-07-28-add-health-route`).
    pub id: String,
    pub name: Option<String>,
    pub spec_path: String,
    pub target_dir: String,
    pub status: SprintStatus,
    /// Status this sprint was paused from, so `resume` knows where to go back to.
    pub paused_from: Option<SprintStatus>,
    pub autonomy: AutonomyMode,
    pub developer_pool: DeveloperPool,
    pub plan: Option<Plan>,
    pub current_wave: u32,
    pub review_cycle: u32,
    pub max_review_cycles: u32,
    pub cost_ledger: CostLedger,
    pub worktrees: HashMap<u32, PathBuf>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Sprint {
    pub fn new(id: String, target_dir: String, spec_path: String, developer_pool: DeveloperPool, autonomy: AutonomyMode) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: None,
            spec_path,
            target_dir,
            status: SprintStatus::Created,
            paused_from: None,
            autonomy,
            developer_pool,
            plan: None,
            current_wave: 0,
            review_cycle: 0,
            max_review_cycles: 3,
            cost_ledger: CostLedger::default(),
            worktrees: HashMap::new(),
            created_at: now,
            updated_at: now,
            approved_at: None,
            completed_at: None,
        }
    }

    pub fn transition_to(&mut self, next: SprintStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }

        if next == SprintStatus::Paused {
            self.paused_from = Some(self.status);
        } else if self.status == SprintStatus::Paused {
            self.paused_from = None;
        }

        self.status = next;
        self.updated_at = Utc::now();
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Resume a paused sprint back to where it was paused from.
    pub fn resume(&mut self) -> DomainResult<()> {
        let Some(target) = self.paused_from else {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: "<resume>".to_string(),
            });
        };
        if self.status != SprintStatus::Paused {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: target.as_str().to_string(),
            });
        }
        self.status = target;
        self.paused_from = None;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sprint() -> Sprint {
        Sprint::new("2026-07-28-t".into(), "/tmp/target".into(), "spec.md".into(), DeveloperPool::new(3), AutonomyMode::Supervised)
    }

    #[test]
    fn happy_path_lifecycle() {
        let mut s = sprint();
        for next in [
            SprintStatus::Researching,
            SprintStatus::Planning,
            SprintStatus::AwaitingApproval,
            SprintStatus::Approved,
            SprintStatus::Running,
            SprintStatus::Reviewing,
            SprintStatus::PrCreated,
            SprintStatus::Completed,
        ] {
            s.transition_to(next).unwrap();
        }
        assert!(s.status.is_terminal());
        assert!(s.completed_at.is_some());
    }

    #[test]
    fn full_auto_can_skip_awaiting_approval() {
        let mut s = sprint();
        s.transition_to(SprintStatus::Researching).unwrap();
        s.transition_to(SprintStatus::Planning).unwrap();
        s.transition_to(SprintStatus::Approved).unwrap();
        assert_eq!(s.status, SprintStatus::Approved);
    }

    #[test]
    fn review_can_loop_back_to_running() {
        let mut s = sprint();
        s.transition_to(SprintStatus::Researching).unwrap();
        s.transition_to(SprintStatus::Planning).unwrap();
        s.transition_to(SprintStatus::AwaitingApproval).unwrap();
        s.transition_to(SprintStatus::Approved).unwrap();
        s.transition_to(SprintStatus::Running).unwrap();
        s.transition_to(SprintStatus::Reviewing).unwrap();
        s.transition_to(SprintStatus::Running).unwrap();
        assert_eq!(s.status, SprintStatus::Running);
    }

    #[test]
    fn pause_and_resume_round_trips() {
        let mut s = sprint();
        s.transition_to(SprintStatus::Researching).unwrap();
        s.transition_to(SprintStatus::Planning).unwrap();
        s.transition_to(SprintStatus::Paused).unwrap();
        assert_eq!(s.paused_from, Some(SprintStatus::Planning));
        s.resume().unwrap();
        assert_eq!(s.status, SprintStatus::Planning);
        assert!(s.paused_from.is_none());
    }

    #[test]
    fn terminal_states_reject_everything() {
        let mut s = sprint();
        s.transition_to(SprintStatus::Cancelled).unwrap();
        assert!(s.transition_to(SprintStatus::Running).is_err());
        assert!(s.transition_to(SprintStatus::Paused).is_err());
    }

    #[test]
    fn awaiting_approval_can_reject_back_to_planning() {
        let mut s = sprint();
        s.transition_to(SprintStatus::Researching).unwrap();
        s.transition_to(SprintStatus::Planning).unwrap();
        s.transition_to(SprintStatus::AwaitingApproval).unwrap();
        s.transition_to(SprintStatus::Planning).unwrap();
        assert_eq!(s.status, SprintStatus::Planning);
    }
}
