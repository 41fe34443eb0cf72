//! Domain models
//!
//! Pure domain entities with business logic and validation rules.
//! These models are framework-agnostic and contain no infrastructure concerns.

pub mod approval;
pub mod cost;
pub mod developer;
pub mod plan;
pub mod review;
pub mod sprint;
pub mod task;

pub use approval::{ApprovalDecision, ApprovalKind, ApprovalRequest};
pub use cost::{CostLedger, CostSummary, Session};
pub use developer::{DeveloperPool, DeveloperSlot};
pub use plan::Plan;
pub use review::{parse_review_report, Finding, FindingSeverity, ReviewCycle, Verdict};
pub use sprint::{AutonomyMode, Sprint, SprintStatus};
pub use task::{Task, TaskKind, TaskRole, TaskState};
