//! Sprintforge - durable, event-driven orchestrator for multi-agent
//! software-development sprints.
//!
//! Given a feature specification and a target source tree, coordinates
//! researcher, planner, developer, tester, and reviewer agents through
//! a staged pipeline: the sprint lifecycle state machine and its
//! persistence, per-role job queues and a wave scheduler that
//! parallelises developer agents across isolated git worktrees, an
//! approval-gate/autonomy policy, and a live event stream to connected
//! observers. Survives process restart by rehydrating every non-
//! terminal sprint from its on-disk directory.

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod runtime;
pub mod services;

pub use domain::errors::{DomainError, DomainResult};
