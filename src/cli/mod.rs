//! `sprintctl` CLI: drives the orchestrator daemon (`serve`), scaffolds
//! a project's `.sprint/` directory (`init`), and exercises the REST
//! surface described in `SPEC_FULL.md` §6 for operators without the
//! browser client handy (`sprint ...`).

pub mod commands;
pub mod output;
pub mod types;

pub use types::{Cli, Commands, SprintCommands};
