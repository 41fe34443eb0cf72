//! CLI command handlers: one module per top-level `sprintctl` subcommand.

pub mod init;
pub mod serve;
pub mod sprint;
