//! Infrastructure layer: concrete adapters for external dependencies
//! that the domain ports describe abstractly.
//!
//! - `agent`: the opaque agent CLI substrate (`AgentRunner` port).
//! - `queue`: the SQLite-backed durable queue broker (`QueueBroker` port).
//! - `config`: hierarchical configuration loading.
//! - `logging`: structured logging setup.
//! - `forge`: GitHub-compatible REST client for the PR-create stage.

pub mod agent;
pub mod config;
pub mod forge;
pub mod logging;
pub mod queue;
