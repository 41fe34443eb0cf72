//! Configuration management infrastructure.
//!
//! Hierarchical configuration via `figment`: compiled-in defaults,
//! project config, optional local overrides, then environment
//! variables, in that order.

pub mod loader;

pub use loader::{Config, ConfigError, ConfigLoader, DeveloperPoolConfig, LoggingConfig, QueueConfig, RoleConfig, ServerConfig};
