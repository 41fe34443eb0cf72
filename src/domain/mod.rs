//! Domain layer for the sprint orchestrator.
//!
//! Pure business logic and entities live here: no I/O, no tokio, no
//! sqlx. Infrastructure and services depend on this module; it never
//! depends back.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
