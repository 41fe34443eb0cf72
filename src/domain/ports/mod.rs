//! Domain ports (interfaces) for the sprint orchestrator.
//!
//! These are the two seams with real swap value: the opaque agent CLI
//! substrate, and the durable job queue. Everything else (state store,
//! git coordinator, event bus, approval gate) has exactly one real
//! implementation in this crate and is used as a concrete struct.

pub mod agent_runner;
pub mod queue_broker;

pub use agent_runner::{
    extract_last_json_value, AgentRunRequest, AgentRunResult, AgentRunner, OutputSink, TokenUsage,
};
pub use queue_broker::{Job, QueueBroker};
