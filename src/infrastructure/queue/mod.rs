//! Durable queue broker adapter (C6): SQLite-resident job table backing
//! the domain's `QueueBroker` port.

pub mod degraded;
pub mod sqlite_broker;

pub use degraded::DegradedQueueBroker;
pub use sqlite_broker::SqliteQueueBroker;
