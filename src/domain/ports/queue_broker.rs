//! Queue Broker port: durable, at-least-once named queues per role.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::DomainResult;

/// A unit of work enqueued onto a named role queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub queue_name: String,
    /// Caller-supplied key; re-enqueuing the same key is a no-op, which
    /// is what makes delivery safe to retry at the producer side too.
    pub idempotency_key: String,
    pub payload: serde_json::Value,
    pub attempt: u32,
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub available_at: DateTime<Utc>,
}

/// Port implemented by whatever backs the durable job queues.
///
/// Kept as a trait so integration tests can run against an in-memory
/// or tempfile-backed broker without pulling in the full SQLite pool.
#[async_trait]
pub trait QueueBroker: Send + Sync {
    /// Enqueue a job. A duplicate `idempotency_key` on the same queue is ignored.
    async fn enqueue(
        &self,
        queue_name: &str,
        idempotency_key: &str,
        payload: serde_json::Value,
        max_attempts: u32,
    ) -> DomainResult<Uuid>;

    /// Claim the next available job on a queue, marking it in-flight.
    async fn dequeue(&self, queue_name: &str) -> DomainResult<Option<Job>>;

    /// Acknowledge successful processing, removing the job permanently.
    async fn ack(&self, job_id: Uuid) -> DomainResult<()>;

    /// Fail a job: reschedules with exponential backoff if attempts remain,
    /// otherwise moves it to a dead state the caller can still query.
    async fn nack(&self, job_id: Uuid, backoff: std::time::Duration) -> DomainResult<()>;

    /// Remove every waiting/delayed job belonging to `sprint_id` from every
    /// queue. Already-claimed (in-flight) jobs are left to finish.
    async fn drain_sprint(&self, sprint_id: &str) -> DomainResult<u64>;

    /// Block until a job is available on `queue_name`.
    ///
    /// The default implementation polls `dequeue` with a short sleep
    /// between empty attempts; concrete brokers that can wake on an
    /// internal notifier (e.g. the SQLite broker's per-queue
    /// `tokio::sync::Notify`) are free to override this for lower
    /// latency without changing the trait's callers.
    async fn dequeue_blocking(&self, queue_name: &str) -> DomainResult<Job> {
        loop {
            if let Some(job) = self.dequeue(queue_name).await? {
                return Ok(job);
            }
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        }
    }
}
