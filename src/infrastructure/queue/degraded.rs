//! Stand-in `QueueBroker` installed when the SQLite broker fails to
//! open or migrate at boot. Every operation fails with
//! `BrokerUnavailable` rather than panicking, so the HTTP surface can
//! still start and sprint-mutating endpoints fail loudly instead of
//! the whole process refusing to serve anything (`SPEC_FULL.md` §10.6,
//! spec §6 "Exit codes").

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::queue_broker::{Job, QueueBroker};

#[derive(Default)]
pub struct DegradedQueueBroker {
    reason: String,
}

impl DegradedQueueBroker {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }

    fn error(&self) -> DomainError {
        DomainError::BrokerUnavailable(self.reason.clone())
    }
}

#[async_trait]
impl QueueBroker for DegradedQueueBroker {
    async fn enqueue(&self, _queue_name: &str, _idempotency_key: &str, _payload: serde_json::Value, _max_attempts: u32) -> DomainResult<Uuid> {
        Err(self.error())
    }

    async fn dequeue(&self, _queue_name: &str) -> DomainResult<Option<Job>> {
        Err(self.error())
    }

    async fn ack(&self, _job_id: Uuid) -> DomainResult<()> {
        Err(self.error())
    }

    async fn nack(&self, _job_id: Uuid, _backoff: std::time::Duration) -> DomainResult<()> {
        Err(self.error())
    }

    async fn drain_sprint(&self, _sprint_id: &str) -> DomainResult<u64> {
        Err(self.error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_operation_reports_broker_unavailable() {
        let broker = DegradedQueueBroker::new("database locked");
        let err = broker.enqueue("research", "k1", serde_json::json!({}), 3).await.unwrap_err();
        assert!(matches!(err, DomainError::BrokerUnavailable(msg) if msg == "database locked"));
    }
}
