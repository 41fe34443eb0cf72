//! SQLite-backed durable queue broker (C6).
//!
//! One row per job, one logical queue per distinct `queue_name`.
//! Enqueue/ack/retry survive process restart; a `tokio::sync::Notify`
//! per queue name wakes blocked consumers without polling the table.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use crate::adapters::sqlite::connection::{create_pool, PoolConfig};
use crate::adapters::sqlite::migrations::{all_embedded_migrations, Migrator};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::queue_broker::{Job, QueueBroker};

pub struct SqliteQueueBroker {
    pool: SqlitePool,
    notifiers: Mutex<HashMap<String, Arc<Notify>>>,
}

impl SqliteQueueBroker {
    pub async fn connect(database_url: &str) -> DomainResult<Self> {
        let pool = create_pool(database_url, Some(PoolConfig::default()))
            .await
            .map_err(|e| DomainError::BrokerUnavailable(e.to_string()))?;

        Migrator::new(pool.clone())
            .run_embedded_migrations(all_embedded_migrations())
            .await
            .map_err(|e| DomainError::BrokerUnavailable(e.to_string()))?;

        Ok(Self { pool, notifiers: Mutex::new(HashMap::new()) })
    }

    async fn notifier_for(&self, queue_name: &str) -> Arc<Notify> {
        let mut notifiers = self.notifiers.lock().await;
        notifiers.entry(queue_name.to_string()).or_insert_with(|| Arc::new(Notify::new())).clone()
    }
}

#[async_trait]
impl QueueBroker for SqliteQueueBroker {
    async fn enqueue(&self, queue_name: &str, idempotency_key: &str, payload: serde_json::Value, max_attempts: u32) -> DomainResult<Uuid> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let payload_str = serde_json::to_string(&payload)?;

        let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM queue_jobs WHERE queue_name = ? AND idempotency_key = ?")
            .bind(queue_name)
            .bind(idempotency_key)
            .fetch_optional(&self.pool)
            .await?;

        if let Some((existing_id,)) = existing {
            return Uuid::parse_str(&existing_id).map_err(|e| DomainError::Persistence(e.to_string()));
        }

        sqlx::query(
            "INSERT INTO queue_jobs (id, queue_name, idempotency_key, payload, attempt, max_attempts, status, enqueued_at, available_at)
             VALUES (?, ?, ?, ?, 0, ?, 'waiting', ?, ?)",
        )
        .bind(id.to_string())
        .bind(queue_name)
        .bind(idempotency_key)
        .bind(payload_str)
        .bind(max_attempts)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.notifier_for(queue_name).await.notify_one();
        Ok(id)
    }

    async fn dequeue(&self, queue_name: &str) -> DomainResult<Option<Job>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let row: Option<(String, String, String, String, i64, i64, String, String)> = sqlx::query_as(
            "SELECT id, queue_name, idempotency_key, payload, attempt, max_attempts, enqueued_at, available_at
             FROM queue_jobs
             WHERE queue_name = ? AND status = 'waiting' AND available_at <= ?
             ORDER BY available_at ASC LIMIT 1",
        )
        .bind(queue_name)
        .bind(now.to_rfc3339())
        .fetch_optional(&mut *tx)
        .await?;

        let Some((id, queue_name, idempotency_key, payload, attempt, max_attempts, enqueued_at, available_at)) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        sqlx::query("UPDATE queue_jobs SET status = 'in-flight', claimed_at = ? WHERE id = ?")
            .bind(now.to_rfc3339())
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Some(Job {
            id: Uuid::parse_str(&id).map_err(|e| DomainError::Persistence(e.to_string()))?,
            queue_name,
            idempotency_key,
            payload: serde_json::from_str(&payload)?,
            attempt: attempt as u32,
            max_attempts: max_attempts as u32,
            enqueued_at: enqueued_at.parse().map_err(|e: chrono::ParseError| DomainError::Persistence(e.to_string()))?,
            available_at: available_at.parse().map_err(|e: chrono::ParseError| DomainError::Persistence(e.to_string()))?,
        }))
    }

    async fn ack(&self, job_id: Uuid) -> DomainResult<()> {
        sqlx::query("DELETE FROM queue_jobs WHERE id = ?").bind(job_id.to_string()).execute(&self.pool).await?;
        Ok(())
    }

    async fn nack(&self, job_id: Uuid, backoff: Duration) -> DomainResult<()> {
        let row: Option<(i64, i64, String)> =
            sqlx::query_as("SELECT attempt, max_attempts, queue_name FROM queue_jobs WHERE id = ?")
                .bind(job_id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        let Some((attempt, max_attempts, queue_name)) = row else {
            return Ok(());
        };

        let next_attempt = attempt + 1;
        if next_attempt >= max_attempts {
            sqlx::query("UPDATE queue_jobs SET status = 'dead', attempt = ? WHERE id = ?")
                .bind(next_attempt)
                .bind(job_id.to_string())
                .execute(&self.pool)
                .await?;
            return Ok(());
        }

        let available_at = Utc::now() + chrono::Duration::from_std(backoff).unwrap_or(chrono::Duration::seconds(2));
        sqlx::query("UPDATE queue_jobs SET status = 'waiting', attempt = ?, available_at = ? WHERE id = ?")
            .bind(next_attempt)
            .bind(available_at.to_rfc3339())
            .bind(job_id.to_string())
            .execute(&self.pool)
            .await?;

        self.notifier_for(&queue_name).await.notify_one();
        Ok(())
    }

    async fn drain_sprint(&self, sprint_id: &str) -> DomainResult<u64> {
        let result = sqlx::query(
            "DELETE FROM queue_jobs WHERE status = 'waiting' AND json_extract(payload, '$.sprint_id') = ?",
        )
        .bind(sprint_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Overrides the trait's polling default: block on the per-queue
    /// notifier instead, so a consumer wakes the instant a job is
    /// enqueued or nacked rather than up to 200ms late.
    async fn dequeue_blocking(&self, queue_name: &str) -> DomainResult<Job> {
        loop {
            if let Some(job) = self.dequeue(queue_name).await? {
                return Ok(job);
            }
            self.notifier_for(queue_name).await.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_dequeue_ack_round_trip() {
        let broker = SqliteQueueBroker::connect("sqlite::memory:").await.unwrap();
        let id = broker.enqueue("research", "research-s1", serde_json::json!({"sprint_id": "s1"}), 3).await.unwrap();

        let job = broker.dequeue("research").await.unwrap().unwrap();
        assert_eq!(job.id, id);
        assert!(broker.dequeue("research").await.unwrap().is_none());

        broker.ack(job.id).await.unwrap();
        assert!(broker.dequeue("research").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_dedupes() {
        let broker = SqliteQueueBroker::connect("sqlite::memory:").await.unwrap();
        let first = broker.enqueue("planning", "planning-s1", serde_json::json!({}), 3).await.unwrap();
        let second = broker.enqueue("planning", "planning-s1", serde_json::json!({}), 3).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn nack_with_retries_remaining_reschedules() {
        let broker = SqliteQueueBroker::connect("sqlite::memory:").await.unwrap();
        let id = broker.enqueue("testing", "testing-s1", serde_json::json!({}), 2).await.unwrap();
        let job = broker.dequeue("testing").await.unwrap().unwrap();
        broker.nack(job.id, Duration::from_millis(0)).await.unwrap();

        let retried = broker.dequeue("testing").await.unwrap().unwrap();
        assert_eq!(retried.id, id);
        assert_eq!(retried.attempt, 1);
    }

    #[tokio::test]
    async fn drain_sprint_removes_only_waiting_jobs_for_that_sprint() {
        let broker = SqliteQueueBroker::connect("sqlite::memory:").await.unwrap();
        broker.enqueue("impl-0", "impl-s1-1", serde_json::json!({"sprint_id": "s1"}), 3).await.unwrap();
        broker.enqueue("impl-0", "impl-s2-1", serde_json::json!({"sprint_id": "s2"}), 3).await.unwrap();

        let drained = broker.drain_sprint("s1").await.unwrap();
        assert_eq!(drained, 1);
        assert!(broker.dequeue("impl-0").await.unwrap().is_some());
    }
}
