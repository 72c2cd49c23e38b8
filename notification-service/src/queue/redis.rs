//! Redis-backed queue. Sorted sets give both orderings for free: the waiting
//! set is scored by priority + arrival sequence, the delayed set by the
//! epoch-millisecond instant a job becomes due. Dead jobs land in a list.

use super::{Job, JobQueue};
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use service_core::error::AppError;
use std::time::Duration;

// Priority dominates the score; the sequence breaks ties FIFO.
const PRIORITY_STRIDE: f64 = 1e12;
const PROMOTE_BATCH: isize = 100;

#[derive(Clone)]
pub struct RedisJobQueue {
    conn: ConnectionManager,
    namespace: String,
}

impl RedisJobQueue {
    pub fn new(conn: ConnectionManager, namespace: &str) -> Self {
        Self {
            conn,
            namespace: namespace.to_string(),
        }
    }

    pub async fn connect(url: &str, namespace: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(url).map_err(queue_err)?;
        let conn = ConnectionManager::new(client).await.map_err(queue_err)?;
        tracing::info!(namespace = %namespace, "Connected to Redis job queue");
        Ok(Self::new(conn, namespace))
    }

    /// Shared connection handle, used by the health endpoints.
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    fn waiting_key(&self) -> String {
        format!("{}:waiting", self.namespace)
    }

    fn delayed_key(&self) -> String {
        format!("{}:delayed", self.namespace)
    }

    fn dead_key(&self) -> String {
        format!("{}:dead", self.namespace)
    }

    fn seq_key(&self) -> String {
        format!("{}:seq", self.namespace)
    }

    async fn waiting_score(&self, priority: u8) -> Result<f64, AppError> {
        let mut conn = self.conn.clone();
        let seq: u64 = conn.incr(self.seq_key(), 1).await.map_err(queue_err)?;
        Ok(priority as f64 * PRIORITY_STRIDE + seq as f64)
    }

    /// Move due jobs from the delayed set into the waiting set.
    async fn promote_due(&self) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let now_ms = Utc::now().timestamp_millis() as f64;

        let due: Vec<String> = conn
            .zrangebyscore_limit(self.delayed_key(), f64::MIN, now_ms, 0, PROMOTE_BATCH)
            .await
            .map_err(queue_err)?;

        for raw in due {
            let job: Job = serde_json::from_str(&raw)?;
            let removed: i64 = conn
                .zrem(self.delayed_key(), &raw)
                .await
                .map_err(queue_err)?;
            // Another worker promoted it first.
            if removed == 0 {
                continue;
            }
            let score = self.waiting_score(job.priority).await?;
            let _: () = conn
                .zadd(self.waiting_key(), raw, score)
                .await
                .map_err(queue_err)?;
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: Job) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(&job)?;
        let score = self.waiting_score(job.priority).await?;
        let _: () = conn
            .zadd(self.waiting_key(), raw, score)
            .await
            .map_err(queue_err)?;
        Ok(())
    }

    async fn enqueue_delayed(&self, job: Job, delay: Duration) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(&job)?;
        let ready_at_ms = (Utc::now().timestamp_millis() as u128 + delay.as_millis()) as f64;
        let _: () = conn
            .zadd(self.delayed_key(), raw, ready_at_ms)
            .await
            .map_err(queue_err)?;
        Ok(())
    }

    async fn reserve(&self) -> Result<Option<Job>, AppError> {
        self.promote_due().await?;

        let mut conn = self.conn.clone();
        let popped: Vec<(String, f64)> = conn
            .zpopmin(self.waiting_key(), 1)
            .await
            .map_err(queue_err)?;
        match popped.into_iter().next() {
            Some((raw, _)) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn bury(&self, job: &Job, error: &str) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let entry = serde_json::to_string(&serde_json::json!({
            "job": job,
            "error": error,
            "buriedAt": Utc::now(),
        }))?;
        let _: () = conn
            .lpush(self.dead_key(), entry)
            .await
            .map_err(queue_err)?;
        Ok(())
    }
}

fn queue_err(e: redis::RedisError) -> AppError {
    AppError::QueueError(e.to_string())
}
