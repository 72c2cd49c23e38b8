//! Durable job queue: priority ordering, delayed retries with backoff and a
//! dead set for jobs that exhaust their attempt budget.

pub mod redis;
pub mod worker;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use service_core::error::AppError;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub use redis::RedisJobQueue;
pub use worker::{QueueWorker, WorkerConfig};

pub const SEND_OTP_EMAIL_JOB: &str = "sendOtpEmail";
pub const SEND_WELCOME_EMAIL_JOB: &str = "sendWelcomeEmail";

/// Retry delay policy, fixed or doubling per attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backoff {
    pub initial_delay_ms: u64,
    pub exponential: bool,
}

impl Backoff {
    pub fn exponential(initial_delay: Duration) -> Self {
        Self {
            initial_delay_ms: initial_delay.as_millis() as u64,
            exponential: true,
        }
    }

    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay_ms: delay.as_millis() as u64,
            exponential: false,
        }
    }

    /// Delay before attempt `attempts_made + 1`, where `attempts_made >= 1`.
    pub fn delay_for_attempt(&self, attempts_made: u32) -> Duration {
        let base = Duration::from_millis(self.initial_delay_ms);
        if self.exponential {
            base * 2u32.saturating_pow(attempts_made.saturating_sub(1))
        } else {
            base
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: Uuid,
    pub name: String,
    pub payload: serde_json::Value,
    /// Lower value runs first.
    pub priority: u8,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Job {
    pub fn new(
        name: &str,
        payload: serde_json::Value,
        priority: u8,
        max_attempts: u32,
        backoff: Backoff,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            name: name.to_string(),
            payload,
            priority,
            attempts_made: 0,
            max_attempts,
            backoff,
        }
    }

    pub fn with_attempt(&self) -> Self {
        Self {
            attempts_made: self.attempts_made + 1,
            ..self.clone()
        }
    }

    pub fn exhausted(&self) -> bool {
        self.attempts_made >= self.max_attempts
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Make the job immediately available, ordered by priority then FIFO.
    async fn enqueue(&self, job: Job) -> Result<(), AppError>;

    /// Hold the job back until `delay` has elapsed.
    async fn enqueue_delayed(&self, job: Job, delay: Duration) -> Result<(), AppError>;

    /// Promote due delayed jobs, then pop the highest-priority waiting job.
    async fn reserve(&self) -> Result<Option<Job>, AppError>;

    /// Park a job that exhausted its attempts, keeping the final error.
    async fn bury(&self, job: &Job, error: &str) -> Result<(), AppError>;
}

// ==================== Queue adapter ====================

/// Job templates for the notification emails.
///
/// OTP delivery is latency-sensitive, so it runs at top priority with a tight
/// retry schedule; the welcome email is best-effort.
pub struct NotificationQueue {
    queue: Arc<dyn JobQueue>,
}

impl NotificationQueue {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    pub async fn add_otp_email_job(
        &self,
        email: &str,
        otp: &str,
        user_name: Option<&str>,
    ) -> Result<(), AppError> {
        let job = Job::new(
            SEND_OTP_EMAIL_JOB,
            json!({ "email": email, "otp": otp, "userName": user_name }),
            1,
            5,
            Backoff::exponential(Duration::from_secs(1)),
        );
        self.queue.enqueue(job).await
    }

    pub async fn add_welcome_email_job(
        &self,
        email: &str,
        user_name: Option<&str>,
    ) -> Result<(), AppError> {
        let job = Job::new(
            SEND_WELCOME_EMAIL_JOB,
            json!({ "email": email, "userName": user_name }),
            5,
            3,
            Backoff::exponential(Duration::from_secs(5)),
        );
        self.queue.enqueue(job).await
    }
}

// ==================== In-memory ====================

#[derive(Default)]
struct QueueState {
    // Keyed by (priority, insertion seq) so iteration order is pop order.
    waiting: BTreeMap<(u8, u64), Job>,
    delayed: Vec<(DateTime<Utc>, Job)>,
    dead: Vec<(Job, String)>,
    seq: u64,
}

/// Test queue with the same reserve semantics as the Redis implementation.
#[derive(Clone, Default)]
pub struct InMemoryJobQueue {
    state: Arc<Mutex<QueueState>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waiting_len(&self) -> usize {
        self.state.lock().unwrap().waiting.len()
    }

    pub fn delayed_jobs(&self) -> Vec<(DateTime<Utc>, Job)> {
        self.state.lock().unwrap().delayed.clone()
    }

    pub fn dead_jobs(&self) -> Vec<(Job, String)> {
        self.state.lock().unwrap().dead.clone()
    }

    /// Test hook: make every delayed job due immediately.
    pub fn promote_all(&self) {
        let mut state = self.state.lock().unwrap();
        for (ready_at, _) in state.delayed.iter_mut() {
            *ready_at = Utc::now();
        }
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: Job) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        state.seq += 1;
        let key = (job.priority, state.seq);
        state.waiting.insert(key, job);
        Ok(())
    }

    async fn enqueue_delayed(&self, job: Job, delay: Duration) -> Result<(), AppError> {
        let ready_at = Utc::now()
            + ChronoDuration::from_std(delay)
                .map_err(|e| AppError::QueueError(e.to_string()))?;
        self.state.lock().unwrap().delayed.push((ready_at, job));
        Ok(())
    }

    async fn reserve(&self) -> Result<Option<Job>, AppError> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();

        let due: Vec<Job> = {
            let (ready, pending): (Vec<_>, Vec<_>) =
                state.delayed.drain(..).partition(|(at, _)| *at <= now);
            state.delayed = pending;
            ready.into_iter().map(|(_, job)| job).collect()
        };
        for job in due {
            state.seq += 1;
            let key = (job.priority, state.seq);
            state.waiting.insert(key, job);
        }

        let Some((&key, _)) = state.waiting.iter().next() else {
            return Ok(None);
        };
        Ok(state.waiting.remove(&key))
    }

    async fn bury(&self, job: &Job, error: &str) -> Result<(), AppError> {
        self.state
            .lock()
            .unwrap()
            .dead
            .push((job.clone(), error.to_string()));
        Ok(())
    }
}
