//! Job worker: bounded concurrency, throughput cap and the retry engine.

use super::{Job, JobQueue, SEND_OTP_EMAIL_JOB, SEND_WELCOME_EMAIL_JOB};
use crate::services::EmailSender;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use metrics::counter;
use service_core::error::AppError;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Jobs processed in parallel.
    pub concurrency: usize,
    /// Hard cap on job starts per second.
    pub rate_limit_per_sec: u32,
    /// Sleep between polls when the queue is empty.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            rate_limit_per_sec: 10,
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Pulls jobs from the queue and dispatches them by name to the mail-send
/// port. A failed job goes back through the queue's retry engine: delayed by
/// its backoff policy while attempts remain, buried once exhausted.
pub struct QueueWorker {
    queue: Arc<dyn JobQueue>,
    email: Arc<dyn EmailSender>,
    limiter: DirectRateLimiter,
    permits: Arc<Semaphore>,
    config: WorkerConfig,
}

impl QueueWorker {
    pub fn new(queue: Arc<dyn JobQueue>, email: Arc<dyn EmailSender>, config: WorkerConfig) -> Self {
        let per_second = NonZeroU32::new(config.rate_limit_per_sec.max(1))
            .unwrap_or(NonZeroU32::MIN);
        Self {
            queue,
            email,
            limiter: RateLimiter::direct(Quota::per_second(per_second)),
            permits: Arc::new(Semaphore::new(config.concurrency)),
            config,
        }
    }

    /// Run until the shutdown signal flips, then drain in-flight jobs.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            concurrency = self.config.concurrency,
            rate_limit_per_sec = self.config.rate_limit_per_sec,
            "Job worker started"
        );

        let mut in_flight: JoinSet<()> = JoinSet::new();

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.queue.reserve().await {
                Ok(Some(job)) => {
                    self.limiter.until_ready().await;
                    let permit = match self.permits.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    };
                    let queue = self.queue.clone();
                    let email = self.email.clone();
                    in_flight.spawn(async move {
                        process_job(queue, email, job).await;
                        drop(permit);
                    });
                    // Reap finished tasks without blocking.
                    while in_flight.try_join_next().is_some() {}
                }
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to reserve a job, backing off");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        info!("Job worker draining in-flight jobs");
        while in_flight.join_next().await.is_some() {}
        info!("Job worker stopped");
    }

    /// Reserve-and-process a single job; test seam for the worker loop.
    pub async fn tick(&self) -> Result<bool, AppError> {
        match self.queue.reserve().await? {
            Some(job) => {
                self.limiter.until_ready().await;
                process_job(self.queue.clone(), self.email.clone(), job).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

async fn process_job(queue: Arc<dyn JobQueue>, email: Arc<dyn EmailSender>, job: Job) {
    counter!("jobs_active_total", "job" => job.name.clone()).increment(1);
    tracing::debug!(job_id = %job.job_id, name = %job.name, attempt = job.attempts_made + 1,
        "Processing job");

    let result = dispatch(email.as_ref(), &job).await;

    match result {
        Ok(()) => {
            counter!("jobs_completed_total", "job" => job.name.clone()).increment(1);
            tracing::debug!(job_id = %job.job_id, name = %job.name, "Job completed");
        }
        Err(e) => {
            counter!("jobs_failed_total", "job" => job.name.clone()).increment(1);
            let failed = job.with_attempt();
            if failed.exhausted() {
                error!(job_id = %failed.job_id, name = %failed.name, error = %e,
                    attempts = failed.attempts_made, "Job exhausted its attempts, burying");
                counter!("jobs_dead_total", "job" => failed.name.clone()).increment(1);
                if let Err(bury_err) = queue.bury(&failed, &e.to_string()).await {
                    error!(job_id = %failed.job_id, error = %bury_err, "Failed to bury job");
                }
            } else {
                let delay = failed.backoff.delay_for_attempt(failed.attempts_made);
                warn!(job_id = %failed.job_id, name = %failed.name, error = %e,
                    attempt = failed.attempts_made, delay_ms = delay.as_millis() as u64,
                    "Job failed, scheduling retry");
                if let Err(requeue_err) = queue.enqueue_delayed(failed.clone(), delay).await {
                    error!(job_id = %failed.job_id, error = %requeue_err,
                        "Failed to requeue job for retry");
                }
            }
        }
    }
}

async fn dispatch(email: &dyn EmailSender, job: &Job) -> Result<(), AppError> {
    let to = job.payload["email"]
        .as_str()
        .ok_or_else(|| AppError::ValidationError("Job payload missing email".to_string()))?;
    let user_name = job.payload["userName"].as_str();

    match job.name.as_str() {
        SEND_OTP_EMAIL_JOB => {
            let otp = job.payload["otp"]
                .as_str()
                .ok_or_else(|| AppError::ValidationError("Job payload missing otp".to_string()))?;
            email.send_otp_email(to, otp, user_name).await
        }
        SEND_WELCOME_EMAIL_JOB => email.send_welcome_email(to, user_name).await,
        other => Err(AppError::ValidationError(format!("Unknown job name: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{InMemoryJobQueue, NotificationQueue};
    use crate::services::RecordingEmailSender;

    fn worker(
        queue: &InMemoryJobQueue,
        email: &Arc<RecordingEmailSender>,
    ) -> QueueWorker {
        QueueWorker::new(
            Arc::new(queue.clone()),
            email.clone(),
            WorkerConfig::default(),
        )
    }

    #[tokio::test]
    async fn otp_job_reaches_the_mail_port_with_the_plaintext_code() {
        let queue = InMemoryJobQueue::new();
        let email = Arc::new(RecordingEmailSender::new());
        NotificationQueue::new(Arc::new(queue.clone()))
            .add_otp_email_job("a@example.com", "123456", Some("Ada"))
            .await
            .unwrap();

        assert!(worker(&queue, &email).tick().await.unwrap());

        let sent = email.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "a@example.com");
        assert_eq!(sent[0].kind, "otp");
        assert_eq!(sent[0].otp.as_deref(), Some("123456"));
    }

    #[tokio::test]
    async fn failed_job_retries_with_exponential_delay() {
        let queue = InMemoryJobQueue::new();
        let email = Arc::new(RecordingEmailSender::new());
        email.fail_next(2);
        NotificationQueue::new(Arc::new(queue.clone()))
            .add_otp_email_job("a@example.com", "123456", None)
            .await
            .unwrap();
        let worker = worker(&queue, &email);

        // First attempt fails: delayed ~1s (2^0 * 1s).
        assert!(worker.tick().await.unwrap());
        let delayed = queue.delayed_jobs();
        assert_eq!(delayed.len(), 1);
        assert_eq!(delayed[0].1.attempts_made, 1);
        let wait = (delayed[0].0 - chrono::Utc::now()).num_milliseconds();
        assert!((500..=1_100).contains(&wait), "unexpected delay {wait}ms");

        // Second attempt fails: delayed ~2s (2^1 * 1s).
        queue.promote_all();
        assert!(worker.tick().await.unwrap());
        let delayed = queue.delayed_jobs();
        assert_eq!(delayed[0].1.attempts_made, 2);
        let wait = (delayed[0].0 - chrono::Utc::now()).num_milliseconds();
        assert!((1_500..=2_100).contains(&wait), "unexpected delay {wait}ms");

        // Third attempt succeeds.
        queue.promote_all();
        assert!(worker.tick().await.unwrap());
        assert_eq!(email.sent().len(), 1);
        assert!(queue.delayed_jobs().is_empty());
        assert!(queue.dead_jobs().is_empty());
    }

    #[tokio::test]
    async fn exhausted_job_is_buried_with_its_last_error() {
        let queue = InMemoryJobQueue::new();
        let email = Arc::new(RecordingEmailSender::new());
        email.fail_always(true);
        NotificationQueue::new(Arc::new(queue.clone()))
            .add_welcome_email_job("a@example.com", None)
            .await
            .unwrap();
        let worker = worker(&queue, &email);

        for _ in 0..3 {
            queue.promote_all();
            assert!(worker.tick().await.unwrap());
        }

        assert!(!worker.tick().await.unwrap(), "no job should remain");
        let dead = queue.dead_jobs();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].0.attempts_made, 3);
        assert!(dead[0].1.contains("smtp unavailable"));
        assert!(email.sent().is_empty());
    }

    #[tokio::test]
    async fn unknown_job_names_are_buried_immediately_after_budget() {
        let queue = InMemoryJobQueue::new();
        let email = Arc::new(RecordingEmailSender::new());
        let job = Job::new(
            "renderPdf",
            serde_json::json!({"email": "a@example.com"}),
            1,
            1,
            super::super::Backoff::fixed(Duration::from_secs(1)),
        );
        queue.enqueue(job).await.unwrap();

        assert!(worker(&queue, &email).tick().await.unwrap());
        let dead = queue.dead_jobs();
        assert_eq!(dead.len(), 1);
        assert!(dead[0].1.contains("Unknown job name"));
    }
}
