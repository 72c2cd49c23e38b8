//! Event handlers: translate consumed auth events into queued jobs.

use crate::events::{AuthEvent, EventHandler};
use crate::queue::NotificationQueue;
use async_trait::async_trait;
use service_core::error::AppError;
use std::sync::Arc;

/// Enqueues an OTP email for both registration and code-resend events.
pub struct OtpEmailHandler {
    queue: Arc<NotificationQueue>,
}

impl OtpEmailHandler {
    pub fn new(queue: Arc<NotificationQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl EventHandler for OtpEmailHandler {
    async fn handle(&self, event: &AuthEvent) -> Result<(), AppError> {
        let (email, otp) = match event {
            AuthEvent::UserRegistered(dto) => (&dto.email, &dto.otp),
            AuthEvent::UserOtpRequested(dto) => (&dto.email, &dto.otp),
        };
        self.queue.add_otp_email_job(email, otp, None).await?;
        tracing::info!(topic = event.topic(), "OTP email job enqueued");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "OtpEmailHandler"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{USER_OTP_REQUESTED_TOPIC, USER_REGISTERED_TOPIC};
    use crate::queue::{InMemoryJobQueue, JobQueue, SEND_OTP_EMAIL_JOB};

    fn event(topic: &str, otp: &str) -> AuthEvent {
        AuthEvent::decode(
            topic,
            serde_json::json!({
                "eventId": format!("evt-{otp}"),
                "occurredOn": "2026-01-05T10:00:00Z",
                "aggregateId": "11111111-2222-3333-4444-555555555555",
                "email": "a@example.com",
                "otp": otp,
            }),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn both_event_types_enqueue_an_otp_job() {
        let queue = InMemoryJobQueue::new();
        let handler = OtpEmailHandler::new(Arc::new(NotificationQueue::new(Arc::new(
            queue.clone(),
        ))));

        handler
            .handle(&event(USER_REGISTERED_TOPIC, "111111"))
            .await
            .unwrap();
        handler
            .handle(&event(USER_OTP_REQUESTED_TOPIC, "222222"))
            .await
            .unwrap();

        assert_eq!(queue.waiting_len(), 2);
        let first = queue.reserve().await.unwrap().unwrap();
        assert_eq!(first.name, SEND_OTP_EMAIL_JOB);
        assert_eq!(first.payload["otp"], "111111");
    }
}
