//! Typed reconstruction of the auth events this service consumes, plus the
//! in-process dispatcher that fans them out to handlers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::Arc;
use validator::Validate;

pub const USER_REGISTERED_TOPIC: &str = "UserRegisteredEvent";
pub const USER_OTP_REQUESTED_TOPIC: &str = "UserOtpRequestedEvent";

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UserRegisteredEventDto {
    #[validate(length(min = 1))]
    pub event_id: String,
    pub occurred_on: DateTime<Utc>,
    #[validate(length(min = 1))]
    pub aggregate_id: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(equal = 6))]
    pub otp: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UserOtpRequestedEventDto {
    #[validate(length(min = 1))]
    pub event_id: String,
    pub occurred_on: DateTime<Utc>,
    #[validate(length(min = 1))]
    pub aggregate_id: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(equal = 6))]
    pub otp: String,
}

/// Auth event after shape validation.
#[derive(Debug, Clone)]
pub enum AuthEvent {
    UserRegistered(UserRegisteredEventDto),
    UserOtpRequested(UserOtpRequestedEventDto),
}

impl AuthEvent {
    /// Decode and validate a payload received on `topic`.
    pub fn decode(topic: &str, payload: serde_json::Value) -> Result<Self, AppError> {
        match topic {
            USER_REGISTERED_TOPIC => {
                let dto: UserRegisteredEventDto = serde_json::from_value(payload)?;
                dto.validate()
                    .map_err(|e| AppError::ValidationError(e.to_string()))?;
                Ok(Self::UserRegistered(dto))
            }
            USER_OTP_REQUESTED_TOPIC => {
                let dto: UserOtpRequestedEventDto = serde_json::from_value(payload)?;
                dto.validate()
                    .map_err(|e| AppError::ValidationError(e.to_string()))?;
                Ok(Self::UserOtpRequested(dto))
            }
            other => Err(AppError::ValidationError(format!(
                "No decoder registered for topic {other}"
            ))),
        }
    }

    pub fn topic(&self) -> &'static str {
        match self {
            Self::UserRegistered(_) => USER_REGISTERED_TOPIC,
            Self::UserOtpRequested(_) => USER_OTP_REQUESTED_TOPIC,
        }
    }

    /// Idempotency key carried in the payload.
    pub fn event_id(&self) -> &str {
        match self {
            Self::UserRegistered(dto) => &dto.event_id,
            Self::UserOtpRequested(dto) => &dto.event_id,
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &AuthEvent) -> Result<(), AppError>;

    fn name(&self) -> &'static str;
}

/// In-process fan-out: each topic may carry any number of handlers, invoked
/// in registration order. The first handler error aborts the dispatch so the
/// whole event is redelivered and retried.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<&'static str, Vec<Arc<dyn EventHandler>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, topic: &'static str, handler: Arc<dyn EventHandler>) {
        self.handlers.entry(topic).or_default().push(handler);
    }

    pub async fn dispatch(&self, event: &AuthEvent) -> Result<(), AppError> {
        let Some(handlers) = self.handlers.get(event.topic()) else {
            tracing::warn!(topic = event.topic(), "No handlers registered for event");
            return Ok(());
        };
        for handler in handlers {
            tracing::debug!(topic = event.topic(), handler = handler.name(), "Dispatching event");
            handler.handle(event).await?;
        }
        Ok(())
    }
}
