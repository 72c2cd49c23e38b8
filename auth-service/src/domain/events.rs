//! Domain events recorded by the aggregate and propagated via the outbox.

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

/// An immutable record of something that happened inside the aggregate.
///
/// `event_id` doubles as the consumer-side idempotency key under
/// at-least-once delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainEvent {
    pub event_id: Uuid,
    pub occurred_on: DateTime<Utc>,
    pub kind: DomainEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DomainEventKind {
    UserRegistered {
        aggregate_id: Uuid,
        email: String,
        otp: String,
    },
    UserOtpRequested {
        aggregate_id: Uuid,
        email: String,
        otp: String,
    },
    UserVerified {
        aggregate_id: Uuid,
        email: String,
    },
}

impl DomainEvent {
    pub fn new(kind: DomainEventKind) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_on: Utc::now(),
            kind,
        }
    }

    /// Wire name; also the bus topic the relay publishes to.
    pub fn event_type(&self) -> &'static str {
        match self.kind {
            DomainEventKind::UserRegistered { .. } => "UserRegisteredEvent",
            DomainEventKind::UserOtpRequested { .. } => "UserOtpRequestedEvent",
            DomainEventKind::UserVerified { .. } => "UserVerifiedEvent",
        }
    }

    pub fn aggregate_id(&self) -> Uuid {
        match self.kind {
            DomainEventKind::UserRegistered { aggregate_id, .. }
            | DomainEventKind::UserOtpRequested { aggregate_id, .. }
            | DomainEventKind::UserVerified { aggregate_id, .. } => aggregate_id,
        }
    }

    /// Re-point the event at another aggregate. Only the aggregate calls
    /// this, when it adopts the identity of an existing persisted row.
    pub(crate) fn set_aggregate_id(&mut self, id: Uuid) {
        match &mut self.kind {
            DomainEventKind::UserRegistered { aggregate_id, .. }
            | DomainEventKind::UserOtpRequested { aggregate_id, .. }
            | DomainEventKind::UserVerified { aggregate_id, .. } => *aggregate_id = id,
        }
    }

    /// Serialized payload stored in the outbox row and published as-is.
    pub fn payload(&self) -> serde_json::Value {
        let base = json!({
            "eventId": self.event_id,
            "occurredOn": self.occurred_on,
            "aggregateId": self.aggregate_id(),
        });
        let mut payload = base;
        match &self.kind {
            DomainEventKind::UserRegistered { email, otp, .. }
            | DomainEventKind::UserOtpRequested { email, otp, .. } => {
                payload["email"] = json!(email);
                payload["otp"] = json!(otp);
            }
            DomainEventKind::UserVerified { email, .. } => {
                payload["email"] = json!(email);
            }
        }
        payload
    }
}
