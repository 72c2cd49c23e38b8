//! Message-bus port.
//!
//! The outbox relay publishes integration events through this trait and the
//! notification side consumes them through it. Production uses NATS; tests
//! use the in-memory implementation.

pub mod memory;
pub mod nats;

pub use memory::InMemoryBus;
pub use nats::NatsBus;

use crate::error::AppError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Wire envelope for a published event.
///
/// `key` is the partitioning key (aggregate or payload id); `value` is the
/// serialized event payload. Consumers treat the key as opaque.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub key: String,
    pub value: serde_json::Value,
}

/// A raw message delivered to a subscriber.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl BusMessage {
    /// Decode the payload back into an [`Envelope`].
    pub fn envelope(&self) -> Result<Envelope, AppError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Stream of messages for one subscription.
pub type Subscription = BoxStream<'static, BusMessage>;

/// At-least-once publish/subscribe transport.
///
/// Connected once at startup and passed by reference to producers and
/// consumers; `close` flushes in-flight publishes at shutdown.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<(), AppError>;

    async fn subscribe(&self, topic: &str) -> Result<Subscription, AppError>;

    async fn close(&self) -> Result<(), AppError>;
}
