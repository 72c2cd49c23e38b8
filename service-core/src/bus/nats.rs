//! NATS-backed message bus.

use crate::bus::{BusMessage, Envelope, MessageBus, Subscription};
use crate::error::AppError;
use async_trait::async_trait;
use futures::StreamExt;

/// Process-scoped NATS client wrapper.
#[derive(Clone)]
pub struct NatsBus {
    client: async_nats::Client,
}

impl NatsBus {
    /// Connect to the NATS server at `url`.
    pub async fn connect(url: &str) -> Result<Self, AppError> {
        tracing::info!(url = %url, "Connecting to NATS");
        let client = async_nats::connect(url).await?;
        tracing::info!("Successfully connected to NATS");
        Ok(Self { client })
    }
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<(), AppError> {
        let payload = serde_json::to_vec(envelope)?;
        self.client
            .publish(topic.to_string(), payload.into())
            .await
            .map_err(|e| AppError::BusError(e.to_string()))?;
        // Surface connection-level failures to the caller instead of
        // letting them sit in the client's write buffer.
        self.client
            .flush()
            .await
            .map_err(|e| AppError::BusError(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, AppError> {
        let subscriber = self
            .client
            .subscribe(topic.to_string())
            .await
            .map_err(|e| AppError::BusError(e.to_string()))?;

        Ok(subscriber
            .map(|msg| BusMessage {
                topic: msg.subject.to_string(),
                payload: msg.payload.to_vec(),
            })
            .boxed())
    }

    async fn close(&self) -> Result<(), AppError> {
        self.client
            .flush()
            .await
            .map_err(|e| AppError::BusError(e.to_string()))
    }
}
