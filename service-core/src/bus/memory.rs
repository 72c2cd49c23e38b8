//! In-memory message bus for tests.

use crate::bus::{BusMessage, Envelope, MessageBus, Subscription};
use crate::error::AppError;
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

#[derive(Default)]
struct Inner {
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<BusMessage>>>>,
    published: Mutex<Vec<(String, Envelope)>>,
    fail_publish: AtomicBool,
}

/// Fake bus that delivers messages synchronously to in-process subscribers
/// and records everything published for assertions.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    inner: Arc<Inner>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent publishes fail, simulating an unreachable bus.
    pub fn fail_publishes(&self, fail: bool) {
        self.inner.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Everything published so far, in order.
    pub fn published(&self) -> Vec<(String, Envelope)> {
        self.inner.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<(), AppError> {
        if self.inner.fail_publish.load(Ordering::SeqCst) {
            return Err(AppError::BusError("bus unreachable".to_string()));
        }

        self.inner
            .published
            .lock()
            .unwrap()
            .push((topic.to_string(), envelope.clone()));

        let payload = serde_json::to_vec(envelope)?;
        let mut subscribers = self.inner.subscribers.lock().unwrap();
        if let Some(senders) = subscribers.get_mut(topic) {
            senders.retain(|tx| {
                tx.send(BusMessage {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                })
                .is_ok()
            });
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, AppError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .subscribers
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn close(&self) -> Result<(), AppError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn delivers_to_subscribers_and_records_publishes() {
        let bus = InMemoryBus::new();
        let mut sub = bus.subscribe("UserRegisteredEvent").await.unwrap();

        let envelope = Envelope {
            key: "user-1".to_string(),
            value: serde_json::json!({"email": "a@example.com"}),
        };
        bus.publish("UserRegisteredEvent", &envelope).await.unwrap();

        let msg = sub.next().await.unwrap();
        assert_eq!(msg.topic, "UserRegisteredEvent");
        assert_eq!(msg.envelope().unwrap().key, "user-1");
        assert_eq!(bus.published().len(), 1);
    }

    #[tokio::test]
    async fn publish_fails_when_unreachable() {
        let bus = InMemoryBus::new();
        bus.fail_publishes(true);

        let envelope = Envelope {
            key: "k".to_string(),
            value: serde_json::Value::Null,
        };
        let err = bus.publish("t", &envelope).await.unwrap_err();
        assert!(matches!(err, AppError::BusError(_)));
        assert!(bus.published().is_empty());
    }
}
