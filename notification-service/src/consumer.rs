//! Bus consumer: subscribes to the auth event subjects, reconstructs typed
//! events and feeds them to the dispatcher exactly once per event id.

use crate::events::{AuthEvent, EventDispatcher, USER_OTP_REQUESTED_TOPIC, USER_REGISTERED_TOPIC};
use futures::stream::{select_all, StreamExt};
use metrics::counter;
use service_core::bus::{BusMessage, MessageBus};
use service_core::error::AppError;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{error, info, warn};

const LEDGER_CAPACITY: usize = 10_000;

/// Bounded set of already-processed event ids. Eviction is FIFO, so under
/// sustained traffic the window covers the most recent entries; redelivery
/// normally happens well inside it.
struct ProcessedLedger {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl ProcessedLedger {
    fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Returns false when the id was already recorded.
    fn record(&mut self, event_id: &str) -> bool {
        if self.seen.contains(event_id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        self.seen.insert(event_id.to_string());
        self.order.push_back(event_id.to_string());
        true
    }
}

pub struct EventConsumer {
    bus: Arc<dyn MessageBus>,
    dispatcher: Arc<EventDispatcher>,
    ledger: Mutex<ProcessedLedger>,
}

impl EventConsumer {
    pub fn new(bus: Arc<dyn MessageBus>, dispatcher: Arc<EventDispatcher>) -> Self {
        Self {
            bus,
            dispatcher,
            ledger: Mutex::new(ProcessedLedger::new(LEDGER_CAPACITY)),
        }
    }

    /// Consume both auth subjects until the shutdown signal flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), AppError> {
        let registered = self.bus.subscribe(USER_REGISTERED_TOPIC).await?;
        let otp_requested = self.bus.subscribe(USER_OTP_REQUESTED_TOPIC).await?;
        let mut messages = select_all(vec![registered, otp_requested]);

        info!(
            topics = ?[USER_REGISTERED_TOPIC, USER_OTP_REQUESTED_TOPIC],
            "Event consumer started"
        );

        loop {
            tokio::select! {
                message = messages.next() => {
                    let Some(message) = message else {
                        warn!("Bus subscription closed, stopping consumer");
                        break;
                    };
                    if let Err(e) = self.process(&message).await {
                        // Leave the ledger untouched so a redelivery retries.
                        error!(topic = %message.topic, error = %e, "Failed to process event");
                        counter!("events_failed_total").increment(1);
                    }
                }
                _ = shutdown.changed() => {
                    info!("Event consumer shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Decode, dedup and dispatch a single message.
    pub async fn process(&self, message: &BusMessage) -> Result<(), AppError> {
        let envelope = message.envelope()?;
        let event = AuthEvent::decode(&message.topic, envelope.value)?;

        if !self.ledger.lock().unwrap().record(event.event_id()) {
            tracing::debug!(event_id = %event.event_id(), topic = %message.topic,
                "Duplicate event skipped");
            counter!("events_duplicate_total").increment(1);
            return Ok(());
        }

        match self.dispatcher.dispatch(&event).await {
            Ok(()) => {
                counter!("events_processed_total").increment(1);
                Ok(())
            }
            Err(e) => {
                // Dispatch failed; forget the id so the retry isn't deduped.
                let mut ledger = self.ledger.lock().unwrap();
                ledger.seen.remove(event.event_id());
                ledger.order.retain(|id| id != event.event_id());
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventHandler;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Recording {
        calls: AtomicUsize,
        fail_once: AtomicBool,
    }

    impl Recording {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_once: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl EventHandler for Recording {
        async fn handle(&self, _event: &AuthEvent) -> Result<(), AppError> {
            if self.fail_once.swap(false, Ordering::SeqCst) {
                return Err(AppError::QueueError("enqueue failed".to_string()));
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "Recording"
        }
    }

    fn message(event_id: &str) -> BusMessage {
        let envelope = service_core::bus::Envelope {
            key: "11111111-2222-3333-4444-555555555555".to_string(),
            value: serde_json::json!({
                "eventId": event_id,
                "occurredOn": "2026-01-05T10:00:00Z",
                "aggregateId": "11111111-2222-3333-4444-555555555555",
                "email": "a@example.com",
                "otp": "123456",
            }),
        };
        BusMessage {
            topic: USER_REGISTERED_TOPIC.to_string(),
            payload: serde_json::to_vec(&envelope).unwrap(),
        }
    }

    fn consumer(handler: Arc<Recording>) -> EventConsumer {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(USER_REGISTERED_TOPIC, handler);
        EventConsumer::new(
            Arc::new(service_core::bus::InMemoryBus::new()),
            Arc::new(dispatcher),
        )
    }

    #[tokio::test]
    async fn duplicate_event_ids_dispatch_once() {
        let handler = Arc::new(Recording::new());
        let consumer = consumer(handler.clone());

        consumer.process(&message("evt-1")).await.unwrap();
        consumer.process(&message("evt-1")).await.unwrap();
        consumer.process(&message("evt-2")).await.unwrap();

        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_dispatch_is_retryable_on_redelivery() {
        let handler = Arc::new(Recording::new());
        handler.fail_once.store(true, Ordering::SeqCst);
        let consumer = consumer(handler.clone());

        assert!(consumer.process(&message("evt-1")).await.is_err());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);

        // Redelivery of the same event id is not treated as a duplicate.
        consumer.process(&message("evt-1")).await.unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_payloads_are_rejected() {
        let handler = Arc::new(Recording::new());
        let consumer = consumer(handler.clone());

        let bad = BusMessage {
            topic: USER_REGISTERED_TOPIC.to_string(),
            payload: b"not json".to_vec(),
        };
        assert!(consumer.process(&bad).await.is_err());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn ledger_evicts_oldest_entries_at_capacity() {
        let mut ledger = ProcessedLedger::new(2);
        assert!(ledger.record("a"));
        assert!(ledger.record("b"));
        assert!(!ledger.record("a"));

        assert!(ledger.record("c"));
        // "a" was evicted to make room, so it is seen as new again.
        assert!(ledger.record("a"));
    }
}
