//! Polling relay that moves outbox rows from PENDING to published.

use crate::bus::{Envelope, MessageBus};
use crate::error::AppError;
use crate::outbox::{OutboxRecord, OutboxStatus, OutboxStore};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Relay tuning knobs.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// How often the outbox table is polled.
    pub poll_interval: Duration,
    /// Upper bound on rows handled per tick.
    pub batch_size: i64,
    /// Publish attempts before a row becomes terminally FAILED.
    pub max_attempts: i32,
    /// Age after which a PROCESSING row is considered orphaned and requeued.
    pub stuck_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 50,
            max_attempts: 5,
            stuck_timeout: Duration::from_secs(60),
        }
    }
}

/// Timer-driven outbox publisher.
///
/// Rows within a tick are processed sequentially, oldest first, so delivery
/// order is preserved within a batch. Concurrent relay instances are safe:
/// the claim is a conditional status update and losing it just skips the row.
pub struct OutboxRelay {
    store: Arc<dyn OutboxStore>,
    bus: Arc<dyn MessageBus>,
    config: RelayConfig,
}

impl OutboxRelay {
    pub fn new(store: Arc<dyn OutboxStore>, bus: Arc<dyn MessageBus>, config: RelayConfig) -> Self {
        Self { store, bus, config }
    }

    /// Run until the shutdown signal flips. In-flight rows finish their
    /// current tick before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            "Outbox relay started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "Outbox relay tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("Outbox relay shutting down");
                    break;
                }
            }
        }
    }

    /// One poll cycle: sweep orphaned rows, then claim and publish a batch.
    pub async fn tick(&self) -> Result<(), AppError> {
        let requeued = self.store.reclaim_stuck(self.config.stuck_timeout).await?;
        if requeued > 0 {
            warn!(requeued, "Requeued outbox rows stuck in processing");
        }

        let records = self
            .store
            .fetch_batch(self.config.batch_size, self.config.max_attempts)
            .await?;
        if records.is_empty() {
            return Ok(());
        }
        debug!(count = records.len(), "Processing outbox batch");

        for record in records {
            // Zero rows affected means another relay instance claimed it.
            if !self.store.claim(record.id).await? {
                continue;
            }

            match self.publish(&record).await {
                Ok(()) => {
                    self.store.mark_completed(record.id).await?;
                    counter!("outbox_published_total").increment(1);
                }
                Err(e) => {
                    warn!(id = %record.id, event_type = %record.event_type, error = %e,
                        "Outbox publish failed");
                    counter!("outbox_publish_errors_total").increment(1);
                    let status = self
                        .store
                        .mark_failed(record.id, &e.to_string(), self.config.max_attempts)
                        .await?;
                    if status == OutboxStatus::Failed {
                        error!(id = %record.id, event_type = %record.event_type,
                            "Outbox row exhausted its retry budget; manual intervention required");
                        counter!("outbox_exhausted_total").increment(1);
                    }
                }
            }
        }
        Ok(())
    }

    async fn publish(&self, record: &OutboxRecord) -> Result<(), AppError> {
        let envelope = Envelope {
            key: record.partition_key(),
            value: record.payload.clone(),
        };
        self.bus.publish(&record.event_type, &envelope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::outbox::{EventMetadata, InMemoryOutboxStore, NewOutboxRecord};

    fn registered_event(email: &str) -> NewOutboxRecord {
        NewOutboxRecord {
            event_type: "UserRegisteredEvent".to_string(),
            payload: serde_json::json!({
                "userId": "11111111-2222-3333-4444-555555555555",
                "email": email,
                "otp": "123456",
            }),
            metadata: EventMetadata::new("auth-service", "11111111-2222-3333-4444-555555555555"),
        }
    }

    fn relay(store: &InMemoryOutboxStore, bus: &InMemoryBus) -> OutboxRelay {
        OutboxRelay::new(
            Arc::new(store.clone()),
            Arc::new(bus.clone()),
            RelayConfig::default(),
        )
    }

    #[tokio::test]
    async fn publishes_pending_rows_and_marks_completed() {
        let store = InMemoryOutboxStore::new();
        let bus = InMemoryBus::new();
        let id = store.insert(registered_event("a@example.com")).await.unwrap();

        relay(&store, &bus).tick().await.unwrap();

        let published = bus.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "UserRegisteredEvent");
        assert_eq!(published[0].1.key, "11111111-2222-3333-4444-555555555555");

        let record = store.find(id).unwrap();
        assert_eq!(record.status, OutboxStatus::Completed);
        assert!(record.processed_at.is_some());
    }

    #[tokio::test]
    async fn empty_outbox_is_a_no_op() {
        let store = InMemoryOutboxStore::new();
        let bus = InMemoryBus::new();
        relay(&store, &bus).tick().await.unwrap();
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn failing_rows_retry_until_attempts_exhausted() {
        let store = InMemoryOutboxStore::new();
        let bus = InMemoryBus::new();
        bus.fail_publishes(true);
        let id = store.insert(registered_event("a@example.com")).await.unwrap();
        let relay = relay(&store, &bus);

        for attempt in 1..=5 {
            relay.tick().await.unwrap();
            let record = store.find(id).unwrap();
            assert_eq!(record.attempts, attempt);
            assert!(record.last_error.is_some());
            if attempt < 5 {
                assert_eq!(record.status, OutboxStatus::Pending);
            } else {
                assert_eq!(record.status, OutboxStatus::Failed);
            }
        }

        // Terminal rows are never selected again, even once the bus recovers.
        bus.fail_publishes(false);
        relay.tick().await.unwrap();
        assert!(bus.published().is_empty());
        assert_eq!(store.find(id).unwrap().status, OutboxStatus::Failed);
    }

    #[tokio::test]
    async fn batch_publishes_in_insertion_order() {
        let store = InMemoryOutboxStore::new();
        let bus = InMemoryBus::new();
        for i in 0..3 {
            store
                .insert(registered_event(&format!("user{i}@example.com")))
                .await
                .unwrap();
        }

        relay(&store, &bus).tick().await.unwrap();

        let emails: Vec<String> = bus
            .published()
            .iter()
            .map(|(_, env)| env.value["email"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            emails,
            vec!["user0@example.com", "user1@example.com", "user2@example.com"]
        );
    }

    #[tokio::test]
    async fn stuck_processing_rows_are_requeued_after_timeout() {
        let store = InMemoryOutboxStore::new();
        let bus = InMemoryBus::new();
        let id = store.insert(registered_event("a@example.com")).await.unwrap();

        // Simulate a relay that claimed the row and died before publishing.
        assert!(store.claim(id).await.unwrap());
        store.backdate_updated(id, Duration::from_secs(120));

        relay(&store, &bus).tick().await.unwrap();

        // The sweep runs at the start of the tick, so the row is republished
        // within the same cycle.
        assert_eq!(bus.published().len(), 1);
        assert_eq!(store.find(id).unwrap().status, OutboxStatus::Completed);
    }
}
