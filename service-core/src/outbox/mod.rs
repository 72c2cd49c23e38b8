//! Transactional outbox: record model, store port and polling relay.
//!
//! Aggregate writers insert PENDING rows in the same transaction as the
//! state they describe; the relay later claims each row, publishes it to
//! the message bus and finalizes its status.

pub mod relay;
pub mod store;

pub use relay::{OutboxRelay, RelayConfig};
pub use store::{InMemoryOutboxStore, OutboxStore, PgOutboxStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status state machine for one outbox row.
///
/// Progression per attempt cycle: `Pending -> Processing -> (Completed |
/// Pending with attempts+1 | Failed when attempts are exhausted)`.
/// `Failed` is terminal and requires manual intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processing => "processing",
            OutboxStatus::Completed => "completed",
            OutboxStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OutboxStatus::Pending),
            "processing" => Some(OutboxStatus::Processing),
            "completed" => Some(OutboxStatus::Completed),
            "failed" => Some(OutboxStatus::Failed),
            _ => None,
        }
    }
}

/// Trace metadata stored alongside each outbox row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    pub trace_id: Uuid,
    pub source: String,
    pub version: String,
    pub aggregate_id: String,
}

impl EventMetadata {
    /// Fresh metadata with a newly generated trace id.
    pub fn new(source: &str, aggregate_id: impl Into<String>) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            source: source.to_string(),
            version: "1.0".to_string(),
            aggregate_id: aggregate_id.into(),
        }
    }
}

/// A persisted outbox row.
#[derive(Debug, Clone)]
pub struct OutboxRecord {
    pub id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub metadata: serde_json::Value,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    /// Partition key for publication: the payload's own id when present,
    /// then its user id, falling back to the row id.
    pub fn partition_key(&self) -> String {
        self.payload
            .get("id")
            .and_then(serde_json::Value::as_str)
            .or_else(|| self.payload.get("userId").and_then(serde_json::Value::as_str))
            .map(str::to_owned)
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// A row to be inserted, always inside the writer's transaction.
#[derive(Debug, Clone)]
pub struct NewOutboxRecord {
    pub event_type: String,
    pub payload: serde_json::Value,
    pub metadata: EventMetadata,
}
