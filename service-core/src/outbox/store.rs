//! Outbox store port with Postgres and in-memory implementations.

use crate::error::AppError;
use crate::outbox::{NewOutboxRecord, OutboxRecord, OutboxStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::{FromRow, Postgres, Transaction};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Persistence port for outbox rows.
///
/// All mutations are single-row conditional updates; `claim` is the atomic
/// claim primitive (zero rows affected means another relay instance won).
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Insert a fresh PENDING row. Production writers insert inside their
    /// own transaction instead; this is the path for fakes and tooling.
    async fn insert(&self, record: NewOutboxRecord) -> Result<Uuid, AppError>;

    /// Oldest-first batch of PENDING rows with retry budget remaining.
    async fn fetch_batch(
        &self,
        batch_size: i64,
        max_attempts: i32,
    ) -> Result<Vec<OutboxRecord>, AppError>;

    /// Atomically move a row PENDING -> PROCESSING. Returns false when the
    /// row was already claimed or finalized elsewhere.
    async fn claim(&self, id: Uuid) -> Result<bool, AppError>;

    /// Finalize a successfully published row.
    async fn mark_completed(&self, id: Uuid) -> Result<(), AppError>;

    /// Record a publish failure: attempts+1, last error, and PENDING while
    /// budget remains, FAILED otherwise. Returns the resulting status.
    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        max_attempts: i32,
    ) -> Result<OutboxStatus, AppError>;

    /// Requeue rows stuck in PROCESSING longer than `older_than` (relay
    /// crashed between claim and publish). Returns the number requeued.
    async fn reclaim_stuck(&self, older_than: Duration) -> Result<u64, AppError>;
}

// ==================== Postgres ====================

#[derive(FromRow)]
struct OutboxRow {
    id: Uuid,
    #[sqlx(rename = "type")]
    event_type: String,
    payload: serde_json::Value,
    metadata: serde_json::Value,
    status: String,
    attempts: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<OutboxRow> for OutboxRecord {
    type Error = AppError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        let status = OutboxStatus::parse(&row.status).ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!("Unknown outbox status: {}", row.status))
        })?;
        Ok(OutboxRecord {
            id: row.id,
            event_type: row.event_type,
            payload: row.payload,
            metadata: row.metadata,
            status,
            attempts: row.attempts,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
            processed_at: row.processed_at,
        })
    }
}

/// Postgres-backed outbox store.
#[derive(Clone)]
pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a PENDING row inside the caller's transaction. This is how
    /// aggregate writers co-locate state and events atomically.
    pub async fn insert_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        record: &NewOutboxRecord,
    ) -> Result<Uuid, AppError> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO integration_event_outbox
                (id, type, payload, metadata, status, attempts, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'pending', 0, NOW(), NOW())
            "#,
        )
        .bind(id)
        .bind(&record.event_type)
        .bind(&record.payload)
        .bind(serde_json::to_value(&record.metadata)?)
        .execute(&mut **tx)
        .await?;
        Ok(id)
    }
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn insert(&self, record: NewOutboxRecord) -> Result<Uuid, AppError> {
        let mut tx = self.pool.begin().await?;
        let id = Self::insert_in_tx(&mut tx, &record).await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn fetch_batch(
        &self,
        batch_size: i64,
        max_attempts: i32,
    ) -> Result<Vec<OutboxRecord>, AppError> {
        let rows = sqlx::query_as::<_, OutboxRow>(
            r#"
            SELECT id, type, payload, metadata, status, attempts, last_error,
                   created_at, updated_at, processed_at
            FROM integration_event_outbox
            WHERE status = 'pending' AND attempts < $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#,
        )
        .bind(max_attempts)
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(OutboxRecord::try_from).collect()
    }

    async fn claim(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE integration_event_outbox
            SET status = 'processing', updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_completed(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE integration_event_outbox
            SET status = 'completed', processed_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        max_attempts: i32,
    ) -> Result<OutboxStatus, AppError> {
        let (status,): (String,) = sqlx::query_as(
            r#"
            UPDATE integration_event_outbox
            SET attempts = attempts + 1,
                last_error = $2,
                status = CASE WHEN attempts + 1 >= $3 THEN 'failed' ELSE 'pending' END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING status
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(max_attempts)
        .fetch_one(&self.pool)
        .await?;

        OutboxStatus::parse(&status).ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!("Unknown outbox status: {}", status))
        })
    }

    async fn reclaim_stuck(&self, older_than: Duration) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE integration_event_outbox
            SET status = 'pending', updated_at = NOW()
            WHERE status = 'processing'
              AND updated_at < NOW() - make_interval(secs => $1)
            "#,
        )
        .bind(older_than.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

// ==================== In-memory ====================

/// In-memory outbox store for tests; mirrors the Postgres semantics.
#[derive(Clone, Default)]
pub struct InMemoryOutboxStore {
    records: Arc<Mutex<Vec<OutboxRecord>>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every row, in insertion order.
    pub fn records(&self) -> Vec<OutboxRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn find(&self, id: Uuid) -> Option<OutboxRecord> {
        self.records.lock().unwrap().iter().find(|r| r.id == id).cloned()
    }

    /// Test helper: pretend a row was last touched `age` ago.
    pub fn backdate_updated(&self, id: Uuid, age: Duration) {
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records.iter_mut().find(|r| r.id == id) {
            record.updated_at = Utc::now()
                - chrono::Duration::from_std(age).unwrap_or_else(|_| chrono::Duration::zero());
        }
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn insert(&self, record: NewOutboxRecord) -> Result<Uuid, AppError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        self.records.lock().unwrap().push(OutboxRecord {
            id,
            event_type: record.event_type,
            payload: record.payload,
            metadata: serde_json::to_value(&record.metadata)?,
            status: OutboxStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
        });
        Ok(id)
    }

    async fn fetch_batch(
        &self,
        batch_size: i64,
        max_attempts: i32,
    ) -> Result<Vec<OutboxRecord>, AppError> {
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .filter(|r| r.status == OutboxStatus::Pending && r.attempts < max_attempts)
            .take(batch_size as usize)
            .cloned()
            .collect())
    }

    async fn claim(&self, id: Uuid) -> Result<bool, AppError> {
        let mut records = self.records.lock().unwrap();
        match records
            .iter_mut()
            .find(|r| r.id == id && r.status == OutboxStatus::Pending)
        {
            Some(record) => {
                record.status = OutboxStatus::Processing;
                record.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_completed(&self, id: Uuid) -> Result<(), AppError> {
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records.iter_mut().find(|r| r.id == id) {
            record.status = OutboxStatus::Completed;
            record.processed_at = Some(Utc::now());
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        max_attempts: i32,
    ) -> Result<OutboxStatus, AppError> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| AppError::InternalError(anyhow::anyhow!("No outbox row {id}")))?;
        record.attempts += 1;
        record.last_error = Some(error.to_string());
        record.status = if record.attempts >= max_attempts {
            OutboxStatus::Failed
        } else {
            OutboxStatus::Pending
        };
        record.updated_at = Utc::now();
        Ok(record.status)
    }

    async fn reclaim_stuck(&self, older_than: Duration) -> Result<u64, AppError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::zero());
        let mut records = self.records.lock().unwrap();
        let mut requeued = 0;
        for record in records
            .iter_mut()
            .filter(|r| r.status == OutboxStatus::Processing && r.updated_at < cutoff)
        {
            record.status = OutboxStatus::Pending;
            record.updated_at = Utc::now();
            requeued += 1;
        }
        Ok(requeued)
    }
}
