//! Aggregate persistence: the transactional outbox write path.
//!
//! `save` persists aggregate state, the verification-code row and one
//! outbox row per pending event in a single transaction, and clears the
//! aggregate's event buffer only after the transaction has committed.

use crate::domain::{AuthError, AuthUser, Email, HashedPassword, UserStatus, VerificationCode};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::outbox::{EventMetadata, InMemoryOutboxStore, NewOutboxRecord, OutboxStore};
use service_core::outbox::store::PgOutboxStore;
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const EVENT_SOURCE: &str = "auth-service";
const CODE_PURPOSE: &str = "register";

#[async_trait]
pub trait AuthUserRepository: Send + Sync {
    /// Atomically persist state + pending events, then clear the buffer.
    async fn save(&self, user: &mut AuthUser) -> Result<(), AuthError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<AuthUser>, AuthError>;
}

// ==================== Postgres ====================

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    password: String,
    role_id: i32,
    status: String,
    code_hash: Option<String>,
    code_expires_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct PgAuthUserRepository {
    pool: PgPool,
}

impl PgAuthUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuthUserRepository for PgAuthUserRepository {
    async fn save(&self, user: &mut AuthUser) -> Result<(), AuthError> {
        let mut tx = self.pool.begin().await?;

        // Row-level upsert guarded by status: a different aggregate may only
        // take over an email while the existing row is still INACTIVE
        // (re-registration before verification, keeping the row identity).
        let persisted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO users (id, email, password, role_id, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
            ON CONFLICT (email) DO UPDATE
            SET password = EXCLUDED.password,
                role_id = EXCLUDED.role_id,
                status = EXCLUDED.status,
                updated_at = NOW()
            WHERE users.id = EXCLUDED.id OR users.status = 'inactive'
            RETURNING id
            "#,
        )
        .bind(user.id())
        .bind(user.email().as_str())
        .bind(user.password().as_str())
        .bind(user.role_id())
        .bind(user.status().as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some((persisted_id,)) = persisted else {
            return Err(AuthError::EmailAlreadyRegistered);
        };
        if persisted_id != user.id() {
            // Re-registration kept the row identity; the aggregate and its
            // pending events must carry the id the outbox will publish.
            user.adopt_identity(persisted_id);
            tracing::debug!(email = %user.email().as_str(),
                "Re-registration retained the existing row identity");
        }

        // The code row is always replaced wholesale, never patched.
        match user.verification_code() {
            Some(code) => {
                sqlx::query(
                    r#"
                    INSERT INTO verification_codes
                        (email, purpose, code_hash, expires_at, attempts, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, 0, NOW(), NOW())
                    ON CONFLICT (email, purpose) DO UPDATE
                    SET code_hash = EXCLUDED.code_hash,
                        expires_at = EXCLUDED.expires_at,
                        attempts = 0,
                        updated_at = NOW()
                    "#,
                )
                .bind(user.email().as_str())
                .bind(CODE_PURPOSE)
                .bind(code.code_hash())
                .bind(code.expires_at())
                .execute(&mut *tx)
                .await?;
            }
            None => {
                sqlx::query("DELETE FROM verification_codes WHERE email = $1 AND purpose = $2")
                    .bind(user.email().as_str())
                    .bind(CODE_PURPOSE)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        for event in user.pending_events() {
            let record = NewOutboxRecord {
                event_type: event.event_type().to_string(),
                payload: event.payload(),
                metadata: EventMetadata::new(EVENT_SOURCE, user.id().to_string()),
            };
            PgOutboxStore::insert_in_tx(&mut tx, &record).await?;
        }

        tx.commit().await?;

        // Only now is it safe to drop the events; a failed transaction
        // leaves the buffer intact so a retried save republishes them.
        user.commit();
        Ok(())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<AuthUser>, AuthError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT u.id, u.email, u.password, u.role_id, u.status,
                   v.code_hash AS code_hash, v.expires_at AS code_expires_at
            FROM users u
            LEFT JOIN verification_codes v
              ON v.email = u.email AND v.purpose = $2
            WHERE u.email = $1
            "#,
        )
        .bind(email)
        .bind(CODE_PURPOSE)
        .fetch_optional(&self.pool)
        .await?;

        row.map(restore_user).transpose()
    }
}

fn restore_user(row: UserRow) -> Result<AuthUser, AuthError> {
    let status = UserStatus::parse(&row.status).ok_or_else(|| {
        AuthError::Infrastructure(service_core::error::AppError::InternalError(
            anyhow::anyhow!("Unknown user status: {}", row.status),
        ))
    })?;
    let code = match (row.code_hash, row.code_expires_at) {
        (Some(hash), Some(expires_at)) => Some(VerificationCode::restore(hash, expires_at)),
        _ => None,
    };
    Ok(AuthUser::restore(
        row.id,
        Email::new(&row.email)?,
        HashedPassword::from_hash(row.password)?,
        row.role_id,
        status,
        code,
    ))
}

// ==================== In-memory ====================

#[derive(Clone)]
struct StoredUser {
    id: Uuid,
    email: String,
    password: String,
    role_id: i32,
    status: UserStatus,
    code: Option<(String, DateTime<Utc>)>,
}

/// In-memory repository sharing an [`InMemoryOutboxStore`], mirroring the
/// transactional semantics of the Postgres implementation for tests.
pub struct InMemoryAuthUserRepository {
    users: Mutex<HashMap<String, StoredUser>>,
    outbox: Arc<InMemoryOutboxStore>,
    fail_next_save: AtomicBool,
}

impl InMemoryAuthUserRepository {
    pub fn new(outbox: Arc<InMemoryOutboxStore>) -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            outbox,
            fail_next_save: AtomicBool::new(false),
        }
    }

    /// Make the next `save` fail before any write, simulating a rolled-back
    /// transaction.
    pub fn fail_next_save(&self) {
        self.fail_next_save.store(true, Ordering::SeqCst);
    }

    pub fn user_count(&self) -> usize {
        self.users.lock().unwrap().len()
    }
}

#[async_trait]
impl AuthUserRepository for InMemoryAuthUserRepository {
    async fn save(&self, user: &mut AuthUser) -> Result<(), AuthError> {
        if self.fail_next_save.swap(false, Ordering::SeqCst) {
            return Err(AuthError::Infrastructure(
                service_core::error::AppError::DatabaseError(sqlx::Error::PoolClosed),
            ));
        }

        {
            let mut users = self.users.lock().unwrap();
            let email = user.email().as_str().to_string();
            if let Some(existing) = users.get(&email) {
                if existing.id != user.id() {
                    if existing.status != UserStatus::Inactive {
                        return Err(AuthError::EmailAlreadyRegistered);
                    }
                    // Re-registration keeps the row identity.
                    user.adopt_identity(existing.id);
                }
            }
            users.insert(
                email.clone(),
                StoredUser {
                    id: user.id(),
                    email,
                    password: user.password().as_str().to_string(),
                    role_id: user.role_id(),
                    status: user.status(),
                    code: user
                        .verification_code()
                        .map(|c| (c.code_hash().to_string(), c.expires_at())),
                },
            );
        }

        for event in user.pending_events() {
            self.outbox
                .insert(NewOutboxRecord {
                    event_type: event.event_type().to_string(),
                    payload: event.payload(),
                    metadata: EventMetadata::new(EVENT_SOURCE, user.id().to_string()),
                })
                .await
                .map_err(AuthError::Infrastructure)?;
        }

        user.commit();
        Ok(())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<AuthUser>, AuthError> {
        let users = self.users.lock().unwrap();
        users
            .get(email)
            .map(|stored| {
                Ok(AuthUser::restore(
                    stored.id,
                    Email::new(&stored.email)?,
                    HashedPassword::from_hash(stored.password.clone())?,
                    stored.role_id,
                    stored.status,
                    stored
                        .code
                        .as_ref()
                        .map(|(hash, expires)| VerificationCode::restore(hash.clone(), *expires)),
                ))
            })
            .transpose()
    }
}
