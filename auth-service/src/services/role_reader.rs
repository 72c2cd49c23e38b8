//! Role lookup port. Roles are owned elsewhere; registration only needs
//! the id of the default client role.

use crate::domain::AuthError;
use async_trait::async_trait;
use sqlx::postgres::PgPool;

#[async_trait]
pub trait RoleReader: Send + Sync {
    async fn client_role_id(&self) -> Result<Option<i32>, AuthError>;
}

#[derive(Clone)]
pub struct PgRoleReader {
    pool: PgPool,
}

impl PgRoleReader {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoleReader for PgRoleReader {
    async fn client_role_id(&self) -> Result<Option<i32>, AuthError> {
        let row: Option<(i32,)> = sqlx::query_as("SELECT id FROM roles WHERE name = 'client'")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(id,)| id))
    }
}

/// Test implementation returning a fixed role id (or none).
pub struct FixedRoleReader(pub Option<i32>);

#[async_trait]
impl RoleReader for FixedRoleReader {
    async fn client_role_id(&self) -> Result<Option<i32>, AuthError> {
        Ok(self.0)
    }
}
