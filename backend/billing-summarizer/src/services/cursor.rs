//! Per-tenant incremental billing cursors.

use crate::error::{BillingError, Result};
use crate::models::TenantCursor;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::error;

#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Load the tenant's cursor, creating it at `initial` when absent.
    async fn get_or_create(&self, tenant_id: &str, initial: DateTime<Utc>) -> Result<TenantCursor>;

    /// Move the cursor to `processed_through`.
    async fn advance(&self, tenant_id: &str, processed_through: DateTime<Utc>) -> Result<()>;
}

/// PostgreSQL-backed [`CursorStore`] over the `billing_cursors` table.
#[derive(Clone)]
pub struct PgCursorStore {
    db: PgPool,
}

impl PgCursorStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CursorStore for PgCursorStore {
    async fn get_or_create(&self, tenant_id: &str, initial: DateTime<Utc>) -> Result<TenantCursor> {
        // Concurrent creators both succeed; the first insert wins and both read it back.
        sqlx::query(
            r#"
            INSERT INTO billing_cursors (tenant_id, last_processed_at, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (tenant_id) DO NOTHING
            "#,
        )
        .bind(tenant_id)
        .bind(initial)
        .execute(&self.db)
        .await
        .map_err(|e| {
            error!(tenant_id = %tenant_id, "Failed to initialize billing cursor: {}", e);
            BillingError::CursorStore(format!("failed to initialize cursor: {}", e))
        })?;

        sqlx::query_as::<_, TenantCursor>(
            r#"
            SELECT tenant_id, last_processed_at, updated_at
            FROM billing_cursors
            WHERE tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_one(&self.db)
        .await
        .map_err(|e| BillingError::CursorStore(format!("failed to query cursor: {}", e)))
    }

    async fn advance(&self, tenant_id: &str, processed_through: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO billing_cursors (tenant_id, last_processed_at, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (tenant_id)
            DO UPDATE SET last_processed_at = EXCLUDED.last_processed_at,
                          updated_at = NOW()
            "#,
        )
        .bind(tenant_id)
        .bind(processed_through)
        .execute(&self.db)
        .await
        .map_err(|e| {
            error!(tenant_id = %tenant_id, "Failed to advance billing cursor: {}", e);
            BillingError::CursorStore(format!("failed to update cursor: {}", e))
        })?;

        Ok(())
    }
}
