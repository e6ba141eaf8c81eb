//! Per-tenant advisory locking for backup and restore operations.
//!
//! Backups read a tenant's rows and restores rewrite them destructively, so
//! at most one such operation may run per tenant at a time. The lock is a
//! Postgres session-level advisory lock keyed by a hash of the tenant id,
//! held on a dedicated pooled connection for the operation's duration.

use sha2::{Digest, Sha256};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Derive the advisory lock key for a tenant.
fn lock_key(tenant_id: Uuid) -> i64 {
    let digest = Sha256::digest(format!("ledgerbook/tenant-lock/{}", tenant_id).as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

/// Guard holding a session-level advisory lock for one tenant.
///
/// Release explicitly via [`TenantLockGuard::release`] on every exit path.
/// If the guard is dropped without release, the underlying connection is
/// detached from the pool and closed so the server frees the lock anyway.
pub struct TenantLockGuard {
    conn: Option<PoolConnection<Postgres>>,
    tenant_id: Uuid,
    key: i64,
}

impl TenantLockGuard {
    /// Try to acquire the lock for a tenant without blocking.
    ///
    /// Returns `Conflict` when another backup or restore already holds it.
    pub async fn acquire(pool: &PgPool, tenant_id: Uuid, operation: &str) -> Result<Self> {
        let key = lock_key(tenant_id);
        let mut conn = pool.acquire().await?;

        let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut *conn)
            .await?;

        if !locked {
            return Err(AppError::Conflict(format!(
                "Another backup or restore is already running for tenant {} (requested: {})",
                tenant_id, operation
            )));
        }

        tracing::debug!(%tenant_id, operation, "Acquired tenant advisory lock");
        Ok(Self {
            conn: Some(conn),
            tenant_id,
            key,
        })
    }

    /// Release the lock on the same connection that acquired it.
    pub async fn release(mut self) -> Result<()> {
        if let Some(mut conn) = self.conn.take() {
            sqlx::query("SELECT pg_advisory_unlock($1)")
                .bind(self.key)
                .execute(&mut *conn)
                .await?;
            tracing::debug!(tenant_id = %self.tenant_id, "Released tenant advisory lock");
        }
        Ok(())
    }
}

impl Drop for TenantLockGuard {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            // Closing the physical connection makes the server free the
            // session lock; returning it to the pool would leak the lock.
            tracing::warn!(
                tenant_id = %self.tenant_id,
                "Tenant lock guard dropped without release; closing its connection"
            );
            drop(conn.detach());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_key_deterministic() {
        let tenant = Uuid::new_v4();
        assert_eq!(lock_key(tenant), lock_key(tenant));
    }

    #[test]
    fn test_lock_key_tenant_scoped() {
        assert_ne!(lock_key(Uuid::new_v4()), lock_key(Uuid::new_v4()));
    }
}
