//! Customer self-service backup service.
//!
//! Tenant-initiated backups: row-filtered dump, gzip, checksum of the
//! compressed artifact, stored locally behind a time-boxed unguessable
//! download token. These artifacts never leave the platform's disk, so no
//! encryption-at-rest layer is applied; the token plus expiry bound access.

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use sqlx::PgPool;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::customer_backup::CustomerBackupRecord;
use crate::services::crypto;
use crate::services::dump::DumpProducer;

/// Generate an opaque, non-guessable download token (256 bits, URL-safe).
pub fn generate_download_token() -> String {
    let bytes: [u8; 32] = rand::random();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// A token is usable strictly before its expiry instant.
fn token_live(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    matches!(expires_at, Some(expiry) if now < expiry)
}

struct ArtifactOutcome {
    local_path: PathBuf,
    checksum: String,
    plaintext_size: i64,
    compressed_size: i64,
}

/// Customer self-service backup service
pub struct CustomerBackupService {
    db: PgPool,
    dump: Arc<dyn DumpProducer>,
    backup_dir: PathBuf,
    scratch_dir: PathBuf,
    download_expiry: Duration,
}

impl CustomerBackupService {
    pub fn new(
        db: PgPool,
        dump: Arc<dyn DumpProducer>,
        backup_dir: PathBuf,
        scratch_dir: PathBuf,
        download_expiry_hours: i64,
    ) -> Self {
        Self {
            db,
            dump,
            backup_dir,
            scratch_dir,
            download_expiry: Duration::hours(download_expiry_hours),
        }
    }

    /// Create a self-service backup for a tenant.
    ///
    /// At most one backup per tenant per calendar day may exist in
    /// {pending, running, completed}; a second request gets `RateLimit`.
    pub async fn create_customer_backup(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<CustomerBackupRecord> {
        let tenant_exists: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM tenants WHERE id = $1 AND deleted_at IS NULL")
                .bind(tenant_id)
                .fetch_optional(&self.db)
                .await?;
        if tenant_exists.is_none() {
            return Err(AppError::NotFound(format!("Tenant not found: {}", tenant_id)));
        }

        let user_exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?;
        if user_exists.is_none() {
            return Err(AppError::NotFound(format!("User not found: {}", user_id)));
        }

        let today_count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM customer_backup_records
            WHERE tenant_id = $1
              AND status IN ('pending', 'running', 'completed')
              AND created_at >= date_trunc('day', NOW())
            "#,
        )
        .bind(tenant_id)
        .fetch_one(&self.db)
        .await?;
        if today_count > 0 {
            return Err(AppError::RateLimit(format!(
                "A backup for tenant {} already exists today",
                tenant_id
            )));
        }

        let name = format!(
            "self-backup-{}-{}",
            tenant_id,
            Utc::now().format("%Y%m%d-%H%M%S")
        );
        let token = generate_download_token();
        let record = sqlx::query_as::<_, CustomerBackupRecord>(
            r#"
            INSERT INTO customer_backup_records (tenant_id, initiated_by, name, download_token)
            VALUES ($1, $2, $3, $4)
            RETURNING id, tenant_id, initiated_by, name, status, local_file_path,
                      download_token, download_expires_at, downloaded_at, checksum,
                      plaintext_size, compressed_size, task_id, duration_ms,
                      error_message, created_at
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(&name)
        .bind(&token)
        .fetch_one(&self.db)
        .await?;
        tracing::info!(backup_id = %record.id, %tenant_id, "Starting customer backup");

        sqlx::query(
            "UPDATE customer_backup_records SET status = 'running' \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(record.id)
        .execute(&self.db)
        .await?;

        let started = Instant::now();
        let work_dir = self.scratch_dir.join("customer").join(record.id.to_string());
        let result = self.build_artifact(tenant_id, &record.name, &work_dir).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(backup_id = %record.id, error = %e, "Failed to clean scratch dir");
            }
        }

        match result {
            Ok(outcome) => {
                let expires_at = Utc::now() + self.download_expiry;
                sqlx::query(
                    r#"
                    UPDATE customer_backup_records
                    SET status = 'completed', local_file_path = $2, checksum = $3,
                        plaintext_size = $4, compressed_size = $5,
                        download_expires_at = $6, duration_ms = $7
                    WHERE id = $1 AND status = 'running'
                    "#,
                )
                .bind(record.id)
                .bind(outcome.local_path.to_string_lossy().as_ref())
                .bind(&outcome.checksum)
                .bind(outcome.plaintext_size)
                .bind(outcome.compressed_size)
                .bind(expires_at)
                .bind(duration_ms)
                .execute(&self.db)
                .await?;

                tracing::info!(
                    backup_id = %record.id,
                    checksum = %outcome.checksum,
                    duration_ms,
                    "Customer backup completed"
                );
                self.get_backup_info(record.id).await
            }
            Err(e) => {
                tracing::error!(backup_id = %record.id, error = %e, "Customer backup failed");
                sqlx::query(
                    r#"
                    UPDATE customer_backup_records
                    SET status = 'failed', error_message = $2, duration_ms = $3
                    WHERE id = $1 AND status NOT IN ('completed', 'failed')
                    "#,
                )
                .bind(record.id)
                .bind(e.to_string())
                .bind(duration_ms)
                .execute(&self.db)
                .await?;
                Err(e)
            }
        }
    }

    /// Get one customer backup record by id.
    pub async fn get_backup_info(&self, id: Uuid) -> Result<CustomerBackupRecord> {
        sqlx::query_as::<_, CustomerBackupRecord>(
            r#"
            SELECT id, tenant_id, initiated_by, name, status, local_file_path,
                   download_token, download_expires_at, downloaded_at, checksum,
                   plaintext_size, compressed_size, task_id, duration_ms,
                   error_message, created_at
            FROM customer_backup_records
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Customer backup not found: {}", id)))
    }

    /// Resolve a download token to the backup file path.
    ///
    /// Returns `None` for unknown, expired, or file-missing tokens alike, so
    /// callers render one uniform "link expired or invalid" response without
    /// revealing whether the token ever existed.
    pub async fn get_backup_file_path(&self, token: &str) -> Result<Option<PathBuf>> {
        let record = sqlx::query_as::<_, CustomerBackupRecord>(
            r#"
            SELECT id, tenant_id, initiated_by, name, status, local_file_path,
                   download_token, download_expires_at, downloaded_at, checksum,
                   plaintext_size, compressed_size, task_id, duration_ms,
                   error_message, created_at
            FROM customer_backup_records
            WHERE download_token = $1 AND status = 'completed'
            "#,
        )
        .bind(token)
        .fetch_optional(&self.db)
        .await?;

        let Some(record) = record else {
            return Ok(None);
        };
        if !token_live(record.download_expires_at, Utc::now()) {
            return Ok(None);
        }
        let Some(path) = record.local_file_path.map(PathBuf::from) else {
            return Ok(None);
        };
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        Ok(Some(path))
    }

    /// Record a download against a token. Returns false for unknown tokens.
    pub async fn mark_downloaded(&self, token: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE customer_backup_records SET downloaded_at = NOW() WHERE download_token = $1",
        )
        .bind(token)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete expired backup files and clear their paths.
    ///
    /// Idempotent: records whose path was already cleared are skipped, so a
    /// second run right after the first returns 0.
    pub async fn cleanup_expired_backups(&self) -> Result<u64> {
        let expired: Vec<(Uuid, String)> = sqlx::query_as(
            r#"
            SELECT id, local_file_path FROM customer_backup_records
            WHERE download_expires_at < NOW() AND local_file_path IS NOT NULL
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        let mut cleaned = 0u64;
        for (id, path) in expired {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(backup_id = %id, error = %e, "Failed to delete expired backup file");
                    continue;
                }
            }
            sqlx::query(
                "UPDATE customer_backup_records SET local_file_path = NULL WHERE id = $1",
            )
            .bind(id)
            .execute(&self.db)
            .await?;
            cleaned += 1;
            tracing::info!(backup_id = %id, "Cleaned expired customer backup");
        }

        Ok(cleaned)
    }

    async fn build_artifact(
        &self,
        tenant_id: Uuid,
        name: &str,
        work_dir: &std::path::Path,
    ) -> Result<ArtifactOutcome> {
        tokio::fs::create_dir_all(work_dir).await?;
        let dump_path = self.dump.produce_dump(tenant_id, work_dir).await?;

        let plaintext = tokio::fs::read(&dump_path).await?;
        let plaintext_size = plaintext.len() as i64;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&plaintext)?;
        let compressed = encoder.finish()?;

        // Customer artifacts are checksummed over the compressed bytes; there
        // is no encryption layer for local-only storage.
        let checksum = crypto::checksum(&compressed);
        let compressed_size = compressed.len() as i64;

        let tenant_dir = self.backup_dir.join(tenant_id.to_string());
        tokio::fs::create_dir_all(&tenant_dir).await?;
        let local_path = tenant_dir.join(format!("{}.sql.gz", name));
        tokio::fs::write(&local_path, &compressed).await?;

        Ok(ArtifactOutcome {
            local_path,
            checksum,
            plaintext_size,
            compressed_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_token_shape() {
        let token = generate_download_token();
        // 32 bytes, URL-safe base64 without padding
        assert_eq!(token.len(), 43);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_download_tokens_unique() {
        let a = generate_download_token();
        let b = generate_download_token();
        assert_ne!(a, b);
    }

    #[test]
    fn test_token_live_before_expiry() {
        let now = Utc::now();
        assert!(token_live(Some(now + Duration::hours(1)), now));
    }

    #[test]
    fn test_token_dead_at_and_after_expiry() {
        let now = Utc::now();
        // Exactly at expiry is already unusable
        assert!(!token_live(Some(now), now));
        assert!(!token_live(Some(now - Duration::seconds(1)), now));
        assert!(!token_live(None, now));
    }
}
