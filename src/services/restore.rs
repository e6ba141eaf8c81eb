//! Restore orchestrator.
//!
//! Validates artifact integrity, downloads/decrypts/decompresses a backup,
//! snapshots pre/post state, and replays the dump against the live database.
//! The delete+replay sequence runs in one transaction under the tenant
//! advisory lock: any statement error rolls everything back and the restore
//! is marked failed, never left half-applied.

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use serde::Serialize;
use sqlx::PgPool;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::backup::BackupRecord;
use crate::models::restore::RestoreRecord;
use crate::services::crypto::{BackupCrypto, TenantKey};
use crate::services::dump::{
    is_transaction_control, split_sql_statements, TenantScope, TENANT_TABLES,
};
use crate::services::platform_backup::PlatformBackupService;
use crate::services::storage_gateway::{Provider, StorageGateway};
use crate::services::tenant_lock::TenantLockGuard;

/// Decrypt and decompress a sealed artifact back into a plaintext SQL script.
pub async fn open_artifact(
    artifact_path: &Path,
    key: &TenantKey,
    out_path: &Path,
) -> Result<()> {
    let encrypted = tokio::fs::read(artifact_path).await?;
    let compressed = crate::services::crypto::decrypt(&encrypted, key)?;

    let mut decoder = GzDecoder::new(compressed.as_slice());
    let mut plaintext = Vec::new();
    decoder
        .read_to_end(&mut plaintext)
        .map_err(|e| AppError::Operation(format!("Artifact decompression failed: {}", e)))?;

    tokio::fs::write(out_path, &plaintext).await?;
    Ok(())
}

/// Result of a pre-replay integrity check. A mismatch is data, not an
/// exception, so callers can decide whether to proceed.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub backup_id: Uuid,
    pub provider: Provider,
    pub is_valid: bool,
    pub expected_checksum: String,
    pub actual_checksum: String,
}

/// Outcome for one tenant/backup pair in a bulk restore.
#[derive(Debug, Clone, Serialize)]
pub struct TenantRestoreOutcome {
    pub tenant_id: Uuid,
    pub backup_id: Uuid,
    pub success: bool,
    pub restore_id: Option<Uuid>,
    pub error: Option<String>,
}

/// A tenant left out of a restore-all run, with the reason.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedTenant {
    pub tenant_id: Uuid,
    pub reason: String,
}

/// Overall status of a bulk restore.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkRestoreStatus {
    Completed,
    PartialFailure,
}

/// Structured breakdown of a bulk restore: callers always get per-pair
/// results, never one opaque failure for the whole batch.
#[derive(Debug, Clone, Serialize)]
pub struct BulkRestoreReport {
    pub status: BulkRestoreStatus,
    pub total: usize,
    pub successful_restores: usize,
    pub failed_restores: usize,
    pub results: Vec<TenantRestoreOutcome>,
    pub skipped: Vec<SkippedTenant>,
}

/// One restorable backup for a tenant on a given provider.
#[derive(Debug, Clone, Serialize)]
pub struct RestorePoint {
    pub backup_id: Uuid,
    pub name: String,
    pub restore_point: DateTime<Utc>,
    pub checksum: Option<String>,
    pub encrypted_size: Option<i64>,
}

/// Restore orchestrator
pub struct RestoreService {
    db: PgPool,
    gateway: Arc<StorageGateway>,
    crypto: BackupCrypto,
    backups: Arc<PlatformBackupService>,
    scratch_dir: PathBuf,
}

impl RestoreService {
    pub fn new(
        db: PgPool,
        gateway: Arc<StorageGateway>,
        crypto: BackupCrypto,
        backups: Arc<PlatformBackupService>,
        scratch_dir: PathBuf,
    ) -> Self {
        Self {
            db,
            gateway,
            crypto,
            backups,
            scratch_dir,
        }
    }

    /// Check a stored artifact's checksum against the recorded one.
    pub async fn validate_backup_integrity(
        &self,
        backup_id: Uuid,
        provider: Provider,
    ) -> Result<IntegrityReport> {
        let (expected, actual) = self
            .backups
            .recompute_remote_checksum(backup_id, provider)
            .await?;
        Ok(IntegrityReport {
            backup_id,
            provider,
            is_valid: expected == actual,
            expected_checksum: expected,
            actual_checksum: actual,
        })
    }

    /// Restore one tenant from one backup.
    pub async fn restore_single_tenant(
        &self,
        tenant_id: Uuid,
        backup_id: Uuid,
        provider: Provider,
        initiated_by: Uuid,
        skip_validation: bool,
    ) -> Result<RestoreRecord> {
        let tenant_exists: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM tenants WHERE id = $1 AND deleted_at IS NULL")
                .bind(tenant_id)
                .fetch_optional(&self.db)
                .await?;
        if tenant_exists.is_none() {
            return Err(AppError::NotFound(format!("Tenant not found: {}", tenant_id)));
        }

        let backup = self.backups.get_backup_info(backup_id).await?;
        if backup.tenant_id != Some(tenant_id) {
            return Err(AppError::Validation(format!(
                "Backup {} does not belong to tenant {}",
                backup_id, tenant_id
            )));
        }

        // Integrity gate before anything destructive
        if !skip_validation {
            let report = self.validate_backup_integrity(backup_id, provider).await?;
            if !report.is_valid {
                return Err(AppError::Integrity(format!(
                    "Backup {} failed validation on {}: expected {}, got {}",
                    backup_id, provider, report.expected_checksum, report.actual_checksum
                )));
            }
        }

        let location = backup.location_for(provider).ok_or_else(|| {
            AppError::Validation(format!(
                "Backup {} has no stored location on provider {}",
                backup_id, provider
            ))
        })?;

        let work_dir = self.scratch_dir.join("restore").join(Uuid::new_v4().to_string());
        let result = self
            .run_restore(&backup, tenant_id, provider, &location.location, initiated_by, &work_dir)
            .await;

        // Scratch SQL is removed on every exit path
        if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(%backup_id, error = %e, "Failed to clean restore scratch dir");
            }
        }
        result
    }

    /// Restore several tenant/backup pairs, collecting per-pair outcomes.
    pub async fn restore_multiple_tenants(
        &self,
        pairs: &[(Uuid, Uuid)],
        provider: Provider,
        initiated_by: Uuid,
        skip_validation: bool,
    ) -> Result<BulkRestoreReport> {
        let mut results = Vec::with_capacity(pairs.len());
        let mut successful = 0usize;

        for &(tenant_id, backup_id) in pairs {
            match self
                .restore_single_tenant(tenant_id, backup_id, provider, initiated_by, skip_validation)
                .await
            {
                Ok(record) => {
                    successful += 1;
                    results.push(TenantRestoreOutcome {
                        tenant_id,
                        backup_id,
                        success: true,
                        restore_id: Some(record.id),
                        error: None,
                    });
                }
                Err(e) => {
                    tracing::error!(%tenant_id, %backup_id, error = %e, "Tenant restore failed");
                    results.push(TenantRestoreOutcome {
                        tenant_id,
                        backup_id,
                        success: false,
                        restore_id: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let failed = results.len() - successful;
        Ok(BulkRestoreReport {
            status: if failed == 0 {
                BulkRestoreStatus::Completed
            } else {
                BulkRestoreStatus::PartialFailure
            },
            total: results.len(),
            successful_restores: successful,
            failed_restores: failed,
            results,
            skipped: Vec::new(),
        })
    }

    /// Restore every active tenant from its most recent completed backup
    /// at-or-before `as_of` (overall latest when unset). Tenants without a
    /// matching backup are reported as skipped, not treated as fatal.
    pub async fn restore_all_tenants(
        &self,
        provider: Provider,
        initiated_by: Uuid,
        as_of: Option<DateTime<Utc>>,
        skip_validation: bool,
    ) -> Result<BulkRestoreReport> {
        let tenant_ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT id FROM tenants WHERE deleted_at IS NULL ORDER BY created_at")
                .fetch_all(&self.db)
                .await?;

        let mut pairs = Vec::new();
        let mut skipped = Vec::new();
        for tenant_id in tenant_ids {
            match self.latest_backup_for(tenant_id, provider, as_of).await? {
                Some(backup) => pairs.push((tenant_id, backup.id)),
                None => {
                    tracing::warn!(%tenant_id, ?as_of, "No restorable backup; skipping tenant");
                    skipped.push(SkippedTenant {
                        tenant_id,
                        reason: match as_of {
                            Some(ts) => format!("no completed backup on {} at or before {}", provider, ts),
                            None => format!("no completed backup on {}", provider),
                        },
                    });
                }
            }
        }

        let mut report = self
            .restore_multiple_tenants(&pairs, provider, initiated_by, skip_validation)
            .await?;
        report.skipped = skipped;
        Ok(report)
    }

    /// List restore attempts, optionally filtered by tenant, newest first.
    pub async fn list_restore_history(
        &self,
        tenant_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<RestoreRecord>> {
        let records = sqlx::query_as::<_, RestoreRecord>(
            r#"
            SELECT id, source_backup_id, tenant_id, initiated_by, restore_point,
                   pre_restore_snapshot, post_restore_snapshot, status,
                   started_at, completed_at, duration_ms, error_message, created_at
            FROM restore_records
            WHERE ($1::uuid IS NULL OR tenant_id = $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;
        Ok(records)
    }

    /// Get one restore record by id.
    pub async fn get_restore_info(&self, id: Uuid) -> Result<RestoreRecord> {
        sqlx::query_as::<_, RestoreRecord>(
            r#"
            SELECT id, source_backup_id, tenant_id, initiated_by, restore_point,
                   pre_restore_snapshot, post_restore_snapshot, status,
                   started_at, completed_at, duration_ms, error_message, created_at
            FROM restore_records
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Restore not found: {}", id)))
    }

    /// Completed backups restorable from the named provider, newest first.
    pub async fn get_available_restore_points(
        &self,
        tenant_id: Uuid,
        provider: Provider,
    ) -> Result<Vec<RestorePoint>> {
        let backups = sqlx::query_as::<_, BackupRecord>(
            r#"
            SELECT id, backup_kind, tenant_id, name, status, started_at, completed_at,
                   plaintext_size, encrypted_size, checksum, storage_locations,
                   duration_ms, error_message, created_at
            FROM backup_records
            WHERE tenant_id = $1 AND status = 'completed'
            ORDER BY started_at DESC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.db)
        .await?;

        Ok(backups
            .into_iter()
            .filter(|b| b.location_for(provider).is_some())
            .map(|b| RestorePoint {
                backup_id: b.id,
                restore_point: b.started_at.unwrap_or(b.created_at),
                name: b.name,
                checksum: b.checksum,
                encrypted_size: b.encrypted_size,
            })
            .collect())
    }

    // -- internals ----------------------------------------------------------

    async fn latest_backup_for(
        &self,
        tenant_id: Uuid,
        provider: Provider,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Option<BackupRecord>> {
        let backups = sqlx::query_as::<_, BackupRecord>(
            r#"
            SELECT id, backup_kind, tenant_id, name, status, started_at, completed_at,
                   plaintext_size, encrypted_size, checksum, storage_locations,
                   duration_ms, error_message, created_at
            FROM backup_records
            WHERE tenant_id = $1 AND status = 'completed'
              AND ($2::timestamptz IS NULL OR started_at <= $2)
            ORDER BY started_at DESC
            "#,
        )
        .bind(tenant_id)
        .bind(as_of)
        .fetch_all(&self.db)
        .await?;

        Ok(backups
            .into_iter()
            .find(|b| b.location_for(provider).is_some()))
    }

    async fn run_restore(
        &self,
        backup: &BackupRecord,
        tenant_id: Uuid,
        provider: Provider,
        location: &str,
        initiated_by: Uuid,
        work_dir: &Path,
    ) -> Result<RestoreRecord> {
        tokio::fs::create_dir_all(work_dir).await?;

        // Fetch and open the artifact before creating the audit record:
        // a download or decryption failure leaves no half-started restore.
        let artifact_path = work_dir.join("artifact.sql.gz.enc");
        self.gateway.download(provider, location, &artifact_path).await?;

        let key = self.crypto.derive_tenant_key(tenant_id);
        let script_path = work_dir.join("restore.sql");
        open_artifact(&artifact_path, &key, &script_path).await?;
        let script = tokio::fs::read_to_string(&script_path).await?;

        let restore_point = backup.started_at.unwrap_or(backup.created_at);
        let record = self
            .create_record(backup.id, tenant_id, initiated_by, restore_point)
            .await?;
        tracing::info!(
            restore_id = %record.id, %tenant_id, backup_id = %backup.id,
            "Starting tenant restore"
        );

        let started = Instant::now();
        let result = self.snapshot_and_replay(record.id, tenant_id, &script).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        match result {
            Ok(()) => {
                sqlx::query(
                    r#"
                    UPDATE restore_records
                    SET status = 'completed', completed_at = NOW(), duration_ms = $2
                    WHERE id = $1 AND status = 'running'
                    "#,
                )
                .bind(record.id)
                .bind(duration_ms)
                .execute(&self.db)
                .await?;
                tracing::info!(restore_id = %record.id, duration_ms, "Restore completed");
                self.get_restore_info(record.id).await
            }
            Err(e) => {
                // The pre-snapshot persisted earlier stays on the failed record
                tracing::error!(restore_id = %record.id, error = %e, "Restore failed");
                sqlx::query(
                    r#"
                    UPDATE restore_records
                    SET status = 'failed', completed_at = NOW(),
                        error_message = $2, duration_ms = $3
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

    async fn snapshot_and_replay(
        &self,
        restore_id: Uuid,
        tenant_id: Uuid,
        script: &str,
    ) -> Result<()> {
        // Pre-snapshot is captured and persisted before any destructive step
        let pre = self.snapshot_tenant_tables(tenant_id).await;
        sqlx::query(
            "UPDATE restore_records SET status = 'running', started_at = NOW(), \
             pre_restore_snapshot = $2 WHERE id = $1 AND status = 'pending'",
        )
        .bind(restore_id)
        .bind(&pre)
        .execute(&self.db)
        .await?;

        let lock = TenantLockGuard::acquire(&self.db, tenant_id, "restore").await?;
        let replay = self.replay_transaction(tenant_id, script).await;
        if let Err(e) = lock.release().await {
            tracing::warn!(%tenant_id, error = %e, "Failed to release tenant lock");
        }
        replay?;

        let post = self.snapshot_tenant_tables(tenant_id).await;
        sqlx::query("UPDATE restore_records SET post_restore_snapshot = $2 WHERE id = $1")
            .bind(restore_id)
            .bind(&post)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Delete existing tenant rows (child before parent) and replay the dump
    /// script, all inside one transaction. Any statement error rolls the
    /// whole restore back.
    async fn replay_transaction(&self, tenant_id: Uuid, script: &str) -> Result<()> {
        let mut tx = self.db.begin().await?;

        for table in TENANT_TABLES.iter().rev() {
            let delete_sql = match table.scope {
                TenantScope::Direct => {
                    format!("DELETE FROM \"{}\" WHERE tenant_id = $1", table.name)
                }
                TenantScope::ViaParent { parent, fk } => format!(
                    "DELETE FROM \"{}\" t USING \"{}\" p WHERE t.{} = p.id AND p.tenant_id = $1",
                    table.name, parent, fk
                ),
            };
            sqlx::query(&delete_sql)
                .bind(tenant_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::Operation(format!("Failed to clear table {}: {}", table.name, e))
                })?;
        }

        for (idx, statement) in split_sql_statements(script).into_iter().enumerate() {
            if is_transaction_control(&statement) {
                continue;
            }
            sqlx::query(&statement).execute(&mut *tx).await.map_err(|e| {
                AppError::Operation(format!("Replay failed at statement {}: {}", idx + 1, e))
            })?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Best-effort per-table row counts for one tenant. A failing count is
    /// recorded as -1, never fatal to the snapshot step.
    async fn snapshot_tenant_tables(&self, tenant_id: Uuid) -> serde_json::Value {
        let mut snapshot = serde_json::Map::new();
        for table in TENANT_TABLES {
            let count_sql = match table.scope {
                TenantScope::Direct => {
                    format!("SELECT COUNT(*) FROM \"{}\" WHERE tenant_id = $1", table.name)
                }
                TenantScope::ViaParent { parent, fk } => format!(
                    "SELECT COUNT(*) FROM \"{}\" t JOIN \"{}\" p ON t.{} = p.id \
                     WHERE p.tenant_id = $1",
                    table.name, parent, fk
                ),
            };
            let count: i64 = match sqlx::query_scalar(&count_sql)
                .bind(tenant_id)
                .fetch_one(&self.db)
                .await
            {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(table = table.name, error = %e, "Snapshot count failed");
                    -1
                }
            };
            snapshot.insert(table.name.to_string(), serde_json::json!(count));
        }
        serde_json::Value::Object(snapshot)
    }

    async fn create_record(
        &self,
        backup_id: Uuid,
        tenant_id: Uuid,
        initiated_by: Uuid,
        restore_point: DateTime<Utc>,
    ) -> Result<RestoreRecord> {
        let record = sqlx::query_as::<_, RestoreRecord>(
            r#"
            INSERT INTO restore_records (source_backup_id, tenant_id, initiated_by, restore_point)
            VALUES ($1, $2, $3, $4)
            RETURNING id, source_backup_id, tenant_id, initiated_by, restore_point,
                      pre_restore_snapshot, post_restore_snapshot, status,
                      started_at, completed_at, duration_ms, error_message, created_at
            "#,
        )
        .bind(backup_id)
        .bind(tenant_id)
        .bind(initiated_by)
        .bind(restore_point)
        .fetch_one(&self.db)
        .await?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::platform_backup::seal_artifact;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_artifact_recovers_script() {
        let work = TempDir::new().unwrap();
        let dump = work.path().join("tenant.sql");
        let script = "-- table: customers\nINSERT INTO \"customers\" (\"id\") VALUES (1);\n";
        tokio::fs::write(&dump, script).await.unwrap();

        let crypto = BackupCrypto::new("secret");
        let tenant = Uuid::new_v4();
        let key = crypto.derive_tenant_key(tenant);
        let sealed = seal_artifact(&dump, &key, work.path()).await.unwrap();

        let out = work.path().join("restored.sql");
        open_artifact(&sealed.path, &key, &out).await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&out).await.unwrap(), script);
    }

    #[tokio::test]
    async fn test_open_artifact_wrong_key_is_crypto_error() {
        let work = TempDir::new().unwrap();
        let dump = work.path().join("tenant.sql");
        tokio::fs::write(&dump, "INSERT INTO t VALUES (1);").await.unwrap();

        let crypto = BackupCrypto::new("secret");
        let sealed = seal_artifact(&dump, &crypto.derive_tenant_key(Uuid::new_v4()), work.path())
            .await
            .unwrap();

        let out = work.path().join("restored.sql");
        let err = open_artifact(&sealed.path, &crypto.derive_tenant_key(Uuid::new_v4()), &out)
            .await;
        assert!(matches!(err, Err(AppError::Crypto(_))));
    }

    #[test]
    fn test_bulk_report_partial_failure_shape() {
        let results = vec![
            TenantRestoreOutcome {
                tenant_id: Uuid::new_v4(),
                backup_id: Uuid::new_v4(),
                success: true,
                restore_id: Some(Uuid::new_v4()),
                error: None,
            },
            TenantRestoreOutcome {
                tenant_id: Uuid::new_v4(),
                backup_id: Uuid::new_v4(),
                success: false,
                restore_id: None,
                error: Some("Backup not found".into()),
            },
        ];
        let successful = results.iter().filter(|r| r.success).count();
        let failed = results.len() - successful;
        let report = BulkRestoreReport {
            status: if failed == 0 {
                BulkRestoreStatus::Completed
            } else {
                BulkRestoreStatus::PartialFailure
            },
            total: results.len(),
            successful_restores: successful,
            failed_restores: failed,
            results,
            skipped: Vec::new(),
        };

        assert_eq!(report.status, BulkRestoreStatus::PartialFailure);
        assert_eq!(report.successful_restores, 1);
        assert_eq!(report.failed_restores, 1);
        assert_eq!(report.results.len(), 2);
    }
}
