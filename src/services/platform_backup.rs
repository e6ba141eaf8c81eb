//! Platform backup service.
//!
//! Orchestrates dump -> compress -> encrypt -> checksum -> dual-upload ->
//! record for administrator-triggered tenant and platform-wide backups.
//! Uploads go to both providers independently; the backup completes when at
//! least one provider accepted the artifact, tolerating a single-provider
//! outage without blocking the nightly cycle.

use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use sqlx::PgPool;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::backup::{BackupKind, BackupRecord, StorageLocation};
use crate::services::crypto::{self, BackupCrypto, TenantKey};
use crate::services::dump::{AdminDumpProducer, DumpProducer};
use crate::services::storage_gateway::{ObjectMetadata, Provider, StorageGateway};
use crate::services::tenant_lock::TenantLockGuard;

/// Encrypted artifact produced from a dump file.
#[derive(Debug)]
pub struct SealedArtifact {
    pub path: PathBuf,
    pub checksum: String,
    pub plaintext_size: i64,
    pub encrypted_size: i64,
}

/// Compress and encrypt a dump file, returning the sealed artifact and the
/// checksum of its encrypted bytes.
pub async fn seal_artifact(
    dump_path: &Path,
    key: &TenantKey,
    work_dir: &Path,
) -> Result<SealedArtifact> {
    let plaintext = tokio::fs::read(dump_path).await?;
    let plaintext_size = plaintext.len() as i64;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&plaintext)?;
    let compressed = encoder.finish()?;

    let encrypted = crypto::encrypt(&compressed, key);
    let checksum = crypto::checksum(&encrypted);
    let encrypted_size = encrypted.len() as i64;

    let path = work_dir.join(format!(
        "{}.gz.enc",
        dump_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "dump.sql".into())
    ));
    tokio::fs::write(&path, &encrypted).await?;

    Ok(SealedArtifact {
        path,
        checksum,
        plaintext_size,
        encrypted_size,
    })
}

struct PipelineOutcome {
    checksum: String,
    plaintext_size: i64,
    encrypted_size: i64,
    locations: Vec<StorageLocation>,
}

/// Platform backup service
pub struct PlatformBackupService {
    db: PgPool,
    gateway: Arc<StorageGateway>,
    crypto: BackupCrypto,
    tenant_dump: Arc<dyn DumpProducer>,
    admin_dump: Arc<AdminDumpProducer>,
    scratch_dir: PathBuf,
}

impl PlatformBackupService {
    pub fn new(
        db: PgPool,
        gateway: Arc<StorageGateway>,
        crypto: BackupCrypto,
        tenant_dump: Arc<dyn DumpProducer>,
        admin_dump: Arc<AdminDumpProducer>,
        scratch_dir: PathBuf,
    ) -> Self {
        Self {
            db,
            gateway,
            crypto,
            tenant_dump,
            admin_dump,
            scratch_dir,
        }
    }

    /// Run a full backup for one tenant.
    ///
    /// Tenant rows are dumped with the row-filtered producer, so the
    /// artifact contains exactly one tenant's data.
    pub async fn backup_tenant(&self, tenant_id: Uuid) -> Result<BackupRecord> {
        let tenant_name: Option<String> =
            sqlx::query_scalar("SELECT name FROM tenants WHERE id = $1 AND deleted_at IS NULL")
                .bind(tenant_id)
                .fetch_optional(&self.db)
                .await?;
        let tenant_name = tenant_name
            .ok_or_else(|| AppError::NotFound(format!("Tenant not found: {}", tenant_id)))?;

        let lock = TenantLockGuard::acquire(&self.db, tenant_id, "backup").await?;

        let name = format!("tenant-{}-{}", tenant_id, Utc::now().format("%Y%m%d-%H%M%S"));
        let record = self
            .create_record(BackupKind::Tenant, Some(tenant_id), &name)
            .await?;
        tracing::info!(backup_id = %record.id, %tenant_id, tenant = %tenant_name, "Starting tenant backup");

        let result = self.execute_backup(&record).await;

        if let Err(e) = lock.release().await {
            tracing::warn!(%tenant_id, error = %e, "Failed to release tenant lock");
        }
        result
    }

    /// Run a platform-wide backup over the full table allow-list.
    pub async fn backup_platform(&self) -> Result<BackupRecord> {
        let name = format!("platform-{}", Utc::now().format("%Y%m%d-%H%M%S"));
        let record = self.create_record(BackupKind::Platform, None, &name).await?;
        tracing::info!(backup_id = %record.id, "Starting platform-wide backup");

        self.execute_backup(&record).await
    }

    /// Create a new backup attempt for a previously failed one.
    ///
    /// Terminal records are never mutated; a retry is always a fresh record.
    pub async fn retry_backup(&self, backup_id: Uuid) -> Result<BackupRecord> {
        let old = self.get_backup_info(backup_id).await?;
        if !old.status.is_terminal() {
            return Err(AppError::Validation(format!(
                "Backup {} is still {}; only terminal backups can be retried",
                backup_id, old.status
            )));
        }
        match (old.backup_kind, old.tenant_id) {
            (BackupKind::Tenant, Some(tenant_id)) => self.backup_tenant(tenant_id).await,
            _ => self.backup_platform().await,
        }
    }

    /// List backups for a tenant, newest first.
    pub async fn list_tenant_backups(
        &self,
        tenant_id: Uuid,
        limit: i64,
    ) -> Result<Vec<BackupRecord>> {
        let records = sqlx::query_as::<_, BackupRecord>(
            r#"
            SELECT id, backup_kind, tenant_id, name, status, started_at, completed_at,
                   plaintext_size, encrypted_size, checksum, storage_locations,
                   duration_ms, error_message, created_at
            FROM backup_records
            WHERE tenant_id = $1
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

    /// Get one backup record by id.
    pub async fn get_backup_info(&self, id: Uuid) -> Result<BackupRecord> {
        sqlx::query_as::<_, BackupRecord>(
            r#"
            SELECT id, backup_kind, tenant_id, name, status, started_at, completed_at,
                   plaintext_size, encrypted_size, checksum, storage_locations,
                   duration_ms, error_message, created_at
            FROM backup_records
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Backup not found: {}", id)))
    }

    /// Re-download the artifact from one provider and compare its checksum
    /// to the recorded one.
    ///
    /// Asking about a provider with no recorded location is a hard error,
    /// not a `false` result.
    pub async fn verify_backup_integrity(
        &self,
        backup_id: Uuid,
        provider: Provider,
    ) -> Result<bool> {
        let (expected, actual) = self.recompute_remote_checksum(backup_id, provider).await?;
        let is_valid = actual == expected;
        if !is_valid {
            tracing::warn!(
                %backup_id, %provider, %expected, %actual,
                "Backup checksum mismatch"
            );
        }
        Ok(is_valid)
    }

    /// Download the stored artifact into scratch and recompute its checksum.
    /// Returns (recorded, recomputed); the scratch copy is always removed.
    pub async fn recompute_remote_checksum(
        &self,
        backup_id: Uuid,
        provider: Provider,
    ) -> Result<(String, String)> {
        let record = self.get_backup_info(backup_id).await?;
        let expected = record.checksum.clone().ok_or_else(|| {
            AppError::Validation(format!("Backup {} has no recorded checksum", backup_id))
        })?;
        let location = record.location_for(provider).ok_or_else(|| {
            AppError::Validation(format!(
                "Backup {} has no stored location on provider {}",
                backup_id, provider
            ))
        })?;

        let scratch = self
            .scratch_dir
            .join("verify")
            .join(format!("{}-{}.bin", backup_id, provider));

        let download = self
            .gateway
            .download(provider, &location.location, &scratch)
            .await;
        let actual = match download {
            Ok(()) => crypto::checksum_file(&scratch).map_err(AppError::Io),
            Err(e) => Err(e),
        };
        // Scratch file must not outlive the verification either way
        let _ = tokio::fs::remove_file(&scratch).await;
        Ok((expected, actual?))
    }

    // -- internals ----------------------------------------------------------

    async fn execute_backup(&self, record: &BackupRecord) -> Result<BackupRecord> {
        self.mark_running(record.id).await?;
        let started = Instant::now();
        let work_dir = self.scratch_dir.join(record.id.to_string());

        let result = self.run_pipeline(record, &work_dir).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        // Intermediate files are removed on every exit path
        if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(backup_id = %record.id, error = %e, "Failed to clean scratch dir");
            }
        }

        match result {
            Ok(outcome) => {
                tracing::info!(
                    backup_id = %record.id,
                    checksum = %outcome.checksum,
                    providers = outcome.locations.len(),
                    duration_ms,
                    "Backup completed"
                );
                self.mark_completed(record.id, &outcome, duration_ms).await?;
                self.get_backup_info(record.id).await
            }
            Err(e) => {
                tracing::error!(backup_id = %record.id, error = %e, duration_ms, "Backup failed");
                self.mark_failed(record.id, &e.to_string(), duration_ms).await?;
                Err(e)
            }
        }
    }

    async fn run_pipeline(&self, record: &BackupRecord, work_dir: &Path) -> Result<PipelineOutcome> {
        tokio::fs::create_dir_all(work_dir).await?;

        let (dump_path, key, key_prefix) = match (record.backup_kind, record.tenant_id) {
            (BackupKind::Tenant, Some(tenant_id)) => (
                self.tenant_dump.produce_dump(tenant_id, work_dir).await?,
                self.crypto.derive_tenant_key(tenant_id),
                format!("tenant-backups/{}", tenant_id),
            ),
            _ => {
                let path = work_dir.join(format!("{}.sql", record.name));
                self.admin_dump.dump_all_tables(&path).await?;
                (
                    path,
                    self.crypto.derive_platform_key(),
                    "platform-backups".to_string(),
                )
            }
        };

        let sealed = seal_artifact(&dump_path, &key, work_dir).await?;
        let object_key = format!("{}/{}.sql.gz.enc", key_prefix, record.name);
        let metadata = ObjectMetadata {
            tenant_id: record.tenant_id,
            backup_kind: match record.backup_kind {
                BackupKind::Tenant => "tenant".into(),
                BackupKind::Platform => "platform".into(),
            },
            checksum: sealed.checksum.clone(),
            created_at: Utc::now(),
        };

        // Upload to both providers independently, capturing each outcome.
        let mut locations = Vec::new();
        let mut failures = Vec::new();
        for provider in Provider::ALL {
            match self
                .gateway
                .upload(provider, &sealed.path, &object_key, &metadata)
                .await
            {
                Ok(location) => {
                    locations.push(StorageLocation {
                        provider,
                        location,
                        uploaded_at: Utc::now(),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        backup_id = %record.id,
                        %provider,
                        error = %e,
                        "Upload failed; continuing with remaining providers"
                    );
                    failures.push(format!("{}: {}", provider, e));
                }
            }
        }

        if locations.is_empty() {
            return Err(AppError::Storage(format!(
                "All storage providers rejected the artifact: {}",
                failures.join("; ")
            )));
        }

        Ok(PipelineOutcome {
            checksum: sealed.checksum,
            plaintext_size: sealed.plaintext_size,
            encrypted_size: sealed.encrypted_size,
            locations,
        })
    }

    async fn create_record(
        &self,
        kind: BackupKind,
        tenant_id: Option<Uuid>,
        name: &str,
    ) -> Result<BackupRecord> {
        let record = sqlx::query_as::<_, BackupRecord>(
            r#"
            INSERT INTO backup_records (backup_kind, tenant_id, name)
            VALUES ($1, $2, $3)
            RETURNING id, backup_kind, tenant_id, name, status, started_at, completed_at,
                      plaintext_size, encrypted_size, checksum, storage_locations,
                      duration_ms, error_message, created_at
            "#,
        )
        .bind(kind)
        .bind(tenant_id)
        .bind(name)
        .fetch_one(&self.db)
        .await?;

        Ok(record)
    }

    async fn mark_running(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE backup_records
            SET status = 'running', started_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        outcome: &PipelineOutcome,
        duration_ms: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE backup_records
            SET status = 'completed', completed_at = NOW(),
                checksum = $2, plaintext_size = $3, encrypted_size = $4,
                storage_locations = $5, duration_ms = $6
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(&outcome.checksum)
        .bind(outcome.plaintext_size)
        .bind(outcome.encrypted_size)
        .bind(serde_json::to_value(&outcome.locations)?)
        .bind(duration_ms)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str, duration_ms: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE backup_records
            SET status = 'failed', completed_at = NOW(),
                error_message = $2, duration_ms = $3
            WHERE id = $1 AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(duration_ms)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_seal_artifact_roundtrip() {
        let work = TempDir::new().unwrap();
        let dump = work.path().join("tenant.sql");
        let script = b"-- table: invoices\nINSERT INTO \"invoices\" (\"id\") VALUES (1);\n";
        tokio::fs::write(&dump, script).await.unwrap();

        let crypto = BackupCrypto::new("secret");
        let key = crypto.derive_tenant_key(Uuid::new_v4());
        let sealed = seal_artifact(&dump, &key, work.path()).await.unwrap();

        assert_eq!(sealed.plaintext_size, script.len() as i64);
        assert!(sealed.encrypted_size > 0);
        assert_eq!(sealed.checksum.len(), 64);

        // Decrypt + decompress recovers the exact script
        let encrypted = tokio::fs::read(&sealed.path).await.unwrap();
        assert_eq!(crypto::checksum(&encrypted), sealed.checksum);

        let compressed = crypto::decrypt(&encrypted, &key).unwrap();
        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut plaintext = Vec::new();
        decoder.read_to_end(&mut plaintext).unwrap();
        assert_eq!(plaintext, script);
    }

    #[tokio::test]
    async fn test_seal_artifact_wrong_tenant_key_cannot_open() {
        let work = TempDir::new().unwrap();
        let dump = work.path().join("tenant.sql");
        tokio::fs::write(&dump, b"INSERT INTO t VALUES (1);").await.unwrap();

        let crypto = BackupCrypto::new("secret");
        let sealed = seal_artifact(&dump, &crypto.derive_tenant_key(Uuid::new_v4()), work.path())
            .await
            .unwrap();

        let encrypted = tokio::fs::read(&sealed.path).await.unwrap();
        let other_key = crypto.derive_tenant_key(Uuid::new_v4());
        assert!(crypto::decrypt(&encrypted, &other_key).is_err());
    }
}
