//! Administrative platform backup endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;

use crate::api::dto::{ListQuery, VerifyBackupRequest, VerifyBackupResponse};
use crate::api::SharedState;
use crate::error::Result;
use crate::models::backup::BackupRecord;

/// Trigger a backup for one tenant.
pub async fn trigger_tenant_backup(
    State(state): State<SharedState>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<BackupRecord>> {
    let record = state.backups.backup_tenant(tenant_id).await?;
    Ok(Json(record))
}

/// Trigger a platform-wide backup.
pub async fn trigger_platform_backup(
    State(state): State<SharedState>,
) -> Result<Json<BackupRecord>> {
    let record = state.backups.backup_platform().await?;
    Ok(Json(record))
}

/// Retry a terminal backup as a fresh attempt.
pub async fn retry_backup(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BackupRecord>> {
    let record = state.backups.retry_backup(id).await?;
    Ok(Json(record))
}

/// List backups for a tenant, newest first.
pub async fn list_tenant_backups(
    State(state): State<SharedState>,
    Path(tenant_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<BackupRecord>>> {
    let records = state.backups.list_tenant_backups(tenant_id, query.limit()).await?;
    Ok(Json(records))
}

/// Get one backup record.
pub async fn get_backup(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BackupRecord>> {
    let record = state.backups.get_backup_info(id).await?;
    Ok(Json(record))
}

/// Re-download and checksum a stored artifact on one provider.
pub async fn verify_backup(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(req): Json<VerifyBackupRequest>,
) -> Result<Json<VerifyBackupResponse>> {
    let is_valid = state.backups.verify_backup_integrity(id, req.provider).await?;
    Ok(Json(VerifyBackupResponse {
        backup_id: id,
        provider: req.provider,
        is_valid,
    }))
}
