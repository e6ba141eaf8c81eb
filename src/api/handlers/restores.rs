//! Restore orchestration endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;

use crate::api::dto::{
    ProviderQuery, RestoreAllRequest, RestoreBulkRequest, RestoreHistoryQuery,
    RestoreTenantRequest, ValidateBackupRequest,
};
use crate::api::SharedState;
use crate::error::Result;
use crate::models::restore::RestoreRecord;
use crate::services::restore::{BulkRestoreReport, IntegrityReport, RestorePoint};

/// Validate a stored artifact without restoring anything.
pub async fn validate_backup(
    State(state): State<SharedState>,
    Json(req): Json<ValidateBackupRequest>,
) -> Result<Json<IntegrityReport>> {
    let report = state
        .restores
        .validate_backup_integrity(req.backup_id, req.provider)
        .await?;
    Ok(Json(report))
}

/// Restore one tenant from one backup.
pub async fn restore_tenant(
    State(state): State<SharedState>,
    Json(req): Json<RestoreTenantRequest>,
) -> Result<Json<RestoreRecord>> {
    let record = state
        .restores
        .restore_single_tenant(
            req.tenant_id,
            req.backup_id,
            req.provider,
            req.initiated_by,
            req.skip_validation,
        )
        .await?;
    Ok(Json(record))
}

/// Restore several tenant/backup pairs, returning the per-pair breakdown.
pub async fn restore_bulk(
    State(state): State<SharedState>,
    Json(req): Json<RestoreBulkRequest>,
) -> Result<Json<BulkRestoreReport>> {
    let pairs: Vec<(Uuid, Uuid)> = req
        .pairs
        .iter()
        .map(|p| (p.tenant_id, p.backup_id))
        .collect();
    let report = state
        .restores
        .restore_multiple_tenants(&pairs, req.provider, req.initiated_by, req.skip_validation)
        .await?;
    Ok(Json(report))
}

/// Restore every active tenant from its latest eligible backup.
pub async fn restore_all(
    State(state): State<SharedState>,
    Json(req): Json<RestoreAllRequest>,
) -> Result<Json<BulkRestoreReport>> {
    let report = state
        .restores
        .restore_all_tenants(req.provider, req.initiated_by, req.as_of, req.skip_validation)
        .await?;
    Ok(Json(report))
}

/// List restore attempts, optionally scoped to one tenant.
pub async fn list_history(
    State(state): State<SharedState>,
    Query(query): Query<RestoreHistoryQuery>,
) -> Result<Json<Vec<RestoreRecord>>> {
    let records = state
        .restores
        .list_restore_history(query.tenant_id, query.limit())
        .await?;
    Ok(Json(records))
}

/// Get one restore record.
pub async fn get_restore(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RestoreRecord>> {
    let record = state.restores.get_restore_info(id).await?;
    Ok(Json(record))
}

/// Completed backups restorable from one provider, newest first.
pub async fn list_restore_points(
    State(state): State<SharedState>,
    Path(tenant_id): Path<Uuid>,
    Query(query): Query<ProviderQuery>,
) -> Result<Json<Vec<RestorePoint>>> {
    let points = state
        .restores
        .get_available_restore_points(tenant_id, query.provider)
        .await?;
    Ok(Json(points))
}
