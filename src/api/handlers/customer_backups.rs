//! Customer self-service backup endpoints.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use uuid::Uuid;

use crate::api::dto::{
    CleanupResponse, CreateCustomerBackupRequest, CustomerBackupCreatedResponse,
};
use crate::api::SharedState;
use crate::error::Result;
use crate::models::customer_backup::CustomerBackupRecord;

/// Create a self-service backup for the calling tenant.
///
/// The response includes the download token; this is the only time it is
/// ever sent to the caller.
pub async fn create_backup(
    State(state): State<SharedState>,
    Json(req): Json<CreateCustomerBackupRequest>,
) -> Result<Json<CustomerBackupCreatedResponse>> {
    let record = state
        .customer_backups
        .create_customer_backup(req.tenant_id, req.initiated_by)
        .await?;
    Ok(Json(record.into()))
}

/// Get one customer backup record.
pub async fn get_backup(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CustomerBackupRecord>> {
    let record = state.customer_backups.get_backup_info(id).await?;
    Ok(Json(record))
}

/// Download a backup by bearer token.
///
/// Unknown, expired, and file-missing tokens all get the same 404 so the
/// response never reveals whether a token previously existed.
pub async fn download_backup(
    State(state): State<SharedState>,
    Path(token): Path<String>,
) -> Result<Response> {
    let Some(path) = state.customer_backups.get_backup_file_path(&token).await? else {
        return Ok(not_available());
    };

    let content = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(_) => return Ok(not_available()),
    };

    state.customer_backups.mark_downloaded(&token).await?;

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "backup.sql.gz".into());

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/gzip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        content,
    )
        .into_response())
}

/// Remove expired backup files; returns the number cleaned.
pub async fn cleanup_expired(
    State(state): State<SharedState>,
) -> Result<Json<CleanupResponse>> {
    let cleaned = state.customer_backups.cleanup_expired_backups().await?;
    Ok(Json(CleanupResponse { cleaned }))
}

fn not_available() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "code": "NOT_FOUND",
            "message": "Backup not available",
        })),
    )
        .into_response()
}
