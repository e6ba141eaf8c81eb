//! Customer self-service backup audit model.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::backup::BackupStatus;

/// Customer self-service backup record.
///
/// The download token is an opaque bearer credential: it is usable only
/// while `now < download_expires_at` and `local_file_path` still points at
/// an existing file. `local_file_path` is cleared by expiry cleanup.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CustomerBackupRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub initiated_by: Uuid,
    pub name: String,
    pub status: BackupStatus,
    pub local_file_path: Option<String>,
    #[serde(skip_serializing)]
    pub download_token: String,
    pub download_expires_at: Option<DateTime<Utc>>,
    pub downloaded_at: Option<DateTime<Utc>>,
    pub checksum: Option<String>,
    pub plaintext_size: Option<i64>,
    pub compressed_size: Option<i64>,
    pub task_id: Option<Uuid>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}
