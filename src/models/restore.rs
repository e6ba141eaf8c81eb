//! Restore audit model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Restore status lifecycle: pending -> running -> completed | failed.
/// No transitions out of a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "restore_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RestoreStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for RestoreStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestoreStatus::Pending => write!(f, "pending"),
            RestoreStatus::Running => write!(f, "running"),
            RestoreStatus::Completed => write!(f, "completed"),
            RestoreStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Restore attempt record.
///
/// `pre_restore_snapshot` is captured before any destructive operation and
/// retained even when the restore fails before replay.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RestoreRecord {
    pub id: Uuid,
    pub source_backup_id: Uuid,
    pub tenant_id: Uuid,
    pub initiated_by: Uuid,
    /// Timestamp of the backup being restored
    pub restore_point: DateTime<Utc>,
    /// Map of table name -> row count captured before mutation (-1 on count failure)
    pub pre_restore_snapshot: Option<serde_json::Value>,
    /// Same shape, captured after replay
    pub post_restore_snapshot: Option<serde_json::Value>,
    pub status: RestoreStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}
