//! Platform backup audit model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::services::storage_gateway::Provider;

/// Backup status lifecycle: pending -> running -> completed | failed.
///
/// Terminal states are set exactly once; a retry creates a new record
/// rather than mutating a terminal one.
#[derive(Debug, Clone, Copy, PartialEq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "backup_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl BackupStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BackupStatus::Completed | BackupStatus::Failed)
    }
}

impl std::fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupStatus::Pending => write!(f, "pending"),
            BackupStatus::Running => write!(f, "running"),
            BackupStatus::Completed => write!(f, "completed"),
            BackupStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Backup kind
#[derive(Debug, Clone, Copy, PartialEq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "backup_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    /// Single-tenant backup, row-filtered to one tenant
    Tenant,
    /// Platform-wide backup over the full table allow-list
    Platform,
}

/// One successful upload destination recorded on a completed backup.
///
/// Stored inside the `storage_locations` JSONB column, ordered by upload
/// completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageLocation {
    pub provider: Provider,
    pub location: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Platform backup record
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BackupRecord {
    pub id: Uuid,
    pub backup_kind: BackupKind,
    pub tenant_id: Option<Uuid>,
    pub name: String,
    pub status: BackupStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub plaintext_size: Option<i64>,
    pub encrypted_size: Option<i64>,
    pub checksum: Option<String>,
    pub storage_locations: serde_json::Value,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl BackupRecord {
    /// Parse the JSONB storage locations column.
    pub fn locations(&self) -> Vec<StorageLocation> {
        serde_json::from_value(self.storage_locations.clone()).unwrap_or_default()
    }

    /// Location recorded for the given provider, if any.
    pub fn location_for(&self, provider: Provider) -> Option<StorageLocation> {
        self.locations().into_iter().find(|l| l.provider == provider)
    }
}
