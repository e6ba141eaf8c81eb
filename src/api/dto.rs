//! Request/response DTOs for the backup & restore API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::customer_backup::CustomerBackupRecord;
use crate::services::storage_gateway::Provider;

fn default_limit() -> i64 {
    50
}

const MAX_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    limit: i64,
}

impl ListQuery {
    /// Page size clamped to [1, 500]; out-of-range values never reach SQL.
    pub fn limit(&self) -> i64 {
        self.limit.clamp(1, MAX_LIMIT)
    }
}

#[derive(Debug, Deserialize)]
pub struct RestoreHistoryQuery {
    pub tenant_id: Option<Uuid>,
    #[serde(default = "default_limit")]
    limit: i64,
}

impl RestoreHistoryQuery {
    pub fn limit(&self) -> i64 {
        self.limit.clamp(1, MAX_LIMIT)
    }
}

#[derive(Debug, Deserialize)]
pub struct ProviderQuery {
    pub provider: Provider,
}

#[derive(Debug, Deserialize)]
pub struct VerifyBackupRequest {
    pub provider: Provider,
}

#[derive(Debug, Serialize)]
pub struct VerifyBackupResponse {
    pub backup_id: Uuid,
    pub provider: Provider,
    pub is_valid: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateCustomerBackupRequest {
    pub tenant_id: Uuid,
    pub initiated_by: Uuid,
}

/// Creation response carrying the download token.
///
/// The token is the only credential for the download endpoint and is
/// issued exactly once here; the record type itself never serializes it,
/// so status reads cannot leak it.
#[derive(Debug, Serialize)]
pub struct CustomerBackupCreatedResponse {
    #[serde(flatten)]
    pub record: CustomerBackupRecord,
    pub download_token: String,
}

impl From<CustomerBackupRecord> for CustomerBackupCreatedResponse {
    fn from(record: CustomerBackupRecord) -> Self {
        let download_token = record.download_token.clone();
        Self {
            record,
            download_token,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub cleaned: u64,
}

#[derive(Debug, Deserialize)]
pub struct RestoreTenantRequest {
    pub tenant_id: Uuid,
    pub backup_id: Uuid,
    pub provider: Provider,
    pub initiated_by: Uuid,
    #[serde(default)]
    pub skip_validation: bool,
}

#[derive(Debug, Deserialize)]
pub struct RestorePair {
    pub tenant_id: Uuid,
    pub backup_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct RestoreBulkRequest {
    pub pairs: Vec<RestorePair>,
    pub provider: Provider,
    pub initiated_by: Uuid,
    #[serde(default)]
    pub skip_validation: bool,
}

#[derive(Debug, Deserialize)]
pub struct RestoreAllRequest {
    pub provider: Provider,
    pub initiated_by: Uuid,
    pub as_of: Option<DateTime<Utc>>,
    #[serde(default)]
    pub skip_validation: bool,
}

#[derive(Debug, Deserialize)]
pub struct ValidateBackupRequest {
    pub backup_id: Uuid,
    pub provider: Provider,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::backup::BackupStatus;
    use serde_json::json;

    fn sample_record() -> CustomerBackupRecord {
        CustomerBackupRecord {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            initiated_by: Uuid::new_v4(),
            name: "self-backup".into(),
            status: BackupStatus::Completed,
            local_file_path: Some("/var/lib/ledgerbook/customer-backups/x.sql.gz".into()),
            download_token: "THE-TOKEN".into(),
            download_expires_at: Some(Utc::now()),
            downloaded_at: None,
            checksum: Some("ab".repeat(32)),
            plaintext_size: Some(10),
            compressed_size: Some(5),
            task_id: None,
            duration_ms: Some(12),
            error_message: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_creation_response_carries_token_once() {
        let record = sample_record();

        // Status reads never expose the token
        let read_json = serde_json::to_value(&record).unwrap();
        assert!(read_json.get("download_token").is_none());

        // The creation response is the one place the token is issued
        let created = CustomerBackupCreatedResponse::from(record);
        let created_json = serde_json::to_value(&created).unwrap();
        assert_eq!(created_json["download_token"], json!("THE-TOKEN"));
        assert_eq!(created_json["name"], json!("self-backup"));
    }

    #[test]
    fn test_list_query_limit_clamped() {
        let q: ListQuery = serde_json::from_value(json!({})).unwrap();
        assert_eq!(q.limit(), 50);

        let q: ListQuery = serde_json::from_value(json!({"limit": -5})).unwrap();
        assert_eq!(q.limit(), 1);

        let q: ListQuery = serde_json::from_value(json!({"limit": 0})).unwrap();
        assert_eq!(q.limit(), 1);

        let q: ListQuery = serde_json::from_value(json!({"limit": 100_000})).unwrap();
        assert_eq!(q.limit(), 500);
    }

    #[test]
    fn test_restore_history_query_limit_clamped() {
        let q: RestoreHistoryQuery =
            serde_json::from_value(json!({"limit": -1})).unwrap();
        assert_eq!(q.limit(), 1);
        assert!(q.tenant_id.is_none());
    }
}
