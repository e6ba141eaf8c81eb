//! Application configuration loaded from environment variables.

use crate::error::{AppError, Result};
use std::env;
use std::path::PathBuf;

/// Storage backend kind for one provider slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageKind {
    /// Local-filesystem-rooted object store
    Filesystem,
    /// S3-compatible object store (reserved; not yet wired)
    S3,
}

impl StorageKind {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "filesystem" => Ok(StorageKind::Filesystem),
            "s3" => Ok(StorageKind::S3),
            other => Err(AppError::Config(format!(
                "Unknown storage kind: {}",
                other
            ))),
        }
    }
}

/// Configuration for one object-storage provider slot.
#[derive(Debug, Clone)]
pub struct StorageProviderConfig {
    pub kind: StorageKind,
    /// Root directory (filesystem) or bucket name (s3)
    pub root: String,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Server bind address (host:port)
    pub bind_address: String,

    /// Log level
    pub log_level: String,

    /// Platform secret used for tenant key derivation
    pub platform_secret: String,

    /// Primary object-storage provider
    pub storage_primary: StorageProviderConfig,

    /// Secondary object-storage provider
    pub storage_secondary: StorageProviderConfig,

    /// Scratch directory for backup/restore intermediate files
    pub scratch_dir: PathBuf,

    /// Directory where customer self-service backups are stored locally
    pub customer_backup_dir: PathBuf,

    /// Timeout for the external dump utility, in seconds
    pub dump_timeout_secs: u64,

    /// Hours a customer backup download token stays valid
    pub download_expiry_hours: i64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| AppError::Config("DATABASE_URL not set".into()))?,
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            platform_secret: env::var("PLATFORM_SECRET")
                .map_err(|_| AppError::Config("PLATFORM_SECRET not set".into()))?,
            storage_primary: StorageProviderConfig {
                kind: StorageKind::parse(
                    &env::var("STORAGE_PRIMARY_KIND").unwrap_or_else(|_| "filesystem".into()),
                )?,
                root: env::var("STORAGE_PRIMARY_ROOT")
                    .unwrap_or_else(|_| "/var/lib/ledgerbook/storage/primary".into()),
            },
            storage_secondary: StorageProviderConfig {
                kind: StorageKind::parse(
                    &env::var("STORAGE_SECONDARY_KIND").unwrap_or_else(|_| "filesystem".into()),
                )?,
                root: env::var("STORAGE_SECONDARY_ROOT")
                    .unwrap_or_else(|_| "/var/lib/ledgerbook/storage/secondary".into()),
            },
            scratch_dir: PathBuf::from(
                env::var("BACKUP_SCRATCH_DIR")
                    .unwrap_or_else(|_| "/var/lib/ledgerbook/scratch".into()),
            ),
            customer_backup_dir: PathBuf::from(
                env::var("CUSTOMER_BACKUP_DIR")
                    .unwrap_or_else(|_| "/var/lib/ledgerbook/customer-backups".into()),
            ),
            dump_timeout_secs: env::var("DUMP_TIMEOUT_SECS")
                .unwrap_or_else(|_| "300".into())
                .parse()
                .unwrap_or(300),
            download_expiry_hours: env::var("DOWNLOAD_EXPIRY_HOURS")
                .unwrap_or_else(|_| "24".into())
                .parse()
                .unwrap_or(24),
        })
    }
}
