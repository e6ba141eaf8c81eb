//! API module - HTTP handlers and routes.

pub mod dto;
pub mod handlers;
pub mod routes;

use crate::config::Config;
use crate::services::customer_backup::CustomerBackupService;
use crate::services::platform_backup::PlatformBackupService;
use crate::services::restore::RestoreService;
use crate::services::storage_gateway::StorageGateway;
use sqlx::PgPool;
use std::sync::Arc;

/// Application state shared across handlers
pub struct AppState {
    pub config: Config,
    pub db: PgPool,
    pub gateway: Arc<StorageGateway>,
    pub backups: Arc<PlatformBackupService>,
    pub customer_backups: Arc<CustomerBackupService>,
    pub restores: Arc<RestoreService>,
}

pub type SharedState = Arc<AppState>;
