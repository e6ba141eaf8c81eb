//! Ledgerbook Backend - Main Entry Point

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower_http::trace::TraceLayer;

use ledgerbook_backend::{
    api,
    config::Config,
    db,
    error::{AppError, Result},
    services::{
        crypto::BackupCrypto,
        customer_backup::CustomerBackupService,
        dump::{AdminDumpProducer, SelfServiceDumpProducer},
        platform_backup::PlatformBackupService,
        restore::RestoreService,
        storage_gateway::StorageGateway,
    },
    telemetry,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    telemetry::init_tracing();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Starting Ledgerbook backup service");

    // Connect to database
    let db_pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Connected to database");

    // Run migrations
    sqlx::migrate!("./migrations").run(&db_pool).await?;
    tracing::info!("Database migrations complete");

    // Storage providers
    let gateway = Arc::new(
        StorageGateway::from_config(&config.storage_primary, &config.storage_secondary).await?,
    );
    tracing::info!("Storage gateway initialized");

    // Dump producers: row-filtered for tenant scopes, pg_dump for the platform
    let crypto = BackupCrypto::new(config.platform_secret.clone());
    let tenant_dump = Arc::new(SelfServiceDumpProducer::new(db_pool.clone()));
    let admin_dump = Arc::new(AdminDumpProducer::new(
        config.database_url.clone(),
        Duration::from_secs(config.dump_timeout_secs),
    ));

    let backups = Arc::new(PlatformBackupService::new(
        db_pool.clone(),
        gateway.clone(),
        crypto.clone(),
        tenant_dump.clone(),
        admin_dump,
        config.scratch_dir.clone(),
    ));
    let customer_backups = Arc::new(CustomerBackupService::new(
        db_pool.clone(),
        tenant_dump,
        config.customer_backup_dir.clone(),
        config.scratch_dir.clone(),
        config.download_expiry_hours,
    ));
    let restores = Arc::new(RestoreService::new(
        db_pool.clone(),
        gateway.clone(),
        crypto,
        backups.clone(),
        config.scratch_dir.clone(),
    ));

    let state = Arc::new(api::AppState {
        config: config.clone(),
        db: db_pool,
        gateway,
        backups,
        customer_backups,
        restores,
    });

    // Hourly sweep of expired customer backup files
    spawn_cleanup_loop(state.customer_backups.clone());

    let app = api::routes::create_router(state).layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config
        .bind_address
        .parse()
        .map_err(|e| AppError::Config(format!("Invalid bind address: {}", e)))?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn spawn_cleanup_loop(service: Arc<CustomerBackupService>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            match service.cleanup_expired_backups().await {
                Ok(0) => {}
                Ok(n) => tracing::info!("Cleaned up {} expired customer backups", n),
                Err(e) => tracing::warn!("Expired backup cleanup failed: {}", e),
            }
        }
    });
}
