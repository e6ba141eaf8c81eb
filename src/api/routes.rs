//! Route definitions for the API.

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers;
use super::SharedState;

/// Create the main API router
pub fn create_router(state: SharedState) -> Router {
    let backup_routes = Router::new()
        .route(
            "/tenants/{tenant_id}",
            post(handlers::backups::trigger_tenant_backup)
                .get(handlers::backups::list_tenant_backups),
        )
        .route("/platform", post(handlers::backups::trigger_platform_backup))
        .route("/{id}", get(handlers::backups::get_backup))
        .route("/{id}/retry", post(handlers::backups::retry_backup))
        .route("/{id}/verify", post(handlers::backups::verify_backup));

    let customer_backup_routes = Router::new()
        .route("/", post(handlers::customer_backups::create_backup))
        .route("/{id}", get(handlers::customer_backups::get_backup))
        .route(
            "/download/{token}",
            get(handlers::customer_backups::download_backup),
        )
        .route("/cleanup", post(handlers::customer_backups::cleanup_expired));

    let restore_routes = Router::new()
        .route("/", get(handlers::restores::list_history))
        .route("/validate", post(handlers::restores::validate_backup))
        .route("/tenant", post(handlers::restores::restore_tenant))
        .route("/bulk", post(handlers::restores::restore_bulk))
        .route("/all", post(handlers::restores::restore_all))
        .route("/{id}", get(handlers::restores::get_restore))
        .route("/points/{tenant_id}", get(handlers::restores::list_restore_points));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api/v1/backups", backup_routes)
        .nest("/api/v1/customer-backups", customer_backup_routes)
        .nest("/api/v1/restores", restore_routes)
        .with_state(state)
}
