//! Health check endpoint.

use axum::{extract::State, response::IntoResponse, Json};
use serde::Serialize;

use crate::api::SharedState;
use crate::services::storage_gateway::Provider;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub database: CheckStatus,
    pub storage_primary: CheckStatus,
    pub storage_secondary: CheckStatus,
}

#[derive(Serialize)]
pub struct CheckStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn healthy() -> CheckStatus {
    CheckStatus {
        status: "healthy".to_string(),
        message: None,
    }
}

fn unhealthy(message: String) -> CheckStatus {
    CheckStatus {
        status: "unhealthy".to_string(),
        message: Some(message),
    }
}

/// Liveness check covering the database and both storage providers.
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    let db_check = match sqlx::query("SELECT 1").fetch_one(&state.db).await {
        Ok(_) => healthy(),
        Err(e) => unhealthy(format!("Database connection failed: {}", e)),
    };

    let primary = match state.gateway.probe(Provider::Primary).await {
        Ok(()) => healthy(),
        Err(e) => unhealthy(e.to_string()),
    };
    let secondary = match state.gateway.probe(Provider::Secondary).await {
        Ok(()) => healthy(),
        Err(e) => unhealthy(e.to_string()),
    };

    let all_healthy = [&db_check, &primary, &secondary]
        .iter()
        .all(|c| c.status == "healthy");

    Json(HealthResponse {
        status: if all_healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            database: db_check,
            storage_primary: primary,
            storage_secondary: secondary,
        },
    })
}
