//! Application error types and result alias.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::crypto::CryptoError;

/// Application result type alias
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Not found error
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Validation error (precondition not met)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Rate limit error (e.g. daily customer backup limit reached)
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// Conflict error (e.g. concurrent operation on the same tenant)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Cryptography error (key derivation, decrypt/authentication failure)
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Storage error against a specific provider
    #[error("Storage error: {0}")]
    Storage(String),

    /// Checksum mismatch on artifact validation
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Dump utility failure or empty dump output
    #[error("Dump error: {0}")]
    Dump(String),

    /// Unclassified subprocess/database failure during restore replay
    #[error("Operation error: {0}")]
    Operation(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Config(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR", msg.clone())
            }
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "Database operation failed".to_string(),
            ),
            AppError::Migration(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "MIGRATION_ERROR",
                "Database migration failed".to_string(),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::RateLimit(msg) => {
                (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", msg.clone())
            }
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::Crypto(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CRYPTO_ERROR",
                "Cryptographic operation failed".to_string(),
            ),
            AppError::Storage(msg) => (StatusCode::BAD_GATEWAY, "STORAGE_ERROR", msg.clone()),
            AppError::Integrity(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "INTEGRITY_ERROR",
                msg.clone(),
            ),
            AppError::Dump(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "DUMP_ERROR", msg.clone()),
            AppError::Operation(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "OPERATION_ERROR",
                msg.clone(),
            ),
            AppError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                "IO operation failed".to_string(),
            ),
            AppError::Json(_) => (
                StatusCode::BAD_REQUEST,
                "JSON_ERROR",
                "Invalid JSON".to_string(),
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        // Log the error
        tracing::error!(error = %self, code = code, "Request error");

        let body = Json(json!({
            "code": code,
            "message": message,
        }));

        (status, body).into_response()
    }
}
