//! Ledgerbook - Backend Library
//!
//! Tenant backup & restore subsystem of the Ledgerbook accounting platform:
//! platform-initiated encrypted backups replicated to two storage providers,
//! customer self-service local backups, and the restore orchestrator.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod telemetry;

pub use config::Config;
pub use error::{AppError, Result};
