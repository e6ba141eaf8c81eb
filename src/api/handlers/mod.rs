//! HTTP handlers.

pub mod backups;
pub mod customer_backups;
pub mod health;
pub mod restores;
