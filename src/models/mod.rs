//! Database models (SQLx).

pub mod backup;
pub mod customer_backup;
pub mod restore;
