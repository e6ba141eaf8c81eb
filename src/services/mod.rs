//! Business logic services for the backup & restore subsystem.

pub mod crypto;
pub mod customer_backup;
pub mod dump;
pub mod platform_backup;
pub mod restore;
pub mod storage_gateway;
pub mod tenant_lock;
