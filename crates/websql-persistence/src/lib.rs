//! WebSQL Persistence - tenant database access
//!
//! This crate provides:
//! - `ConnectionRouter`: tenant id to pooled connection, cached with idle expiry
//! - `TenantProvisioner`: database/user lifecycle hooks for apps

pub mod provisioner;
pub mod router;

// Re-export sea-orm for convenience
pub use sea_orm;

pub use provisioner::{MySqlProvisioner, NoopProvisioner, TenantProvisioner};
pub use router::{ConnectionRouter, PoolSettings, TenantHandle};
