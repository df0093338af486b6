//! WebSQL Core - configuration ownership and distribution
//!
//! This crate provides:
//! - `ConfigStore`: the versioned snapshot, its mutation API and persistence
//! - `ScriptLocator`: script file lookup for queries and jobs
//! - `ReplicationHub`: the master's registry of connected slaves
//! - `SlaveReplicator`: the slave's reconnecting subscription to the master

pub mod locator;
pub mod replication;
pub mod store;

pub use locator::ScriptLocator;
pub use replication::{REGISTER_OK, ReplicationHub, SlaveReplicator, master_data_frame, register_reply};
pub use store::ConfigStore;
