//! WebSQL Server - HTTP surface, command channel and node startup
//!
//! One binary runs either as the master (owns the snapshot file, accepts
//! `/sys/cli` mutations, runs jobs, serves `/sys/ws`) or as a slave (follows
//! the master's snapshot and serves `/api` locally).

pub mod api;
pub mod error;
pub mod model;
pub mod service;
pub mod startup;
