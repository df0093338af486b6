//! WebSQL API - wire models
//!
//! This crate provides:
//! - Configuration entities and the versioned `ConfigSnapshot`
//! - Update payloads with "not set" sentinel handling
//! - The command envelope and its typed `Command` union
//! - REST request/response models

pub mod command;
pub mod model;
pub mod rest;

pub use command::{Command, CommandEnvelope, EntityRef};
pub use model::*;
