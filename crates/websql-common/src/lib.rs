//! WebSQL Common - Shared types, errors, and utilities
//!
//! This crate provides the foundational types used across all WebSQL components:
//! - Error taxonomy (`WebsqlError`)
//! - Tagged row values and result key casing
//! - Id generation and SQL identifier normalization

pub mod error;
pub mod utils;
pub mod value;

pub use error::{WebsqlError, classify};
pub use utils::{
    is_identifier, mysql_safe, new_id, normalize_resource_id, quote_table_id, strip_backticks, table_name,
};
pub use value::{CaseMode, Row, Value};

/// Length of a generated id, also the tenant prefix length of an api token
pub const ID_LEN: usize = 32;

/// Prefix of every tenant database name
pub const TENANT_DB_PREFIX: &str = "nd_";

/// Context substitution token for the caller ip
pub const TOKEN_CLIENT_IP: &str = "__ip__";

/// Context substitution token for the resolved user email
pub const TOKEN_USER_EMAIL: &str = "__user_email__";

/// Primary key column shared by every exposed table
pub const ID_COLUMN: &str = "ID";
