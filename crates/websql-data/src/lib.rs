//! WebSQL Data - tenant data access
//!
//! This crate provides:
//! - `DataInterceptor` and `InterceptorRegistry`: ordered before/after hooks
//! - `ScriptBatchExecutor`: transactional multi-statement script execution
//! - `SqlDataOperator`: load/list/create/update/duplicate/delete/exec verbs
//! - Built-in token, local, remote, login and verification mail hooks

pub mod builtin;
pub mod executor;
pub mod filter;
pub mod interceptor;
pub mod mailer;
pub mod operator;
pub mod script;

pub use builtin::{AuthSettings, register_builtin};
pub use executor::{Batch, RowResults, ScriptBatchExecutor, StatementResult, finish};
pub use interceptor::{
    CallContext, DataInterceptor, ExecCall, HookChain, HookScope, InterceptorRegistry, ListQuery, Verb,
};
pub use mailer::{LogMailer, Mailer};
pub use operator::{ListArrayResult, ListMapResult, SqlDataOperator};
