//! Data interceptor pipeline
//!
//! Hooks wrap every verb of the data operator. Global hooks run around
//! resource hooks: global-before, resource-before, the operation,
//! resource-after, global-after. Within a registry hooks run in ascending
//! sequence order.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::DatabaseTransaction;
use websql_api::{App, ConfigSnapshot};
use websql_common::{
    CaseMode, Row, TOKEN_CLIENT_IP, TOKEN_USER_EMAIL, Value, WebsqlError, normalize_resource_id,
};

use crate::executor::RowResults;

/// The operations a hook can wrap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Load,
    Create,
    Update,
    Duplicate,
    Delete,
    ListMap,
    ListArray,
    Exec,
}

impl Verb {
    /// Letter granting this verb in a token's mode string
    pub fn letter(self) -> char {
        match self {
            Verb::Create => 'c',
            Verb::Load => 'r',
            Verb::Update => 'u',
            Verb::Delete => 'd',
            Verb::ListMap | Verb::ListArray => 'l',
            Verb::Duplicate => 'p',
            Verb::Exec => 'x',
        }
    }

    /// Name used in webhook actions and interceptor action types
    pub fn action(self) -> &'static str {
        match self {
            Verb::Load => "load",
            Verb::Create => "create",
            Verb::Update => "update",
            Verb::Duplicate => "duplicate",
            Verb::Delete => "delete",
            Verb::ListMap | Verb::ListArray => "list",
            Verb::Exec => "exec",
        }
    }
}

/// Per-call state shared by the operator and its hooks
#[derive(Debug, Clone)]
pub struct CallContext {
    pub app_id: String,
    pub api_token: String,
    pub user_token: Option<String>,
    /// Set by the token hook from the verified user token
    pub user_email: Option<String>,
    pub client_ip: Option<String>,
    pub case: CaseMode,
    /// Snapshot rows into `old_data` before update and delete
    pub load: bool,
    pub old_data: Vec<Row>,
    /// Raw SQL fragment appended to the load query
    pub extra_filter: Option<String>,
    pub snapshot: Arc<ConfigSnapshot>,
}

impl CallContext {
    pub fn new(app_id: impl Into<String>, api_token: impl Into<String>, snapshot: Arc<ConfigSnapshot>) -> Self {
        CallContext {
            app_id: app_id.into(),
            api_token: api_token.into(),
            user_token: None,
            user_email: None,
            client_ip: None,
            case: CaseMode::Preserve,
            load: false,
            old_data: Vec::new(),
            extra_filter: None,
            snapshot,
        }
    }

    pub fn app(&self) -> anyhow::Result<&App> {
        self.snapshot
            .app(&self.app_id)
            .ok_or_else(|| WebsqlError::not_found("Invalid app.").into())
    }

    /// Tokens substituted into every script run on behalf of this call
    pub fn context_tokens(&self) -> Vec<(String, String)> {
        vec![
            (
                TOKEN_CLIENT_IP.to_string(),
                self.client_ip.clone().unwrap_or_default(),
            ),
            (
                TOKEN_USER_EMAIL.to_string(),
                self.user_email.clone().unwrap_or_default(),
            ),
        ]
    }
}

/// What a hook sees of the running call
pub struct HookScope<'a> {
    /// Table identifier or query name, as the caller supplied it
    pub resource_id: &'a str,
    pub verb: Verb,
    pub tx: &'a DatabaseTransaction,
    pub ctx: &'a mut CallContext,
}

/// Uncompiled list request; hooks may add filters before compilation
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub fields: String,
    pub filters: Vec<String>,
    pub sort: Vec<String>,
    pub group: Vec<String>,
    pub start: u64,
    pub limit: u64,
}

impl Default for ListQuery {
    fn default() -> Self {
        ListQuery {
            fields: "*".to_string(),
            filters: Vec::new(),
            sort: Vec::new(),
            group: Vec::new(),
            start: 0,
            limit: 25,
        }
    }
}

/// A named query about to be executed
#[derive(Debug, Clone, PartialEq)]
pub struct ExecCall {
    pub query_name: String,
    pub script: String,
    pub params: Vec<Vec<Value>>,
    pub query_params: Vec<(String, String)>,
    pub array: bool,
    pub public: bool,
}

/// Before/after hooks for every data verb. All methods default to no-ops.
#[allow(unused_variables)]
#[async_trait]
pub trait DataInterceptor: Send + Sync {
    async fn before_load(&self, scope: &mut HookScope<'_>, id: &str, fields: &mut String) -> anyhow::Result<()> {
        Ok(())
    }

    async fn after_load(&self, scope: &mut HookScope<'_>, id: &str, row: &mut Row) -> anyhow::Result<()> {
        Ok(())
    }

    async fn before_create(&self, scope: &mut HookScope<'_>, rows: &mut Vec<Row>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn after_create(
        &self,
        scope: &mut HookScope<'_>,
        rows: &[Row],
        ids: &mut Vec<String>,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn before_update(&self, scope: &mut HookScope<'_>, rows: &mut Vec<Row>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn after_update(
        &self,
        scope: &mut HookScope<'_>,
        rows: &[Row],
        affected: &mut Vec<u64>,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn before_duplicate(&self, scope: &mut HookScope<'_>, ids: &mut Vec<String>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn after_duplicate(
        &self,
        scope: &mut HookScope<'_>,
        ids: &[String],
        new_ids: &mut Vec<String>,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn before_delete(&self, scope: &mut HookScope<'_>, ids: &mut Vec<String>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn after_delete(
        &self,
        scope: &mut HookScope<'_>,
        ids: &[String],
        affected: &mut Vec<u64>,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn before_list_map(&self, scope: &mut HookScope<'_>, query: &mut ListQuery) -> anyhow::Result<()> {
        Ok(())
    }

    async fn after_list_map(
        &self,
        scope: &mut HookScope<'_>,
        query: &ListQuery,
        rows: &mut Vec<Row>,
        total: &mut i64,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn before_list_array(&self, scope: &mut HookScope<'_>, query: &mut ListQuery) -> anyhow::Result<()> {
        Ok(())
    }

    async fn after_list_array(
        &self,
        scope: &mut HookScope<'_>,
        query: &ListQuery,
        headers: &mut Vec<String>,
        data: &mut Vec<Vec<Value>>,
        total: &mut i64,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn before_exec(&self, scope: &mut HookScope<'_>, call: &mut ExecCall) -> anyhow::Result<()> {
        Ok(())
    }

    async fn after_exec(
        &self,
        scope: &mut HookScope<'_>,
        call: &ExecCall,
        results: &mut Vec<RowResults>,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

type Hooks = BTreeMap<i32, Arc<dyn DataInterceptor>>;

/// Hook registrations, filled at startup and shared read-only afterwards
#[derive(Default)]
pub struct InterceptorRegistry {
    global: Hooks,
    resources: HashMap<String, Hooks>,
}

impl InterceptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a hook for every resource. Reusing a sequence replaces the
    /// earlier hook.
    pub fn register_global(&mut self, seq: i32, hook: Arc<dyn DataInterceptor>) {
        self.global.insert(seq, hook);
    }

    /// Registers a hook for one table or query name
    pub fn register(&mut self, resource_id: &str, seq: i32, hook: Arc<dyn DataInterceptor>) {
        self.resources
            .entry(normalize_resource_id(resource_id))
            .or_default()
            .insert(seq, hook);
    }

    /// Resource hooks in ascending sequence
    pub fn lookup(&self, resource_id: &str) -> Vec<Arc<dyn DataInterceptor>> {
        self.resources
            .get(&normalize_resource_id(resource_id))
            .map(|hooks| hooks.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Global hooks in ascending sequence
    pub fn lookup_global(&self) -> Vec<Arc<dyn DataInterceptor>> {
        self.global.values().cloned().collect()
    }

    pub fn chain(&self, resource_id: &str) -> HookChain {
        HookChain {
            global: self.lookup_global(),
            resource: self.lookup(resource_id),
        }
    }
}

/// The hooks wrapping one call, resolved once up front
pub struct HookChain {
    global: Vec<Arc<dyn DataInterceptor>>,
    resource: Vec<Arc<dyn DataInterceptor>>,
}

impl HookChain {
    /// Global hooks, then resource hooks
    pub fn before(&self) -> impl Iterator<Item = &Arc<dyn DataInterceptor>> {
        self.global.iter().chain(self.resource.iter())
    }

    /// Resource hooks, then global hooks
    pub fn after(&self) -> impl Iterator<Item = &Arc<dyn DataInterceptor>> {
        self.resource.iter().chain(self.global.iter())
    }
}
