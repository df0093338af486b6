//! Application state shared by every handler

use std::sync::Arc;

use websql_core::{ConfigStore, ReplicationHub, ScriptLocator};
use websql_data::{InterceptorRegistry, LogMailer, SqlDataOperator, register_builtin};
use websql_jobs::JobScheduler;
use websql_persistence::{ConnectionRouter, MySqlProvisioner, NoopProvisioner, TenantProvisioner};

use super::config::Configuration;
use crate::service::CommandProcessor;
use crate::startup::ShutdownSignal;

/// Owned registries built once at startup and handed out by `Arc`
pub struct AppState {
    pub configuration: Configuration,
    pub node_id: String,
    pub store: Arc<ConfigStore>,
    pub router: Arc<ConnectionRouter>,
    pub operator: Arc<SqlDataOperator>,
    pub scheduler: Arc<JobScheduler>,
    pub commands: Arc<CommandProcessor>,
    pub shutdown: ShutdownSignal,
    /// Forwards `/sys/cli` calls from a slave to the master
    pub http_client: reqwest::Client,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("node_id", &self.node_id)
            .field("master", &self.configuration.master())
            .field("version", &self.store.version())
            .finish()
    }
}

impl AppState {
    /// Wires every component. The master also reads its snapshot file.
    pub async fn build(configuration: Configuration) -> anyhow::Result<AppState> {
        let is_master = configuration.is_master();

        let provisioner: Arc<dyn TenantProvisioner> = if configuration.provision_tenants() {
            Arc::new(MySqlProvisioner)
        } else {
            Arc::new(NoopProvisioner)
        };
        let roots = configuration.script_roots();
        let locator = if roots.is_empty() {
            ScriptLocator::default()
        } else {
            ScriptLocator::new(roots)
        };

        let store = Arc::new(ConfigStore::new(
            is_master.then(|| configuration.data_file()),
            Arc::new(ReplicationHub::new()),
            provisioner,
            locator,
        ));
        if is_master {
            store.load().await?;
        }

        Self::with_store(configuration, store)
    }

    /// Wires the runtime components around an existing store
    pub fn with_store(configuration: Configuration, store: Arc<ConfigStore>) -> anyhow::Result<AppState> {
        let router = Arc::new(ConnectionRouter::new(configuration.pool_settings()));

        let mut registry = InterceptorRegistry::new();
        register_builtin(
            &mut registry,
            &configuration.auth_settings(),
            Arc::new(LogMailer::new(configuration.mail_from())),
        )?;
        let operator = Arc::new(SqlDataOperator::new(Arc::new(registry), router.clone()));

        let scheduler = Arc::new(JobScheduler::new(store.clone(), router.clone()));
        let commands = Arc::new(CommandProcessor::new(
            store.clone(),
            scheduler.clone(),
            router.clone(),
            configuration.secret(),
        ));

        Ok(AppState {
            node_id: configuration.node_id(),
            configuration,
            store,
            router,
            operator,
            scheduler,
            commands,
            shutdown: ShutdownSignal::new(),
            http_client: reqwest::Client::new(),
        })
    }

    pub fn is_master(&self) -> bool {
        self.configuration.is_master()
    }
}
