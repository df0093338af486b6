//! Command channel processing on the master

use std::sync::Arc;

use tracing::{info, warn};
use websql_api::{Command, CommandEnvelope, EntityRef};
use websql_common::WebsqlError;
use websql_core::ConfigStore;
use websql_jobs::JobScheduler;
use websql_persistence::ConnectionRouter;

/// Applies decoded commands to the config store and the job scheduler.
///
/// Listing and show commands answer with text, every mutation answers with
/// an empty string.
pub struct CommandProcessor {
    store: Arc<ConfigStore>,
    scheduler: Arc<JobScheduler>,
    router: Arc<ConnectionRouter>,
    secret: String,
}

impl CommandProcessor {
    pub fn new(
        store: Arc<ConfigStore>,
        scheduler: Arc<JobScheduler>,
        router: Arc<ConnectionRouter>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            store,
            scheduler,
            router,
            secret: secret.into(),
        }
    }

    /// Checks the shared secret, then decodes and executes the envelope
    pub async fn process(&self, envelope: &CommandEnvelope) -> anyhow::Result<String> {
        if envelope.requires_secret() && envelope.secret != self.secret {
            warn!(kind = %envelope.kind, "Command rejected: bad secret");
            return Err(WebsqlError::auth("Failed to validate secret.").into());
        }
        let command = Command::decode(envelope)?;
        if command.is_mutation() {
            info!(kind = %envelope.kind, "Applying command");
        }
        self.execute(command).await
    }

    pub async fn execute(&self, command: Command) -> anyhow::Result<String> {
        match command {
            Command::ListDataNodes(mode) => Ok(self.store.list_data_nodes(&mode)),
            Command::AddDataNode(node) => {
                self.store.add_data_node(node).await?;
                Ok(String::new())
            }
            Command::UpdateDataNode(update) => {
                let node = self.store.update_data_node(&update).await?;
                let snapshot = self.store.snapshot();
                for app in snapshot.apps.iter().filter(|a| a.data_node_id == node.id) {
                    self.router.invalidate(&app.id).await;
                }
                Ok(String::new())
            }
            Command::RemoveDataNode(id) => {
                self.store.remove_data_node(&id).await?;
                Ok(String::new())
            }

            Command::ListApps(mode) => Ok(self.store.list_apps(&mode)),
            Command::AddApp(app) => {
                self.store.add_app(app).await?;
                Ok(String::new())
            }
            Command::UpdateApp(update) => {
                let app = self.store.update_app(&update).await?;
                self.router.invalidate(&app.id).await;
                Ok(String::new())
            }
            Command::RemoveApp(id) => {
                let app = self.store.remove_app(&id).await?;
                self.scheduler
                    .stop_app_jobs(&app.id, app.jobs.iter().map(|j| j.id.clone()));
                self.router.invalidate(&app.id).await;
                Ok(String::new())
            }

            Command::AddQuery(query) => {
                self.store.add_query(query).await?;
                Ok(String::new())
            }
            Command::UpdateQuery(update) => {
                self.store.update_query(&update).await?;
                Ok(String::new())
            }
            Command::RemoveQuery(target) => {
                self.store.remove_query(&target).await?;
                Ok(String::new())
            }
            Command::ReloadAllQueries(app_id) => {
                let reloaded = self.store.reload_all_queries(&app_id).await?;
                info!(app_id = %app_id, reloaded, "Queries reloaded");
                Ok(String::new())
            }

            Command::AddJob(job) => {
                let job = self.store.add_job(job).await?;
                if job.autostarts() {
                    self.scheduler.start(&job_ref(&job.id, &job.app_id)).await?;
                }
                Ok(String::new())
            }
            Command::UpdateJob(update) => {
                let job = self.store.update_job(&update).await?;
                if self.scheduler.is_running(&job.id) {
                    self.scheduler.restart(&job_ref(&job.id, &job.app_id)).await?;
                }
                Ok(String::new())
            }
            Command::RemoveJob(target) => {
                if self.scheduler.is_running(&target.id) {
                    self.scheduler.stop(&target)?;
                }
                self.store.remove_job(&target).await?;
                Ok(String::new())
            }
            Command::StartJob(target) => {
                self.scheduler.start(&target).await?;
                Ok(String::new())
            }
            Command::RestartJob(target) => {
                self.scheduler.restart(&target).await?;
                Ok(String::new())
            }
            Command::StopJob(target) => {
                self.scheduler.stop(&target)?;
                Ok(String::new())
            }

            Command::AddToken(token) => {
                self.store.add_token(token).await?;
                Ok(String::new())
            }
            Command::UpdateToken(update) => {
                self.store.update_token(&update).await?;
                Ok(String::new())
            }
            Command::RemoveToken(target) => {
                self.store.remove_token(&target).await?;
                Ok(String::new())
            }

            Command::AddLocalInterceptor(li) => {
                self.store.add_local_interceptor(li).await?;
                Ok(String::new())
            }
            Command::UpdateLocalInterceptor(update) => {
                self.store.update_local_interceptor(&update).await?;
                Ok(String::new())
            }
            Command::RemoveLocalInterceptor(target) => {
                self.store.remove_local_interceptor(&target).await?;
                Ok(String::new())
            }

            Command::AddRemoteInterceptor(ri) => {
                self.store.add_remote_interceptor(ri).await?;
                Ok(String::new())
            }
            Command::UpdateRemoteInterceptor(update) => {
                self.store.update_remote_interceptor(&update).await?;
                Ok(String::new())
            }
            Command::RemoveRemoteInterceptor(target) => {
                self.store.remove_remote_interceptor(&target).await?;
                Ok(String::new())
            }

            Command::ShowMaster => Ok(serde_json::to_string(self.store.snapshot().as_ref())?),
            Command::ShowApiNodes => Ok(serde_json::to_string(&self.store.hub().api_nodes())?),
            Command::Propagate => {
                self.store.propagate().await?;
                Ok(String::new())
            }

            Command::Register(_) | Command::MasterData(_) => {
                Err(WebsqlError::validation("Replication frames are not accepted on the command channel.").into())
            }
        }
    }
}

fn job_ref(id: &str, app_id: &str) -> EntityRef {
    EntityRef {
        id: id.to_string(),
        app_id: app_id.to_string(),
    }
}
