//! Job lifecycle: start, stop, restart and the per-job timer task

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use cron::Schedule;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::counter;
use sea_orm::TransactionTrait;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use websql_api::{EntityRef, Job};
use websql_common::WebsqlError;
use websql_core::ConfigStore;
use websql_data::{ScriptBatchExecutor, finish};
use websql_persistence::ConnectionRouter;

use crate::runner::execute_job;

/// What a run needs, shared by every timer task
struct JobRuntime {
    store: Arc<ConfigStore>,
    router: Arc<ConnectionRouter>,
    executor: ScriptBatchExecutor,
}

impl JobRuntime {
    async fn run_once(&self, job: &Job) -> anyhow::Result<usize> {
        let snapshot = self.store.snapshot();
        let app = snapshot
            .app(&job.app_id)
            .ok_or_else(|| WebsqlError::not_found(format!("App not found: {}", job.app_id)))?;
        let node = snapshot
            .data_node(&app.data_node_id)
            .ok_or_else(|| WebsqlError::not_found("Invalid data node."))?;

        let tenant = self.router.resolve(app, node).await?;
        let tx = tenant.conn.begin().await?;
        let result = execute_job(&self.executor, &tx, job).await;
        finish(tx, result).await
    }
}

/// Fires `job` on every upcoming cron time until the task is aborted
async fn trigger_loop(runtime: Arc<JobRuntime>, job: Job, schedule: Schedule) {
    for next in schedule.upcoming(Utc) {
        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;

        let run_runtime = runtime.clone();
        let run_job = job.clone();
        let run = tokio::spawn(async move { run_runtime.run_once(&run_job).await });

        match run.await {
            Ok(Ok(batches)) => {
                counter!("websql_job_runs_total", "status" => "ok").increment(1);
                debug!(job = %job.name, batches, "Job run finished");
            }
            Ok(Err(e)) => {
                counter!("websql_job_runs_total", "status" => "error").increment(1);
                error!(job = %job.name, app_id = %job.app_id, error = %e, "Job run failed");
            }
            Err(e) => {
                counter!("websql_job_runs_total", "status" => "panic").increment(1);
                error!(job = %job.name, app_id = %job.app_id, error = %e, "Job run panicked");
            }
        }
    }
    warn!(job = %job.name, "Cron schedule exhausted");
}

/// Running jobs keyed by job id. Only the master runs jobs.
pub struct JobScheduler {
    running: DashMap<String, JoinHandle<()>>,
    runtime: Arc<JobRuntime>,
}

impl JobScheduler {
    pub fn new(store: Arc<ConfigStore>, router: Arc<ConnectionRouter>) -> Self {
        Self {
            running: DashMap::new(),
            runtime: Arc::new(JobRuntime {
                store,
                router,
                executor: ScriptBatchExecutor::new(),
            }),
        }
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        self.running.contains_key(job_id)
    }

    pub fn active_count(&self) -> usize {
        self.running.len()
    }

    /// Loads fresh script text and registers the cron trigger
    pub async fn start(&self, target: &EntityRef) -> anyhow::Result<()> {
        if self.is_running(&target.id) {
            return Err(WebsqlError::validation(format!("Job is already running: {}", target.id)).into());
        }

        let job = self.runtime.store.refreshed_job(target).await?;
        let schedule = Schedule::from_str(&job.cron)
            .map_err(|e| WebsqlError::validation(format!("Invalid cron expression {}: {}", job.cron, e)))?;

        match self.running.entry(job.id.clone()) {
            Entry::Occupied(_) => {
                Err(WebsqlError::validation(format!("Job is already running: {}", target.id)).into())
            }
            Entry::Vacant(slot) => {
                info!(job = %job.name, app_id = %job.app_id, cron = %job.cron, "Job started");
                slot.insert(tokio::spawn(trigger_loop(self.runtime.clone(), job, schedule)));
                Ok(())
            }
        }
    }

    /// Removes the cron trigger. A run already in flight completes.
    pub fn stop(&self, target: &EntityRef) -> anyhow::Result<()> {
        match self.running.remove(&target.id) {
            Some((_, handle)) => {
                handle.abort();
                info!(job_id = %target.id, "Job stopped");
                Ok(())
            }
            None => Err(WebsqlError::validation(format!("Job is not running: {}", target.id)).into()),
        }
    }

    /// Stops the job if it is running, then starts it
    pub async fn restart(&self, target: &EntityRef) -> anyhow::Result<()> {
        if self.is_running(&target.id) {
            self.stop(target)?;
        }
        self.start(target).await
    }

    /// Starts every autostart job. Failures are logged and skipped.
    pub async fn start_autostart_jobs(&self) -> usize {
        let snapshot = self.runtime.store.snapshot();
        let mut started = 0;
        for job in snapshot.apps.iter().flat_map(|app| app.jobs.iter()).filter(|j| j.autostarts()) {
            let target = EntityRef {
                id: job.id.clone(),
                app_id: job.app_id.clone(),
            };
            match self.start(&target).await {
                Ok(()) => started += 1,
                Err(e) => warn!(job = %job.name, app_id = %job.app_id, error = %e, "Autostart failed"),
            }
        }
        info!(started, "Autostart jobs started");
        started
    }

    /// Stops every running job of an app
    pub fn stop_app_jobs(&self, app_id: &str, job_ids: impl IntoIterator<Item = String>) {
        for id in job_ids {
            let target = EntityRef {
                id,
                app_id: app_id.to_string(),
            };
            if self.is_running(&target.id) {
                let _ = self.stop(&target);
            }
        }
    }

    pub fn stop_all(&self) {
        let ids: Vec<String> = self.running.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, handle)) = self.running.remove(&id) {
                handle.abort();
            }
        }
        info!("All jobs stopped");
    }
}
