//! Versioned configuration store
//!
//! Readers take an `Arc` of the published snapshot and never block writers.
//! Every mutation runs under one async mutex: it edits a private copy,
//! bumps the version, persists the copy, publishes it and queues it to every
//! registered slave before the mutex is released, so slaves receive
//! snapshots in version order.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};
use websql_api::{
    App, AppEntity, AppUpdate, ConfigSnapshot, DataNode, DataNodeUpdate, EntityRef, Job, JobUpdate,
    LocalInterceptor, LocalInterceptorUpdate, Query, QueryUpdate, RemoteInterceptor, RemoteInterceptorUpdate,
    Token, TokenUpdate,
};
use websql_common::{WebsqlError, new_id};
use websql_persistence::TenantProvisioner;

use crate::locator::ScriptLocator;
use crate::replication::{ReplicationHub, master_data_frame};

pub const LIST_COMPACT: &str = "compact";
pub const LIST_FULL: &str = "full";

/// A private copy of the snapshot, held together with the writer lock
struct Draft<'a> {
    guard: MutexGuard<'a, ()>,
    snapshot: ConfigSnapshot,
}

pub struct ConfigStore {
    current: RwLock<Arc<ConfigSnapshot>>,
    write_lock: Mutex<()>,
    data_file: Option<PathBuf>,
    hub: Arc<ReplicationHub>,
    provisioner: Arc<dyn TenantProvisioner>,
    locator: ScriptLocator,
}

fn app_ref<'a>(snapshot: &'a ConfigSnapshot, app_id: &str) -> anyhow::Result<&'a App> {
    snapshot
        .app(app_id)
        .ok_or_else(|| WebsqlError::validation(format!("App does not exist: {}", app_id)).into())
}

fn app_mut<'a>(snapshot: &'a mut ConfigSnapshot, app_id: &str) -> anyhow::Result<&'a mut App> {
    snapshot
        .app_mut(app_id)
        .ok_or_else(|| WebsqlError::validation(format!("App does not exist: {}", app_id)).into())
}

fn insert_entity<T: AppEntity>(items: &mut Vec<T>, mut entity: T, kind: &str) -> anyhow::Result<String> {
    if items.iter().any(|e| e.name() == entity.name()) {
        return Err(WebsqlError::validation(format!("{} existed: {}", kind, entity.name())).into());
    }
    if entity.id().trim().is_empty() {
        entity.set_id(new_id());
    } else if items.iter().any(|e| e.id() == entity.id()) {
        return Err(WebsqlError::validation(format!("{} id existed: {}", kind, entity.id())).into());
    }
    let id = entity.id().to_string();
    items.push(entity);
    Ok(id)
}

fn find_entity<'a, T: AppEntity>(items: &'a [T], id: &str, kind: &str) -> anyhow::Result<&'a T> {
    items
        .iter()
        .find(|e| e.id() == id)
        .ok_or_else(|| WebsqlError::not_found(format!("{} not found: {}", kind, id)).into())
}

/// Swaps in an edited entity, keeping names unique
fn replace_entity<T: AppEntity>(items: &mut [T], entity: T, kind: &str) -> anyhow::Result<()> {
    if items.iter().any(|e| e.id() != entity.id() && e.name() == entity.name()) {
        return Err(WebsqlError::validation(format!("{} existed: {}", kind, entity.name())).into());
    }
    let slot = items
        .iter_mut()
        .find(|e| e.id() == entity.id())
        .ok_or_else(|| WebsqlError::not_found(format!("{} not found: {}", kind, entity.id())))?;
    *slot = entity;
    Ok(())
}

fn remove_entity<T: AppEntity>(items: &mut Vec<T>, id: &str, kind: &str) -> anyhow::Result<T> {
    let index = items
        .iter()
        .position(|e| e.id() == id)
        .ok_or_else(|| WebsqlError::not_found(format!("{} not found: {}", kind, id)))?;
    Ok(items.remove(index))
}

fn check_cron(expression: &str) -> anyhow::Result<()> {
    cron::Schedule::from_str(expression)
        .map(|_| ())
        .map_err(|e| WebsqlError::validation(format!("Invalid cron expression {}: {}", expression, e)).into())
}

/// `compact`: names on one line; `full`: name and detail per line; otherwise one name per line
fn format_list<'a>(items: impl Iterator<Item = (&'a str, &'a str)>, mode: &str) -> String {
    let items: Vec<(&str, &str)> = items.collect();
    match mode.trim() {
        LIST_COMPACT => items.iter().map(|(name, _)| *name).collect::<Vec<_>>().join(" "),
        LIST_FULL => items
            .iter()
            .map(|(name, detail)| format!("{} {}", name, detail))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => items.iter().map(|(name, _)| *name).collect::<Vec<_>>().join("\n"),
    }
}

impl ConfigStore {
    pub fn new(
        data_file: Option<PathBuf>,
        hub: Arc<ReplicationHub>,
        provisioner: Arc<dyn TenantProvisioner>,
        locator: ScriptLocator,
    ) -> Self {
        Self {
            current: RwLock::new(Arc::new(ConfigSnapshot::default())),
            write_lock: Mutex::new(()),
            data_file,
            hub,
            provisioner,
            locator,
        }
    }

    /// Reads the snapshot file if present. A missing file leaves an empty config.
    pub async fn load(&self) -> anyhow::Result<()> {
        let Some(path) = &self.data_file else {
            return Ok(());
        };
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No configuration file, starting empty");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let snapshot: ConfigSnapshot = serde_json::from_str(&text)?;
        info!(
            path = %path.display(),
            version = snapshot.version,
            apps = snapshot.apps.len(),
            "Configuration loaded"
        );
        *self.current.write() = Arc::new(snapshot);
        Ok(())
    }

    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.current.read().clone()
    }

    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    pub fn data_file(&self) -> Option<&Path> {
        self.data_file.as_deref()
    }

    pub fn hub(&self) -> &Arc<ReplicationHub> {
        &self.hub
    }

    /// Installs a snapshot received from the master. No merge, no persistence.
    pub fn replace(&self, snapshot: ConfigSnapshot) {
        *self.current.write() = Arc::new(snapshot);
    }

    /// The current snapshot as a `MASTER_DATA` frame
    pub fn master_data_frame(&self) -> anyhow::Result<String> {
        master_data_frame(serde_json::to_string(&*self.snapshot())?)
    }

    async fn begin(&self) -> Draft<'_> {
        let guard = self.write_lock.lock().await;
        let snapshot = (*self.snapshot()).clone();
        Draft { guard, snapshot }
    }

    async fn commit(&self, draft: Draft<'_>) -> anyhow::Result<u64> {
        let Draft { guard, mut snapshot } = draft;
        snapshot.version += 1;
        self.publish(guard, snapshot).await
    }

    /// Persists, publishes and broadcasts while still holding the writer lock
    async fn publish(&self, guard: MutexGuard<'_, ()>, snapshot: ConfigSnapshot) -> anyhow::Result<u64> {
        let payload = serde_json::to_string(&snapshot)?;
        self.persist(&payload).await?;
        let frame = master_data_frame(payload)?;

        let version = snapshot.version;
        *self.current.write() = Arc::new(snapshot);
        let delivered = self.hub.broadcast(&frame);
        drop(guard);

        info!(version, slaves = delivered, "Configuration propagated");
        Ok(version)
    }

    async fn persist(&self, payload: &str) -> anyhow::Result<()> {
        let Some(path) = &self.data_file else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, payload).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Re-sends the current snapshot without changing it
    pub async fn propagate(&self) -> anyhow::Result<u64> {
        let draft = self.begin().await;
        self.publish(draft.guard, draft.snapshot).await
    }

    // Data nodes

    pub fn list_data_nodes(&self, mode: &str) -> String {
        let snapshot = self.snapshot();
        format_list(
            snapshot.data_nodes.iter().map(|n| (n.name.as_str(), n.host.as_str())),
            mode,
        )
    }

    pub async fn add_data_node(&self, mut node: DataNode) -> anyhow::Result<String> {
        let mut draft = self.begin().await;
        if draft.snapshot.data_nodes.iter().any(|n| n.name == node.name) {
            return Err(WebsqlError::validation(format!("Data node existed: {}", node.name)).into());
        }
        if node.id.trim().is_empty() {
            node.id = new_id();
        } else if draft.snapshot.data_node(&node.id).is_some() {
            return Err(WebsqlError::validation(format!("Data node id existed: {}", node.id)).into());
        }
        let id = node.id.clone();
        draft.snapshot.data_nodes.push(node);
        self.commit(draft).await?;
        info!(data_node = %id, "Data node added");
        Ok(id)
    }

    pub async fn update_data_node(&self, update: &DataNodeUpdate) -> anyhow::Result<DataNode> {
        let mut draft = self.begin().await;
        let nodes = &mut draft.snapshot.data_nodes;
        let index = nodes
            .iter()
            .position(|n| n.id == update.id)
            .ok_or_else(|| WebsqlError::not_found(format!("Data node not found: {}", update.id)))?;

        let mut node = nodes[index].clone();
        update.apply_to(&mut node)?;
        if nodes.iter().any(|n| n.id != node.id && n.name == node.name) {
            return Err(WebsqlError::validation(format!("Data node existed: {}", node.name)).into());
        }
        nodes[index] = node.clone();
        self.commit(draft).await?;
        Ok(node)
    }

    pub async fn remove_data_node(&self, id: &str) -> anyhow::Result<DataNode> {
        let mut draft = self.begin().await;
        if let Some(app) = draft.snapshot.apps.iter().find(|a| a.data_node_id == id) {
            return Err(WebsqlError::validation(format!("Data node is used by app: {}", app.name)).into());
        }
        let nodes = &mut draft.snapshot.data_nodes;
        let index = nodes
            .iter()
            .position(|n| n.id == id)
            .ok_or_else(|| WebsqlError::not_found(format!("Data node not found: {}", id)))?;
        let node = nodes.remove(index);
        self.commit(draft).await?;
        Ok(node)
    }

    // Apps

    pub fn list_apps(&self, mode: &str) -> String {
        let snapshot = self.snapshot();
        format_list(
            snapshot.apps.iter().map(|a| (a.name.as_str(), a.data_node_id.as_str())),
            mode,
        )
    }

    pub async fn add_app(&self, mut app: App) -> anyhow::Result<String> {
        let mut draft = self.begin().await;
        if draft.snapshot.apps.iter().any(|a| a.name == app.name) {
            return Err(WebsqlError::validation(format!("App existed: {}", app.name)).into());
        }
        let node = draft
            .snapshot
            .data_node(&app.data_node_id)
            .cloned()
            .ok_or_else(|| WebsqlError::validation(format!("Data node does not exist: {}", app.data_node_id)))?;
        if app.id.trim().is_empty() {
            app.id = new_id();
        } else if draft.snapshot.app(&app.id).is_some() {
            return Err(WebsqlError::validation(format!("App id existed: {}", app.id)).into());
        }

        self.provisioner.on_app_create_or_update(&app, &node).await?;

        let id = app.id.clone();
        draft.snapshot.apps.push(app);
        self.commit(draft).await?;
        info!(app_id = %id, "App added");
        Ok(id)
    }

    pub async fn update_app(&self, update: &AppUpdate) -> anyhow::Result<App> {
        let mut draft = self.begin().await;
        let mut app = draft
            .snapshot
            .app(&update.id)
            .cloned()
            .ok_or_else(|| WebsqlError::not_found(format!("App not found: {}", update.id)))?;
        update.apply_to(&mut app);

        if draft.snapshot.apps.iter().any(|a| a.id != app.id && a.name == app.name) {
            return Err(WebsqlError::validation(format!("App existed: {}", app.name)).into());
        }
        let node = draft
            .snapshot
            .data_node(&app.data_node_id)
            .cloned()
            .ok_or_else(|| WebsqlError::validation(format!("Data node does not exist: {}", app.data_node_id)))?;

        self.provisioner.on_app_create_or_update(&app, &node).await?;

        *app_mut(&mut draft.snapshot, &update.id)? = app.clone();
        self.commit(draft).await?;
        Ok(app)
    }

    pub async fn remove_app(&self, id: &str) -> anyhow::Result<App> {
        let mut draft = self.begin().await;
        let index = draft
            .snapshot
            .apps
            .iter()
            .position(|a| a.id == id)
            .ok_or_else(|| WebsqlError::not_found(format!("App not found: {}", id)))?;

        let app = &draft.snapshot.apps[index];
        match draft.snapshot.data_node(&app.data_node_id) {
            Some(node) => self.provisioner.on_app_remove(app, node).await?,
            None => warn!(app_id = %id, data_node = %app.data_node_id, "Data node missing, tenant database left in place"),
        }

        let app = draft.snapshot.apps.remove(index);
        self.commit(draft).await?;
        info!(app_id = %id, "App removed");
        Ok(app)
    }

    // Queries

    pub async fn add_query(&self, mut query: Query) -> anyhow::Result<String> {
        let mut draft = self.begin().await;
        let app_id = query.app_id.clone();
        let app_name = app_ref(&draft.snapshot, &app_id)?.name.clone();
        self.locator
            .reload(&app_name, &query.name, &mut query.script_path, &mut query.script_text)
            .await?;

        let id = insert_entity(&mut app_mut(&mut draft.snapshot, &app_id)?.queries, query, "Query")?;
        self.commit(draft).await?;
        Ok(id)
    }

    pub async fn update_query(&self, update: &QueryUpdate) -> anyhow::Result<()> {
        let mut draft = self.begin().await;
        let app = app_ref(&draft.snapshot, &update.app_id)?;
        let app_name = app.name.clone();
        let mut query = find_entity(&app.queries, &update.id, "Query")?.clone();
        update.apply_to(&mut query);
        self.locator
            .reload(&app_name, &query.name, &mut query.script_path, &mut query.script_text)
            .await?;

        replace_entity(&mut app_mut(&mut draft.snapshot, &update.app_id)?.queries, query, "Query")?;
        self.commit(draft).await?;
        Ok(())
    }

    pub async fn remove_query(&self, target: &EntityRef) -> anyhow::Result<()> {
        let mut draft = self.begin().await;
        remove_entity(&mut app_mut(&mut draft.snapshot, &target.app_id)?.queries, &target.id, "Query")?;
        self.commit(draft).await?;
        Ok(())
    }

    /// Refreshes every query script of an app. The version is left unchanged.
    pub async fn reload_all_queries(&self, app_id: &str) -> anyhow::Result<usize> {
        let mut draft = self.begin().await;
        let app = app_mut(&mut draft.snapshot, app_id)?;
        let app_name = app.name.clone();

        let mut reloaded = 0;
        for query in app.queries.iter_mut() {
            match self
                .locator
                .reload(&app_name, &query.name, &mut query.script_path, &mut query.script_text)
                .await
            {
                Ok(()) => reloaded += 1,
                Err(e) => warn!(app = %app_name, query = %query.name, error = %e, "Query reload failed"),
            }
        }

        self.publish(draft.guard, draft.snapshot).await?;
        info!(app = %app_name, reloaded, "Queries reloaded");
        Ok(reloaded)
    }

    // Jobs

    async fn reload_job(&self, app_name: &str, job: &mut Job) -> anyhow::Result<()> {
        self.locator
            .reload(app_name, &job.name, &mut job.script_path, &mut job.script_text)
            .await?;
        self.locator
            .reload_optional(
                app_name,
                &ScriptLocator::loop_name(&job.name),
                &mut job.loop_script_path,
                &mut job.loop_script_text,
            )
            .await
    }

    /// Job with freshly loaded script text, as used when a job starts
    pub async fn refreshed_job(&self, target: &EntityRef) -> anyhow::Result<Job> {
        let snapshot = self.snapshot();
        let app = app_ref(&snapshot, &target.app_id)?;
        let mut job = find_entity(&app.jobs, &target.id, "Job")?.clone();
        self.reload_job(&app.name, &mut job).await?;
        Ok(job)
    }

    pub async fn add_job(&self, mut job: Job) -> anyhow::Result<Job> {
        let mut draft = self.begin().await;
        let app_id = job.app_id.clone();
        let app_name = app_ref(&draft.snapshot, &app_id)?.name.clone();
        check_cron(&job.cron)?;
        self.reload_job(&app_name, &mut job).await?;

        let jobs = &mut app_mut(&mut draft.snapshot, &app_id)?.jobs;
        let id = insert_entity(jobs, job, "Job")?;
        let job = find_entity(jobs, &id, "Job")?.clone();
        self.commit(draft).await?;
        Ok(job)
    }

    pub async fn update_job(&self, update: &JobUpdate) -> anyhow::Result<Job> {
        let mut draft = self.begin().await;
        let app = app_ref(&draft.snapshot, &update.app_id)?;
        let app_name = app.name.clone();
        let mut job = find_entity(&app.jobs, &update.id, "Job")?.clone();
        update.apply_to(&mut job);
        check_cron(&job.cron)?;
        self.reload_job(&app_name, &mut job).await?;

        replace_entity(&mut app_mut(&mut draft.snapshot, &update.app_id)?.jobs, job.clone(), "Job")?;
        self.commit(draft).await?;
        Ok(job)
    }

    pub async fn remove_job(&self, target: &EntityRef) -> anyhow::Result<Job> {
        let mut draft = self.begin().await;
        let job = remove_entity(&mut app_mut(&mut draft.snapshot, &target.app_id)?.jobs, &target.id, "Job")?;
        self.commit(draft).await?;
        Ok(job)
    }

    // Tokens

    /// The new token id is the app id followed by a fresh id
    pub async fn add_token(&self, mut token: Token) -> anyhow::Result<String> {
        let mut draft = self.begin().await;
        let app_id = token.app_id.clone();
        let app = app_mut(&mut draft.snapshot, &app_id)?;
        if token.id.trim().is_empty() {
            token.id = format!("{}{}", app_id, new_id());
        }
        let id = insert_entity(&mut app.tokens, token, "Token")?;
        self.commit(draft).await?;
        Ok(id)
    }

    pub async fn update_token(&self, update: &TokenUpdate) -> anyhow::Result<()> {
        let mut draft = self.begin().await;
        let tokens = &mut app_mut(&mut draft.snapshot, &update.app_id)?.tokens;
        let mut token = find_entity(tokens, &update.id, "Token")?.clone();
        update.apply_to(&mut token);
        replace_entity(tokens, token, "Token")?;
        self.commit(draft).await?;
        Ok(())
    }

    pub async fn remove_token(&self, target: &EntityRef) -> anyhow::Result<()> {
        let mut draft = self.begin().await;
        remove_entity(&mut app_mut(&mut draft.snapshot, &target.app_id)?.tokens, &target.id, "Token")?;
        self.commit(draft).await?;
        Ok(())
    }

    // Local interceptors

    pub async fn add_local_interceptor(&self, li: LocalInterceptor) -> anyhow::Result<String> {
        let mut draft = self.begin().await;
        let app = app_mut(&mut draft.snapshot, &li.app_id.clone())?;
        let id = insert_entity(&mut app.local_interceptors, li, "Local interceptor")?;
        self.commit(draft).await?;
        Ok(id)
    }

    pub async fn update_local_interceptor(&self, update: &LocalInterceptorUpdate) -> anyhow::Result<()> {
        let mut draft = self.begin().await;
        let items = &mut app_mut(&mut draft.snapshot, &update.app_id)?.local_interceptors;
        let mut li = find_entity(items, &update.id, "Local interceptor")?.clone();
        update.apply_to(&mut li);
        replace_entity(items, li, "Local interceptor")?;
        self.commit(draft).await?;
        Ok(())
    }

    pub async fn remove_local_interceptor(&self, target: &EntityRef) -> anyhow::Result<()> {
        let mut draft = self.begin().await;
        let items = &mut app_mut(&mut draft.snapshot, &target.app_id)?.local_interceptors;
        remove_entity(items, &target.id, "Local interceptor")?;
        self.commit(draft).await?;
        Ok(())
    }

    // Remote interceptors

    pub async fn add_remote_interceptor(&self, ri: RemoteInterceptor) -> anyhow::Result<String> {
        let mut draft = self.begin().await;
        let app = app_mut(&mut draft.snapshot, &ri.app_id.clone())?;
        let id = insert_entity(&mut app.remote_interceptors, ri, "Remote interceptor")?;
        self.commit(draft).await?;
        Ok(id)
    }

    pub async fn update_remote_interceptor(&self, update: &RemoteInterceptorUpdate) -> anyhow::Result<()> {
        let mut draft = self.begin().await;
        let items = &mut app_mut(&mut draft.snapshot, &update.app_id)?.remote_interceptors;
        let mut ri = find_entity(items, &update.id, "Remote interceptor")?.clone();
        update.apply_to(&mut ri);
        replace_entity(items, ri, "Remote interceptor")?;
        self.commit(draft).await?;
        Ok(())
    }

    pub async fn remove_remote_interceptor(&self, target: &EntityRef) -> anyhow::Result<()> {
        let mut draft = self.begin().await;
        let items = &mut app_mut(&mut draft.snapshot, &target.app_id)?.remote_interceptors;
        remove_entity(items, &target.id, "Remote interceptor")?;
        self.commit(draft).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use websql_persistence::NoopProvisioner;

    fn store() -> ConfigStore {
        ConfigStore::new(
            None,
            Arc::new(ReplicationHub::new()),
            Arc::new(NoopProvisioner),
            ScriptLocator::new(Vec::new()),
        )
    }

    fn node(name: &str) -> DataNode {
        DataNode {
            name: name.to_string(),
            host: format!("{}.local", name),
            port: 3306,
            ..Default::default()
        }
    }

    async fn store_with_app() -> (ConfigStore, String) {
        let store = store();
        let dn = store.add_data_node(node("dn1")).await.unwrap();
        let app_id = store
            .add_app(App {
                name: "shop".to_string(),
                db_name: "shop".to_string(),
                data_node_id: dn,
                ..Default::default()
            })
            .await
            .unwrap();
        (store, app_id)
    }

    #[tokio::test]
    async fn test_duplicate_data_node_name() {
        let store = store();
        store.add_data_node(node("dn1")).await.unwrap();
        let err = store.add_data_node(node("dn1")).await.unwrap_err();
        assert_eq!(err.to_string(), "Data node existed: dn1");
        assert_eq!(store.version(), 1);
    }

    #[tokio::test]
    async fn test_supplied_ids_are_never_reused() {
        let (store, app_id) = store_with_app().await;
        let dn = store.snapshot().data_nodes[0].id.clone();
        let version = store.version();

        let mut other = node("dn2");
        other.id = dn.clone();
        let err = store.add_data_node(other).await.unwrap_err();
        assert_eq!(err.to_string(), format!("Data node id existed: {}", dn));

        let err = store
            .add_app(App {
                id: app_id.clone(),
                name: "other".to_string(),
                data_node_id: dn,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), format!("App id existed: {}", app_id));

        let query = |name: &str| Query {
            id: "q1".to_string(),
            name: name.to_string(),
            script_text: "SELECT 1".to_string(),
            app_id: app_id.clone(),
            ..Default::default()
        };
        assert_eq!(store.add_query(query("a")).await.unwrap(), "q1");
        let err = store.add_query(query("b")).await.unwrap_err();
        assert_eq!(err.to_string(), "Query id existed: q1");
        assert_eq!(store.version(), version + 1);
    }

    #[tokio::test]
    async fn test_app_requires_data_node() {
        let store = store();
        let err = store
            .add_app(App {
                name: "shop".to_string(),
                data_node_id: "missing".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Data node does not exist: missing");
        assert_eq!(store.version(), 0);
    }

    #[tokio::test]
    async fn test_referenced_data_node_cannot_be_removed() {
        let (store, _) = store_with_app().await;
        let dn = store.snapshot().data_nodes[0].id.clone();
        assert!(store.remove_data_node(&dn).await.is_err());
        assert_eq!(store.snapshot().data_nodes.len(), 1);
    }

    #[tokio::test]
    async fn test_update_skips_unset_fields() {
        let store = store();
        let id = store.add_data_node(node("dn1")).await.unwrap();
        let update: DataNodeUpdate = serde_json::from_value(serde_json::json!({
            "Id": id,
            "Host": "db.internal",
            "Note": "__not_set__",
            "Port": -1,
        }))
        .unwrap();
        let updated = store.update_data_node(&update).await.unwrap();
        assert_eq!(updated.host, "db.internal");
        assert_eq!(updated.port, 3306);
        assert_eq!(store.version(), 2);
    }

    #[tokio::test]
    async fn test_query_names_unique_per_app() {
        let (store, app_id) = store_with_app().await;
        let query = Query {
            name: "bump".to_string(),
            script_text: "UPDATE t SET n = n + 1".to_string(),
            app_id: app_id.clone(),
            ..Default::default()
        };
        store.add_query(query.clone()).await.unwrap();
        let err = store.add_query(query).await.unwrap_err();
        assert_eq!(err.to_string(), "Query existed: bump");

        let err = store
            .remove_query(&EntityRef {
                id: "nope".to_string(),
                app_id: app_id.clone(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Query not found: nope");
    }

    #[tokio::test]
    async fn test_query_without_script_rejected() {
        let (store, app_id) = store_with_app().await;
        let err = store
            .add_query(Query {
                name: "ghost".to_string(),
                app_id,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Failed to open query file"));
    }

    #[tokio::test]
    async fn test_job_cron_validated() {
        let (store, app_id) = store_with_app().await;
        let mut job = Job {
            name: "nightly".to_string(),
            cron: "not a cron".to_string(),
            script_text: "DELETE FROM t".to_string(),
            app_id,
            ..Default::default()
        };
        assert!(store.add_job(job.clone()).await.is_err());

        job.cron = "0 0 3 * * *".to_string();
        let added = store.add_job(job).await.unwrap();
        assert_eq!(added.id.len(), websql_common::ID_LEN);
    }

    #[tokio::test]
    async fn test_token_id_prefixed_with_app_id() {
        let (store, app_id) = store_with_app().await;
        let id = store
            .add_token(Token {
                name: "web".to_string(),
                mode: "*".to_string(),
                target: "*".to_string(),
                app_id: app_id.clone(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(id.starts_with(&app_id));
        assert_eq!(id.len(), 2 * websql_common::ID_LEN);
    }

    #[tokio::test]
    async fn test_list_modes() {
        let store = store();
        store.add_data_node(node("a")).await.unwrap();
        store.add_data_node(node("b")).await.unwrap();
        assert_eq!(store.list_data_nodes("compact"), "a b");
        assert_eq!(store.list_data_nodes("full"), "a a.local\nb b.local");
        assert_eq!(store.list_data_nodes(""), "a\nb");
    }

    #[tokio::test]
    async fn test_reload_all_keeps_version() {
        let (store, app_id) = store_with_app().await;
        store
            .add_query(Query {
                name: "q".to_string(),
                script_text: "SELECT 1".to_string(),
                app_id: app_id.clone(),
                ..Default::default()
            })
            .await
            .unwrap();
        let version = store.version();
        assert_eq!(store.reload_all_queries(&app_id).await.unwrap(), 1);
        assert_eq!(store.version(), version);
    }
}
