//! Job start/stop/restart bookkeeping

use std::sync::Arc;

use websql_api::{App, DataNode, EntityRef, Job};
use websql_core::{ConfigStore, ReplicationHub, ScriptLocator};
use websql_jobs::JobScheduler;
use websql_persistence::{ConnectionRouter, NoopProvisioner, PoolSettings};

const YEARLY: &str = "0 0 0 1 1 *";

async fn setup(auto_start: i32) -> (JobScheduler, EntityRef) {
    let store = Arc::new(ConfigStore::new(
        None,
        Arc::new(ReplicationHub::new()),
        Arc::new(NoopProvisioner),
        ScriptLocator::new(Vec::new()),
    ));
    let dn = store
        .add_data_node(DataNode {
            name: "dn1".to_string(),
            host: "127.0.0.1".to_string(),
            port: 3306,
            ..Default::default()
        })
        .await
        .unwrap();
    let app_id = store
        .add_app(App {
            name: "shop".to_string(),
            db_name: "shop".to_string(),
            data_node_id: dn,
            ..Default::default()
        })
        .await
        .unwrap();
    let job = store
        .add_job(Job {
            name: "cleanup".to_string(),
            cron: YEARLY.to_string(),
            script_text: "DELETE FROM sessions WHERE EXPIRED = 1".to_string(),
            auto_start,
            app_id: app_id.clone(),
            ..Default::default()
        })
        .await
        .unwrap();

    let router = Arc::new(ConnectionRouter::new(PoolSettings::default()));
    let target = EntityRef { id: job.id, app_id };
    (JobScheduler::new(store, router), target)
}

#[tokio::test]
async fn test_start_twice_is_an_error() {
    let (scheduler, job) = setup(0).await;

    scheduler.start(&job).await.unwrap();
    let err = scheduler.start(&job).await.unwrap_err();
    assert!(err.to_string().contains("already running"));
    assert!(scheduler.is_running(&job.id));
    assert_eq!(scheduler.active_count(), 1);
}

#[tokio::test]
async fn test_restart_keeps_one_registration() {
    let (scheduler, job) = setup(0).await;

    scheduler.start(&job).await.unwrap();
    scheduler.restart(&job).await.unwrap();
    scheduler.restart(&job).await.unwrap();
    assert_eq!(scheduler.active_count(), 1);

    scheduler.stop(&job).unwrap();
    assert_eq!(scheduler.active_count(), 0);
    assert!(scheduler.stop(&job).is_err());
}

#[tokio::test]
async fn test_autostart() {
    let (scheduler, job) = setup(1).await;

    assert_eq!(scheduler.start_autostart_jobs().await, 1);
    assert!(scheduler.is_running(&job.id));

    scheduler.stop_all();
    assert_eq!(scheduler.active_count(), 0);
}

#[tokio::test]
async fn test_unknown_job() {
    let (scheduler, job) = setup(0).await;
    let missing = EntityRef {
        id: "nope".to_string(),
        app_id: job.app_id,
    };
    assert!(scheduler.start(&missing).await.is_err());
    assert_eq!(scheduler.active_count(), 0);
}
