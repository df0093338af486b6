//! Snapshot propagation from the master store to persisted file and slaves

use std::sync::Arc;

use websql_api::command::WS_MASTER_DATA;
use websql_api::{ApiNode, App, Command, CommandEnvelope, ConfigSnapshot, DataNode, Query};
use websql_core::{ConfigStore, ReplicationHub, ScriptLocator};
use websql_persistence::NoopProvisioner;

fn slave(id: &str) -> ApiNode {
    ApiNode {
        id: id.to_string(),
        name: id.to_string(),
        server_name: "10.0.0.9".to_string(),
    }
}

fn decode_snapshot(frame: &str) -> ConfigSnapshot {
    let envelope: CommandEnvelope = serde_json::from_str(frame).unwrap();
    assert_eq!(envelope.kind, WS_MASTER_DATA);
    match Command::decode(&envelope).unwrap() {
        Command::MasterData(snapshot) => snapshot,
        other => panic!("unexpected command {:?}", other),
    }
}

#[tokio::test]
async fn test_every_mutation_reaches_file_and_slaves() {
    let dir = tempfile::tempdir().unwrap();
    let data_file = dir.path().join("conf").join("websql_master.json");
    let hub = Arc::new(ReplicationHub::new());
    let store = ConfigStore::new(
        Some(data_file.clone()),
        hub.clone(),
        Arc::new(NoopProvisioner),
        ScriptLocator::new(vec![dir.path().to_path_buf()]),
    );

    let (_, mut first) = hub.register(slave("s1"));
    let (_, mut second) = hub.register(slave("s2"));

    let dn = store
        .add_data_node(DataNode {
            name: "dn1".to_string(),
            host: "db".to_string(),
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
    for name in ["a", "b", "c"] {
        store
            .add_query(Query {
                name: name.to_string(),
                script_text: "SELECT 1".to_string(),
                app_id: app_id.clone(),
                ..Default::default()
            })
            .await
            .unwrap();
    }
    let n = 5;

    assert_eq!(store.version(), n);

    let persisted: ConfigSnapshot = serde_json::from_str(&std::fs::read_to_string(&data_file).unwrap()).unwrap();
    assert_eq!(persisted.version, n);
    assert_eq!(persisted.apps[0].queries.len(), 3);
    assert!(!dir.path().join("conf").join("websql_master.json.tmp").exists());

    for rx in [&mut first, &mut second] {
        let mut last = None;
        while let Ok(frame) = rx.try_recv() {
            last = Some(decode_snapshot(&frame));
        }
        let last = last.expect("slave received nothing");
        assert_eq!(last.version, n);
        assert_eq!(last, *store.snapshot());
    }
}

#[tokio::test]
async fn test_failed_mutation_broadcasts_nothing() {
    let hub = Arc::new(ReplicationHub::new());
    let store = ConfigStore::new(None, hub.clone(), Arc::new(NoopProvisioner), ScriptLocator::new(Vec::new()));
    let (_, mut rx) = hub.register(slave("s1"));

    assert!(store.remove_app("missing").await.is_err());
    assert!(rx.try_recv().is_err());
    assert_eq!(store.version(), 0);
}

#[tokio::test]
async fn test_snapshot_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let data_file = dir.path().join("websql_master.json");
    let build = || {
        ConfigStore::new(
            Some(data_file.clone()),
            Arc::new(ReplicationHub::new()),
            Arc::new(NoopProvisioner),
            ScriptLocator::new(Vec::new()),
        )
    };

    let store = build();
    store.load().await.unwrap();
    store
        .add_data_node(DataNode {
            name: "dn1".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    store.propagate().await.unwrap();

    let reopened = build();
    reopened.load().await.unwrap();
    assert_eq!(reopened.version(), 1);
    assert_eq!(reopened.snapshot().data_nodes[0].name, "dn1");
}

#[tokio::test]
async fn test_slave_replaces_snapshot_wholesale() {
    let master = ConfigStore::new(
        None,
        Arc::new(ReplicationHub::new()),
        Arc::new(NoopProvisioner),
        ScriptLocator::new(Vec::new()),
    );
    master
        .add_data_node(DataNode {
            name: "dn1".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let slave_store = Arc::new(ConfigStore::new(
        None,
        Arc::new(ReplicationHub::new()),
        Arc::new(NoopProvisioner),
        ScriptLocator::new(Vec::new()),
    ));
    slave_store.replace(ConfigSnapshot {
        version: 99,
        apps: vec![App {
            name: "stale".to_string(),
            ..Default::default()
        }],
        ..Default::default()
    });

    let replicator = websql_core::SlaveReplicator::new(
        "ws",
        "127.0.0.1:1103",
        "s1",
        "secret",
        std::time::Duration::from_secs(5),
        slave_store.clone(),
    );
    assert_eq!(replicator.url(), "ws://127.0.0.1:1103/sys/ws");

    let first_frame = master.master_data_frame().unwrap();
    replicator.handle_frame(&first_frame).unwrap();
    assert_eq!(*slave_store.snapshot(), *master.snapshot());

    // within a session an older snapshot never overwrites a newer one
    master
        .add_data_node(DataNode {
            name: "dn2".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    replicator.handle_frame(&master.master_data_frame().unwrap()).unwrap();
    replicator.handle_frame(&first_frame).unwrap();
    assert_eq!(slave_store.version(), 2);
    assert_eq!(slave_store.snapshot().data_nodes.len(), 2);

    // same version is still applied, propagate does not bump it
    master.propagate().await.unwrap();
    replicator.handle_frame(&master.master_data_frame().unwrap()).unwrap();
    assert_eq!(*slave_store.snapshot(), *master.snapshot());

    let rejected = websql_core::register_reply("Invalid secret.").unwrap();
    assert!(replicator.handle_frame(&rejected).is_err());

    // a new session takes the master's snapshot as is
    replicator.handle_frame(&websql_core::register_reply("OK").unwrap()).unwrap();
    replicator.handle_frame(&first_frame).unwrap();
    assert_eq!(slave_store.version(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_mutations_reach_slaves_in_version_order() {
    let hub = Arc::new(ReplicationHub::new());
    let store = Arc::new(ConfigStore::new(
        None,
        hub.clone(),
        Arc::new(NoopProvisioner),
        ScriptLocator::new(Vec::new()),
    ));
    let dn = store
        .add_data_node(DataNode {
            name: "dn1".to_string(),
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
    let (_, mut rx) = hub.register(slave("s1"));

    let tasks: Vec<_> = (0..8)
        .map(|t| {
            let store = store.clone();
            let app_id = app_id.clone();
            tokio::spawn(async move {
                for i in 0..100 {
                    store
                        .add_query(Query {
                            name: format!("q{}_{}", t, i),
                            script_text: "SELECT 1".to_string(),
                            app_id: app_id.clone(),
                            ..Default::default()
                        })
                        .await
                        .unwrap();
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let mut versions = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        versions.push(decode_snapshot(&frame).version);
    }
    assert_eq!(versions.len(), 800);
    assert!(versions.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(versions.last().copied(), Some(store.version()));
}
