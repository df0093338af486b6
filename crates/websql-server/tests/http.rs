//! Command channel, system endpoints and REST tenant checks over the HTTP surface

use std::sync::Arc;

use actix_web::{App, http::StatusCode, test, web};
use websql_api::command::{CLI_DN_ADD, CLI_DN_LIST, CLI_SHOW_API_NODES, CLI_SHOW_MASTER, WS_MASTER_DATA};
use websql_api::{CommandEnvelope, ConfigSnapshot};
use websql_core::{ConfigStore, ReplicationHub, ScriptLocator};
use websql_persistence::NoopProvisioner;
use websql_server::model::{AppState, Configuration};
use websql_server::startup::routes;

const SECRET: &str = "s3cr3t";

fn state(dir: &tempfile::TempDir, yaml: &str) -> web::Data<AppState> {
    let store = Arc::new(ConfigStore::new(
        Some(dir.path().join("websql_master.json")),
        Arc::new(ReplicationHub::new()),
        Arc::new(NoopProvisioner),
        ScriptLocator::new(vec![dir.path().to_path_buf()]),
    ));
    let configuration = Configuration::from_yaml(yaml).unwrap();
    web::Data::new(AppState::with_store(configuration, store).unwrap())
}

fn master(dir: &tempfile::TempDir) -> web::Data<AppState> {
    state(dir, &format!("websql:\n  secret: {}\n", SECRET))
}

fn cli(kind: &str, data: &str, secret: &str) -> test::TestRequest {
    test::TestRequest::post()
        .uri("/sys/cli")
        .set_payload(CommandEnvelope::new(kind, data).with_secret(secret).to_json().unwrap())
}

#[actix_web::test]
async fn test_cli_rejects_wrong_secret() {
    let dir = tempfile::tempdir().unwrap();
    let state = master(&dir);
    let app = test::init_service(App::new().app_data(state.clone()).configure(routes)).await;

    let resp = test::call_service(&app, cli(CLI_DN_ADD, r#"{"Name":"dn1"}"#, "wrong").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = test::read_body(resp).await;
    assert_eq!(body, r#"{"err":"Failed to validate secret."}"#);
    assert!(state.store.snapshot().data_nodes.is_empty());
}

#[actix_web::test]
async fn test_cli_add_then_list_and_show_master() {
    let dir = tempfile::tempdir().unwrap();
    let state = master(&dir);
    let app = test::init_service(App::new().app_data(state.clone()).configure(routes)).await;

    let resp = test::call_service(
        &app,
        cli(CLI_DN_ADD, r#"{"Name":"dn1","Host":"db","Port":3306}"#, SECRET).to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(test::read_body(resp).await.is_empty());

    let resp = test::call_service(&app, cli(CLI_DN_LIST, "", SECRET).to_request()).await;
    assert_eq!(test::read_body(resp).await, "dn1");

    let resp = test::call_service(&app, cli(CLI_SHOW_MASTER, "", SECRET).to_request()).await;
    let snapshot: ConfigSnapshot = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(snapshot.version, 1);
    assert_eq!(snapshot.data_nodes[0].name, "dn1");

    let resp = test::call_service(&app, cli(CLI_SHOW_API_NODES, "", SECRET).to_request()).await;
    assert_eq!(test::read_body(resp).await, "[]");

    // a second add with the same name fails as a plain-text 500
    let resp = test::call_service(&app, cli(CLI_DN_ADD, r#"{"Name":"dn1"}"#, SECRET).to_request()).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(test::read_body(resp).await, "Data node existed: dn1");
}

#[actix_web::test]
async fn test_cli_refuses_replication_frames() {
    let dir = tempfile::tempdir().unwrap();
    let state = master(&dir);
    let app = test::init_service(App::new().app_data(state.clone()).configure(routes)).await;

    let resp = test::call_service(&app, cli(WS_MASTER_DATA, "{}", "").to_request()).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(state.store.version(), 0);
}

#[actix_web::test]
async fn test_shutdown_only_from_loopback() {
    let dir = tempfile::tempdir().unwrap();
    let state = master(&dir);
    let app = test::init_service(App::new().app_data(state.clone()).configure(routes)).await;

    let req = test::TestRequest::post()
        .uri("/sys/shutdown")
        .peer_addr("192.168.1.20:5000".parse().unwrap())
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);
    assert!(!state.shutdown.is_shutdown());

    let req = test::TestRequest::post()
        .uri("/sys/shutdown")
        .peer_addr("127.0.0.1:5000".parse().unwrap())
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    assert!(state.shutdown.is_shutdown());
}

#[actix_web::test]
async fn test_rest_rejects_unknown_tenants() {
    let dir = tempfile::tempdir().unwrap();
    let state = master(&dir);
    let app = test::init_service(App::new().app_data(state.clone()).configure(routes)).await;

    let req = test::TestRequest::get()
        .uri("/api/orders")
        .insert_header(("api-token", "short"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(test::read_body(resp).await, r#"{"err":"Invalid app."}"#);

    let req = test::TestRequest::get()
        .uri("/api/orders/1")
        .insert_header(("api-token", "0123456789abcdef0123456789abcdefTOKEN"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(test::read_body(resp).await, r#"{"err":"Invalid app."}"#);
}

#[actix_web::test]
async fn test_slave_does_not_serve_replication() {
    let dir = tempfile::tempdir().unwrap();
    let state = state(&dir, "websql:\n  master: \"10.0.0.1:1103\"\n");
    let app = test::init_service(App::new().app_data(state.clone()).configure(routes)).await;

    let req = test::TestRequest::get().uri("/sys/ws").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
}
