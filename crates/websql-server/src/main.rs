//! Main entry point for the WebSQL server.

use std::time::Duration;

use actix_web::web;
use tracing::{error, info};
use websql_core::SlaveReplicator;
use websql_server::{
    model::{AppState, Configuration},
    startup::{self, listen_for_os_signals},
};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let configuration = Configuration::new()?;
    let _logging_guard = startup::init_logging(&configuration.logging_config())?;

    let address = configuration.server_address();
    let port = configuration.server_port();
    let state = web::Data::new(AppState::build(configuration).await?);
    listen_for_os_signals(state.shutdown.clone());

    let replicator = if state.is_master() {
        info!(
            node_id = %state.node_id,
            data_file = %state.configuration.data_file().display(),
            version = state.store.version(),
            "Starting as master"
        );
        state.scheduler.start_autostart_jobs().await;
        None
    } else {
        let replicator = SlaveReplicator::new(
            &state.configuration.master_scheme(),
            &state.configuration.master(),
            state.node_id.clone(),
            state.configuration.secret(),
            state.configuration.replication_backoff(),
            state.store.clone(),
        );
        info!(node_id = %state.node_id, master = %replicator.url(), "Starting as slave");
        Some(replicator.spawn(state.shutdown.subscribe()))
    };

    let server = startup::main_server(state.clone(), address.clone(), port)?;
    let handle = server.handle();
    let shutdown = state.shutdown.clone();
    actix_web::rt::spawn(async move {
        shutdown.wait().await;
        info!("Stopping HTTP server");
        handle.stop(true).await;
    });

    info!(address = %address, port, "WebSQL server listening");
    if let Err(e) = server.await {
        error!(error = %e, "HTTP server failed");
    }

    state.shutdown.shutdown();
    state.scheduler.stop_all();
    if let Some(replicator) = replicator
        && tokio::time::timeout(Duration::from_secs(5), replicator).await.is_err()
    {
        error!("Replication task did not stop in time");
    }
    info!("Shutdown complete");
    Ok(())
}
