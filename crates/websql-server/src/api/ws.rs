//! `GET /sys/ws`: the master's end of the replication link
//!
//! A slave opens the socket and sends a `WS_REGISTER` frame carrying its node
//! id and the shared secret. The master answers `OK`, sends the current
//! snapshot, and from then on forwards every published snapshot until the
//! socket closes.

use std::time::Duration;

use actix_web::{Error, HttpRequest, HttpResponse, web};
use actix_ws::{CloseCode, CloseReason, Message, MessageStream, Session};
use futures_util::StreamExt;
use tracing::{debug, info, warn};
use websql_api::ApiNode;
use websql_core::{REGISTER_OK, ReplicationHub, register_reply};

use crate::model::AppState;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn replication_socket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    if !state.is_master() {
        return Ok(HttpResponse::NotFound().finish());
    }

    let server_name = req
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_default();
    let (response, session, msg_stream) = actix_ws::handle(&req, stream)?;

    let state = state.into_inner();
    actix_web::rt::spawn(async move {
        serve_slave(state, server_name, session, msg_stream).await;
    });

    Ok(response)
}

/// First text frame from the slave, answering pings while waiting
async fn read_register_frame(session: &mut Session, msg_stream: &mut MessageStream) -> Option<String> {
    while let Some(message) = msg_stream.next().await {
        match message {
            Ok(Message::Text(text)) => return Some(text.to_string()),
            Ok(Message::Ping(bytes)) => {
                if session.pong(&bytes).await.is_err() {
                    return None;
                }
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
    None
}

async fn serve_slave(
    state: std::sync::Arc<AppState>,
    server_name: String,
    mut session: Session,
    mut msg_stream: MessageStream,
) {
    let frame = match tokio::time::timeout(HANDSHAKE_TIMEOUT, read_register_frame(&mut session, &mut msg_stream)).await
    {
        Ok(Some(frame)) => frame,
        Ok(None) => return,
        Err(_) => {
            warn!(peer = %server_name, "Slave did not register in time");
            let _ = session
                .close(Some(CloseReason {
                    code: CloseCode::Policy,
                    description: Some("Registration timeout".into()),
                }))
                .await;
            return;
        }
    };

    let node_id = match ReplicationHub::handshake(&frame, &state.configuration.secret()) {
        Ok(node_id) => node_id,
        Err(e) => {
            warn!(peer = %server_name, error = %e, "Slave registration rejected");
            if let Ok(reply) = register_reply(&e.to_string()) {
                let _ = session.text(reply).await;
            }
            let _ = session
                .close(Some(CloseReason {
                    code: CloseCode::Policy,
                    description: Some(e.to_string()),
                }))
                .await;
            return;
        }
    };

    let hub = state.store.hub().clone();
    let (serial, mut outbound) = hub.register(ApiNode {
        id: node_id.clone(),
        name: node_id.clone(),
        server_name: server_name.clone(),
    });

    let initial = register_reply(REGISTER_OK).and_then(|ok| Ok((ok, state.store.master_data_frame()?)));
    match initial {
        Ok((ok, snapshot)) => {
            if session.text(ok).await.is_err() || session.text(snapshot).await.is_err() {
                hub.unregister(&node_id, serial);
                return;
            }
            info!(node_id = %node_id, peer = %server_name, version = state.store.version(), "Slave synchronized");
        }
        Err(e) => {
            warn!(node_id = %node_id, error = %e, "Failed to encode initial frames");
            hub.unregister(&node_id, serial);
            return;
        }
    }

    loop {
        tokio::select! {
            payload = outbound.recv() => match payload {
                Some(payload) => {
                    if let Err(e) = session.text(payload).await {
                        warn!(node_id = %node_id, error = %e, "Failed to send snapshot to slave");
                        break;
                    }
                }
                // replaced by a newer link for the same node
                None => {
                    let _ = session.close(Some(CloseReason {
                        code: CloseCode::Normal,
                        description: Some("Superseded".into()),
                    })).await;
                    break;
                }
            },
            message = msg_stream.next() => match message {
                Some(Ok(Message::Ping(bytes))) => {
                    if session.pong(&bytes).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(reason))) => {
                    debug!(node_id = %node_id, ?reason, "Slave closed the link");
                    let _ = session.close(reason).await;
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(node_id = %node_id, error = %e, "Replication socket error");
                    break;
                }
                None => break,
            },
        }
    }

    hub.unregister(&node_id, serial);
}
