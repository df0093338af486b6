//! `/sys/cli` command channel and `/sys/shutdown`

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use actix_web::http::header::ContentType;
use actix_web::{HttpRequest, HttpResponse, web};
use tracing::{info, warn};
use websql_api::CommandEnvelope;
use websql_common::WebsqlError;

use crate::error::AppError;
use crate::model::AppState;

fn text(body: String) -> HttpResponse {
    HttpResponse::Ok().content_type(ContentType::plaintext()).body(body)
}

/// Runs the command on the master. A slave relays the raw body to its master
/// and returns the master's answer unchanged.
pub async fn cli(body: web::Bytes, state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    if !state.is_master() {
        let url = format!("{}/sys/cli", state.configuration.master_http_url());
        let response = state
            .http_client
            .post(&url)
            .header("content-type", "application/json")
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| WebsqlError::Remote(e.to_string()))?;
        let status = response.status().as_u16();
        let reply = response.text().await.map_err(|e| WebsqlError::Remote(e.to_string()))?;
        if status >= 400 {
            return Err(anyhow::anyhow!(reply).into());
        }
        return Ok(text(reply));
    }

    let envelope: CommandEnvelope = serde_json::from_slice(&body)
        .map_err(|e| WebsqlError::validation(format!("Invalid command: {}", e)))?;
    let reply = state.commands.process(&envelope).await?;
    Ok(text(reply))
}

/// `127.0.0.1` or `::1`
pub fn is_loopback(ip: Option<IpAddr>) -> bool {
    match ip {
        Some(IpAddr::V4(v4)) => v4 == Ipv4Addr::LOCALHOST,
        Some(IpAddr::V6(v6)) => v6 == Ipv6Addr::LOCALHOST,
        None => false,
    }
}

/// Triggers graceful shutdown. Only loopback callers are accepted.
pub async fn shutdown(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let peer = req.peer_addr().map(|addr| addr.ip());
    if !is_loopback(peer) {
        warn!(peer = ?peer, "Shutdown refused for remote caller");
        return HttpResponse::Forbidden().finish();
    }
    info!("Shutdown requested over HTTP");
    state.shutdown.shutdown();
    text(String::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_loopback() {
        assert!(is_loopback(Some("127.0.0.1".parse().unwrap())));
        assert!(is_loopback(Some("::1".parse().unwrap())));
        assert!(!is_loopback(Some("10.1.2.3".parse().unwrap())));
        assert!(!is_loopback(Some("127.0.0.2".parse().unwrap())));
        assert!(!is_loopback(None));
    }
}
