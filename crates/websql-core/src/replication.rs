// Master to slave configuration replication
// The master keeps one outbound channel per registered slave; slaves hold a
// long-lived WebSocket to the master and replace their snapshot wholesale.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use websql_api::command::{WS_MASTER_DATA, WS_REGISTER};
use websql_api::{ApiNode, Command, CommandEnvelope};
use websql_common::WebsqlError;

use crate::store::ConfigStore;

/// Reply payload of an accepted registration
pub const REGISTER_OK: &str = "OK";

struct Link {
    serial: u64,
    node: ApiNode,
    sender: mpsc::UnboundedSender<String>,
}

/// Registry of connected slaves on the master
#[derive(Default)]
pub struct ReplicationHub {
    links: Mutex<HashMap<String, Link>>,
    next_serial: AtomicU64,
}

impl ReplicationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks a registration frame and returns the slave's node id
    pub fn handshake(frame: &str, secret: &str) -> anyhow::Result<String> {
        let envelope: CommandEnvelope = serde_json::from_str(frame)
            .map_err(|e| WebsqlError::validation(format!("Invalid registration frame: {}", e)))?;
        if envelope.kind != WS_REGISTER {
            return Err(WebsqlError::validation(format!("Expected {}, got {}", WS_REGISTER, envelope.kind)).into());
        }
        if envelope.secret != secret {
            return Err(WebsqlError::auth("Invalid secret.").into());
        }
        if envelope.data.trim().is_empty() {
            return Err(WebsqlError::validation("Missing node id.").into());
        }
        Ok(envelope.data)
    }

    /// Records a link for `node`, replacing any previous link with the same id.
    /// The returned serial identifies this link on unregister.
    pub fn register(&self, node: ApiNode) -> (u64, mpsc::UnboundedReceiver<String>) {
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed) + 1;
        let (sender, receiver) = mpsc::unbounded_channel();
        let node_id = node.id.clone();

        let previous = self.links.lock().insert(node_id.clone(), Link { serial, node, sender });
        if previous.is_some() {
            info!(node_id = %node_id, serial, "Slave re-registered, previous link replaced");
        } else {
            info!(node_id = %node_id, serial, "Slave registered");
        }
        (serial, receiver)
    }

    /// Removes the link only if it is still the one registered under `serial`
    pub fn unregister(&self, node_id: &str, serial: u64) -> bool {
        let mut links = self.links.lock();
        match links.get(node_id) {
            Some(link) if link.serial == serial => {
                links.remove(node_id);
                info!(node_id = %node_id, serial, "Slave unregistered");
                true
            }
            _ => false,
        }
    }

    /// Queues `payload` on every link and returns how many accepted it
    pub fn broadcast(&self, payload: &str) -> usize {
        let links = self.links.lock();
        let mut delivered = 0;
        for (node_id, link) in links.iter() {
            match link.sender.send(payload.to_string()) {
                Ok(()) => delivered += 1,
                Err(_) => warn!(node_id = %node_id, serial = link.serial, "Failed to queue snapshot for slave"),
            }
        }
        counter!("websql_replication_broadcasts_total").increment(1);
        debug!(delivered, total = links.len(), "Snapshot broadcast");
        delivered
    }

    /// Sends to one link only, used right after registration
    pub fn send_to(&self, node_id: &str, payload: String) -> bool {
        self.links
            .lock()
            .get(node_id)
            .map(|link| link.sender.send(payload).is_ok())
            .unwrap_or(false)
    }

    pub fn api_nodes(&self) -> Vec<ApiNode> {
        let mut nodes: Vec<ApiNode> = self.links.lock().values().map(|l| l.node.clone()).collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    pub fn len(&self) -> usize {
        self.links.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.lock().is_empty()
    }
}

/// Slave side of the replication link
pub struct SlaveReplicator {
    url: String,
    node_id: String,
    secret: String,
    backoff: Duration,
    store: Arc<ConfigStore>,
    // set on registration; the first snapshot of a session is taken as is
    resync: AtomicBool,
}

impl SlaveReplicator {
    pub fn new(
        scheme: &str,
        master: &str,
        node_id: impl Into<String>,
        secret: impl Into<String>,
        backoff: Duration,
        store: Arc<ConfigStore>,
    ) -> Self {
        Self {
            url: format!("{}://{}/sys/ws", scheme, master.trim_end_matches('/')),
            node_id: node_id.into(),
            secret: secret.into(),
            backoff,
            store,
            resync: AtomicBool::new(true),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Runs the reconnect loop until `shutdown` flips to true
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = self.session() => match result {
                        Ok(()) => info!(url = %self.url, "Replication link closed by master"),
                        Err(e) => warn!(url = %self.url, error = %e, "Replication link failed"),
                    },
                    _ = shutdown.changed() => break,
                }

                tokio::select! {
                    _ = tokio::time::sleep(self.backoff) => {}
                    _ = shutdown.changed() => break,
                }
                if *shutdown.borrow() {
                    break;
                }
            }
            info!("Replication stopped");
        })
    }

    async fn session(&self) -> anyhow::Result<()> {
        let (mut ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| WebsqlError::Remote(e.to_string()))?;

        let register = CommandEnvelope::new(WS_REGISTER, self.node_id.as_str()).with_secret(self.secret.as_str());
        ws_stream.send(Message::Text(register.to_json()?.into())).await?;
        debug!(url = %self.url, node_id = %self.node_id, "Registration sent");

        while let Some(message) = ws_stream.next().await {
            match message? {
                Message::Text(text) => self.handle_frame(text.as_str())?,
                Message::Ping(payload) => ws_stream.send(Message::Pong(payload)).await?,
                Message::Close(_) => break,
                _ => {}
            }
        }
        Ok(())
    }

    /// Applies one frame received from the master
    pub fn handle_frame(&self, frame: &str) -> anyhow::Result<()> {
        let envelope: CommandEnvelope = serde_json::from_str(frame)?;
        match Command::decode(&envelope)? {
            Command::Register(reply) if reply == REGISTER_OK => {
                self.resync.store(true, Ordering::SeqCst);
                info!(node_id = %self.node_id, "Registered with master");
            }
            Command::Register(reply) => {
                return Err(WebsqlError::auth(format!("Registration rejected: {}", reply)).into());
            }
            Command::MasterData(snapshot) => {
                let version = snapshot.version;
                let current = self.store.version();
                if !self.resync.swap(false, Ordering::SeqCst) && version < current {
                    warn!(version, current, "Ignoring outdated configuration from master");
                    return Ok(());
                }
                self.store.replace(snapshot);
                info!(version, "Configuration replaced from master");
            }
            _ => debug!(kind = %envelope.kind, "Ignoring frame from master"),
        }
        Ok(())
    }
}

/// Frame announcing the result of a registration
pub fn register_reply(reply: &str) -> anyhow::Result<String> {
    CommandEnvelope::new(WS_REGISTER, reply).to_json()
}

/// Frame carrying an already serialized snapshot
pub fn master_data_frame(snapshot_json: String) -> anyhow::Result<String> {
    CommandEnvelope::new(WS_MASTER_DATA, snapshot_json).to_json()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> ApiNode {
        ApiNode {
            id: id.to_string(),
            name: id.to_string(),
            server_name: "127.0.0.1".to_string(),
        }
    }

    #[test]
    fn test_handshake() {
        let frame = CommandEnvelope::new(WS_REGISTER, "n1").with_secret("s3").to_json().unwrap();
        assert_eq!(ReplicationHub::handshake(&frame, "s3").unwrap(), "n1");

        let err = ReplicationHub::handshake(&frame, "other").unwrap_err();
        assert!(matches!(err.downcast_ref::<WebsqlError>(), Some(WebsqlError::Auth(_))));

        let wrong = CommandEnvelope::new(WS_MASTER_DATA, "{}").with_secret("s3").to_json().unwrap();
        assert!(ReplicationHub::handshake(&wrong, "s3").is_err());
    }

    #[test]
    fn test_broadcast_reaches_every_link() {
        let hub = ReplicationHub::new();
        let (_, mut rx1) = hub.register(node("a"));
        let (_, mut rx2) = hub.register(node("b"));

        assert_eq!(hub.broadcast("hello"), 2);
        assert_eq!(rx1.try_recv().unwrap(), "hello");
        assert_eq!(rx2.try_recv().unwrap(), "hello");
    }

    #[test]
    fn test_closed_link_does_not_block_others() {
        let hub = ReplicationHub::new();
        let (_, rx1) = hub.register(node("a"));
        let (_, mut rx2) = hub.register(node("b"));
        drop(rx1);

        assert_eq!(hub.broadcast("x"), 1);
        assert_eq!(rx2.try_recv().unwrap(), "x");
    }

    #[test]
    fn test_stale_serial_does_not_evict_new_link() {
        let hub = ReplicationHub::new();
        let (old, _rx_old) = hub.register(node("a"));
        let (new, mut rx_new) = hub.register(node("a"));
        assert_eq!(hub.len(), 1);

        assert!(!hub.unregister("a", old));
        assert_eq!(hub.broadcast("still here"), 1);
        assert_eq!(rx_new.try_recv().unwrap(), "still here");

        assert!(hub.unregister("a", new));
        assert!(hub.is_empty());
    }

    #[test]
    fn test_api_nodes_sorted() {
        let hub = ReplicationHub::new();
        let _b = hub.register(node("b"));
        let _a = hub.register(node("a"));
        let ids: Vec<String> = hub.api_nodes().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
