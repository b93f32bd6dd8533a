//! Connection Pool (C1).
//!
//! Grounded directly in `connection_manager.py`'s `ConnectionManager`: a
//! map of uri to live handle, a map of uri to last error, a liveness probe
//! via the hypervisor's cheap "library version" call, and a hard wall-clock
//! timeout on open with SSH-specific guidance baked into the timeout error.

use novahv_common::{log_error, log_success, log_warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::instrument;

use crate::backend::LibvirtConnection;
use crate::error::{Error, Result};
use crate::events::{Event, EventSender};

const OPEN_TIMEOUT: Duration = Duration::from_secs(10);

type Opener = Arc<dyn Fn(&str) -> Result<Arc<dyn LibvirtConnection>> + Send + Sync>;

struct Entry {
    handle: Arc<dyn LibvirtConnection>,
    #[allow(dead_code)]
    opened_at: std::time::Instant,
}

/// C1: a registry of long-lived hypervisor connections keyed by URI.
///
/// `opener` is pluggable so tests can hand back [`crate::backend::MockConnection`]s
/// instead of dialing real libvirtd sockets — the same seam the teacher crate
/// gets from its `Hypervisor` trait + `MockBackend` pair.
pub struct ConnectionPool {
    connections: RwLock<HashMap<String, Entry>>,
    errors: RwLock<HashMap<String, String>>,
    opener: Opener,
    events: EventSender,
}

impl ConnectionPool {
    pub fn new(events: EventSender, opener: Opener) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            errors: RwLock::new(HashMap::new()),
            opener,
            events,
        }
    }

    /// Convenience constructor wired to [`crate::backend::RealConnection::open`].
    #[cfg(feature = "libvirt")]
    pub fn new_real(events: EventSender) -> Self {
        Self::new(
            events,
            Arc::new(|uri: &str| {
                crate::backend::RealConnection::open(uri)
                    .map(|c| Arc::new(c) as Arc<dyn LibvirtConnection>)
            }),
        )
    }

    /// Opens (or reuses, after a liveness probe) the connection for `uri`.
    #[instrument(skip(self), fields(uri = %uri))]
    pub async fn connect(&self, uri: &str) -> Result<Arc<dyn LibvirtConnection>> {
        if let Some(entry) = self.connections.read().await.get(uri) {
            match entry.handle.lib_version().await {
                Ok(_) => return Ok(entry.handle.clone()),
                Err(_) => {
                    log_warn!("connection", "stale handle for '{}', reopening", uri);
                }
            }
        }
        self.connections.write().await.remove(uri);

        let opener = self.opener.clone();
        let uri_owned = uri.to_string();
        let open = tokio::task::spawn_blocking(move || opener(&uri_owned));
        let handle = match tokio::time::timeout(OPEN_TIMEOUT, open).await {
            Ok(Ok(Ok(handle))) => handle,
            Ok(Ok(Err(e))) => {
                self.record_error(uri, e.to_string()).await;
                return Err(e);
            }
            Ok(Err(join_err)) => {
                let msg = join_err.to_string();
                self.record_error(uri, msg.clone()).await;
                return Err(Error::connection(uri, msg));
            }
            Err(_) => {
                let mut message = format!("connection open timed out after {OPEN_TIMEOUT:?}");
                if uri.to_lowercase().contains("ssh") {
                    message.push_str(
                        "; interactive SSH passphrase prompts are not supported, configure an ssh-agent",
                    );
                }
                self.record_error(uri, message.clone()).await;
                return Err(Error::connection(uri, message));
            }
        };

        self.connections.write().await.insert(
            uri.to_string(),
            Entry { handle: handle.clone(), opened_at: std::time::Instant::now() },
        );
        self.errors.write().await.remove(uri);
        log_success!("connection", "opened connection to '{}'", uri);
        let _ = self.events.send(Event::ConnectionStatus { uri: uri.to_string(), alive: true, last_error: None });
        Ok(handle)
    }

    async fn record_error(&self, uri: &str, message: String) {
        self.errors.write().await.insert(uri.to_string(), message.clone());
        log_error!("connection", &message, "connect to '{}' failed", uri);
        let _ = self.events.send(Event::ConnectionStatus { uri: uri.to_string(), alive: false, last_error: Some(message) });
    }

    /// Idempotent; close errors are logged, never propagated (spec §4.1).
    #[instrument(skip(self), fields(uri = %uri))]
    pub async fn disconnect(&self, uri: &str) {
        if let Some(entry) = self.connections.write().await.remove(uri) {
            if let Err(e) = entry.handle.close().await {
                log_warn!("connection", "error closing '{}': {}", uri, e);
            }
        }
        self.errors.write().await.remove(uri);
        let _ = self.events.send(Event::ConnectionStatus { uri: uri.to_string(), alive: false, last_error: None });
    }

    pub async fn disconnect_all(&self) {
        let uris: Vec<String> = self.connections.read().await.keys().cloned().collect();
        for uri in uris {
            self.disconnect(&uri).await;
        }
    }

    pub async fn get_connection(&self, uri: &str) -> Option<Arc<dyn LibvirtConnection>> {
        self.connections.read().await.get(uri).map(|e| e.handle.clone())
    }

    pub async fn all_uris(&self) -> Vec<String> {
        self.connections.read().await.keys().cloned().collect()
    }

    pub async fn last_error(&self, uri: &str) -> Option<String> {
        self.errors.read().await.get(uri).cloned()
    }

    /// True iff a handle is cached for `uri` and its liveness probe succeeds,
    /// without attempting to (re)connect — usable even when the URI has no
    /// live connection yet (spec.md's "queryable independently" note).
    pub async fn is_alive(&self, uri: &str) -> bool {
        match self.connections.read().await.get(uri) {
            Some(entry) => entry.handle.is_alive().await.unwrap_or(false),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockConnection;

    fn pool() -> (ConnectionPool, EventSender, tokio::sync::mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = crate::events::channel();
        let opener: Opener = Arc::new(|uri: &str| Ok(MockConnection::new(uri) as Arc<dyn LibvirtConnection>));
        (ConnectionPool::new(tx.clone(), opener), tx, rx)
    }

    #[tokio::test]
    async fn connect_then_disconnect_removes_handle() {
        let (pool, _tx, _rx) = pool();
        pool.connect("qemu:///system").await.unwrap();
        assert!(pool.get_connection("qemu:///system").await.is_some());
        pool.disconnect("qemu:///system").await;
        assert!(pool.get_connection("qemu:///system").await.is_none());
    }

    #[tokio::test]
    async fn reconnect_reuses_handle_when_alive() {
        let (pool, _tx, _rx) = pool();
        let first = pool.connect("qemu:///system").await.unwrap();
        let second = pool.connect("qemu:///system").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn dead_uri_has_no_connection_and_records_error_only_if_attempted() {
        let (pool, _tx, _rx) = pool();
        assert!(pool.get_connection("qemu+ssh://nope/system").await.is_none());
        assert!(pool.last_error("qemu+ssh://nope/system").await.is_none());
        assert!(!pool.is_alive("qemu+ssh://nope/system").await);
    }
}
