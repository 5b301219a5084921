// Live-connection registry
//
// Tracks connections by their stable per-socket id. Per-connection I/O and
// cursor state live in each connection's own task; the registry is the shared
// view used for the health probe, connected-client logging, and shutdown
// draining. Removal is idempotent: a task that lost a race with its own
// teardown path may remove twice.

use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub user_id: i64,
}

#[derive(Debug, Default)]
pub struct Registry {
    connections: RwLock<HashMap<u64, ConnectionInfo>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, id: u64, info: ConnectionInfo) {
        self.connections.write().await.insert(id, info);
    }

    /// Remove a connection; unknown ids are a no-op.
    pub async fn remove(&self, id: u64) -> bool {
        self.connections.write().await.remove(&id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}
