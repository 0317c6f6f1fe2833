//! Concurrent registry of live WebSocket connections.
//!
//! [`ConnectionRegistry`] maps [`ConnectionId`] to [`Connection`] handles.
//! Connections are inserted when the handshake completes and removed when
//! the connection task ends, so the registry only ever holds sockets that
//! are open or in the middle of closing.
//!
//! Handshakes that were answered but whose connection task has not
//! finished yet are counted separately through [`UpgradeGuard`], so that
//! shutdown also waits for connections that are not registered yet.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Notify, RwLock};

use super::{Connection, ConnectionId};

/// Central store for all live connections.
///
/// Shared as `Arc<ConnectionRegistry>` between the server, connection
/// tasks and application handlers.
///
/// # Concurrency
///
/// - Lookups and iteration take the read lock and may run concurrently.
/// - Inserts and removals are serialized behind the write lock.
/// - [`ConnectionRegistry::wait_until_empty`] is woken on every removal
///   and every finished upgrade.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Connection>>,
    upgrades: AtomicUsize,
    removed: Notify,
}

/// Marks an accepted handshake whose connection task is still running.
///
/// Dropping the guard ends the upgrade, whether or not the connection was
/// ever registered.
#[derive(Debug)]
pub struct UpgradeGuard {
    registry: Arc<ConnectionRegistry>,
}

impl Drop for UpgradeGuard {
    fn drop(&mut self) {
        self.registry.upgrades.fetch_sub(1, Ordering::AcqRel);
        self.registry.removed.notify_waiters();
    }
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection. Returns `false` if its ID was already present
    /// (should never happen with UUID v4); the existing entry is kept.
    pub async fn insert(&self, connection: Connection) -> bool {
        let mut map = self.connections.write().await;
        if map.contains_key(&connection.id()) {
            return false;
        }
        map.insert(connection.id(), connection);
        true
    }

    /// Returns the connection with the given ID, if it is still registered.
    pub async fn get(&self, id: ConnectionId) -> Option<Connection> {
        self.connections.read().await.get(&id).cloned()
    }

    /// Removes a connection, returning its handle.
    pub async fn remove(&self, id: ConnectionId) -> Option<Connection> {
        let removed = self.connections.write().await.remove(&id);
        if removed.is_some() {
            self.removed.notify_waiters();
        }
        removed
    }

    /// Returns handles to all registered connections.
    pub async fn list(&self) -> Vec<Connection> {
        self.connections.read().await.values().cloned().collect()
    }

    /// Applies `action` to every connection that is open right now and
    /// returns how many were visited.
    ///
    /// The read lock is held while `action` runs; `action` must not call
    /// back into the registry's write operations.
    pub async fn for_each_open<F>(&self, mut action: F) -> usize
    where
        F: FnMut(&Connection),
    {
        let map = self.connections.read().await;
        let mut visited = 0;
        for connection in map.values().filter(|c| c.is_open()) {
            action(connection);
            visited += 1;
        }
        visited
    }

    /// Counts an accepted handshake until the returned guard is dropped.
    #[must_use]
    pub fn begin_upgrade(self: &Arc<Self>) -> UpgradeGuard {
        self.upgrades.fetch_add(1, Ordering::AcqRel);
        UpgradeGuard {
            registry: Arc::clone(self),
        }
    }

    /// Number of accepted handshakes whose connection task has not ended.
    #[must_use]
    pub fn pending_upgrades(&self) -> usize {
        self.upgrades.load(Ordering::Acquire)
    }

    /// Resolves once no connection is registered and no accepted
    /// handshake is still running.
    pub async fn wait_until_empty(&self) {
        loop {
            let removed = self.removed.notified();
            if self.pending_upgrades() == 0 && self.is_empty().await {
                return;
            }
            removed.await;
        }
    }

    /// Returns the number of registered connections.
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Returns `true` if no connection is registered.
    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}
