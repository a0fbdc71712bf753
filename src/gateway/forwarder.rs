//! Mount table of live composite connections.
//!
//! Mutations lock the table for a single lookup/stop/insert; no network
//! I/O ever happens under the lock. Once [`Forwarder::stop_all`] has run the
//! table stays closed: late builds are stopped instead of mounted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::composite::CompositeConnection;
use crate::observability::metrics;

/// Owns every mounted connection, at most one per key.
#[derive(Default)]
pub struct Forwarder {
    mounted: Mutex<HashMap<String, Arc<CompositeConnection>>>,
    closed: AtomicBool,
}

impl Forwarder {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Arc<CompositeConnection>>> {
        self.mounted.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install `connection`, stopping any connection already under its key first.
    pub fn mount(&self, connection: CompositeConnection) -> Arc<CompositeConnection> {
        let connection = Arc::new(connection);
        let key = connection.key().to_string();

        let mut table = self.table();
        if self.closed.load(Ordering::Acquire) {
            drop(table);
            if let Err(e) = connection.stop() {
                tracing::warn!(key = %key, error = %e, "Stopping late connection failed");
            }
            tracing::info!(key = %key, "Forwarder closed, connection not mounted");
            return connection;
        }
        if let Some(previous) = table.get(&key) {
            if let Err(e) = previous.stop() {
                tracing::warn!(key = %key, error = %e, "Stopping replaced connection failed");
            }
            tracing::info!(key = %key, "Replacing mounted connection");
        }
        table.insert(key.clone(), connection.clone());
        let mounted = table.len();
        drop(table);

        metrics::set_mounted_services(mounted);
        tracing::info!(key = %key, mount_path = %connection.mount_path(), "Service mounted");
        connection
    }

    pub fn get(&self, key: &str) -> Option<Arc<CompositeConnection>> {
        self.table().get(key).cloned()
    }

    /// Match a first path segment against mount paths, then against keys.
    pub fn resolve(&self, segment: &str) -> Option<Arc<CompositeConnection>> {
        let segment = segment.trim_matches('/');
        if segment.is_empty() {
            return None;
        }

        let table = self.table();
        table
            .values()
            .find(|conn| conn.mount_path() == segment)
            .or_else(|| table.get(segment))
            .cloned()
    }

    pub fn mounted_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.table().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    /// Stop and drop every connection, and refuse later mounts.
    pub fn stop_all(&self) {
        let drained: Vec<_> = {
            let mut table = self.table();
            self.closed.store(true, Ordering::Release);
            table.drain().collect()
        };
        for (key, connection) in drained {
            if let Err(e) = connection.stop() {
                tracing::warn!(key = %key, error = %e, "Stopping connection failed");
            }
        }
        metrics::set_mounted_services(0);
        tracing::info!("All connections stopped");
    }
}
