//! In-process directory.
//!
//! Keyed storage in a `DashMap`, change notifications over a tokio
//! broadcast channel. Also serves caller secrets for the signature tier.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::stream::{BoxStream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::directory::{
    CredentialError, CredentialStore, Directory, DirectoryError, ServiceDescriptor,
};

const CHANNEL_CAPACITY: usize = 256;

/// Thread-safe in-memory directory. Cheap to clone.
#[derive(Clone)]
pub struct MemoryDirectory {
    services: Arc<DashMap<String, ServiceDescriptor>>,
    credentials: Arc<DashMap<String, String>>,
    channel: broadcast::Sender<ServiceDescriptor>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        let (channel, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            services: Arc::new(DashMap::new()),
            credentials: Arc::new(DashMap::new()),
            channel,
        }
    }

    /// Store or replace the secret for a caller identifier.
    pub fn set_credential(&self, id: impl Into<String>, secret: impl Into<String>) {
        self.credentials.insert(id.into(), secret.into());
    }

    pub fn remove_credential(&self, id: &str) {
        self.credentials.remove(id);
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn get(&self) -> Result<Vec<ServiceDescriptor>, DirectoryError> {
        Ok(self.services.iter().map(|r| r.value().clone()).collect())
    }

    async fn get_by_key(&self, key: &str) -> Result<ServiceDescriptor, DirectoryError> {
        self.services
            .get(key)
            .map(|r| r.value().clone())
            .ok_or_else(|| DirectoryError::NotFound(key.to_string()))
    }

    async fn watch(&self) -> Result<BoxStream<'static, ServiceDescriptor>, DirectoryError> {
        let stream = BroadcastStream::new(self.channel.subscribe()).filter_map(|item| async move {
            match item {
                Ok(descriptor) => Some(descriptor),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Directory watcher lagged, events dropped");
                    None
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn write(&self, descriptor: &ServiceDescriptor) -> Result<(), DirectoryError> {
        self.services.insert(descriptor.key.clone(), descriptor.clone());
        Ok(())
    }

    async fn publish(&self, descriptor: &ServiceDescriptor) -> Result<(), DirectoryError> {
        // No subscribers is not an error; the descriptor is still stored.
        let receivers = self.channel.send(descriptor.clone()).unwrap_or(0);
        tracing::debug!(key = %descriptor.key, receivers, "Descriptor published");
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for MemoryDirectory {
    async fn secret_by_id(&self, id: &str) -> Result<String, CredentialError> {
        self.credentials
            .get(id)
            .map(|r| r.value().clone())
            .ok_or_else(|| CredentialError::NotFound(id.to_string()))
    }
}
