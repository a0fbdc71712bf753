//! Registration controller.
//!
//! Bootstraps the mount table from a directory snapshot, then turns every
//! directory event into an independent build-and-mount task. Events are not
//! deduplicated; for one key the build that completes last wins.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::composite::{CompositeConnection, Connector};
use crate::directory::{Directory, ServiceDescriptor};
use crate::error::GatewayResult;
use crate::gateway::forwarder::Forwarder;
use crate::observability::metrics;

pub struct RegistrationController {
    directory: Arc<dyn Directory>,
    connector: Connector,
    forwarder: Arc<Forwarder>,
}

impl RegistrationController {
    pub fn new(directory: Arc<dyn Directory>, connector: Connector, forwarder: Arc<Forwarder>) -> Self {
        Self {
            directory,
            connector,
            forwarder,
        }
    }

    /// Start one build per stored descriptor. Failures are per key.
    pub async fn bootstrap(&self) -> GatewayResult<Vec<JoinHandle<()>>> {
        let snapshot = self.directory.get().await?;
        tracing::info!(services = snapshot.len(), "Bootstrapping mount table");
        Ok(snapshot.into_iter().map(|d| self.spawn_build(d)).collect())
    }

    /// Build and mount on a separate task so slow dials never block the caller.
    pub fn spawn_build(&self, descriptor: ServiceDescriptor) -> JoinHandle<()> {
        let connector = self.connector.clone();
        let forwarder = self.forwarder.clone();
        tokio::spawn(async move {
            let _ = build_and_mount(&connector, &forwarder, &descriptor).await;
        })
    }

    /// Subscribe, bootstrap, then follow directory events until shutdown.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> GatewayResult<()> {
        // Subscribe first so nothing published during bootstrap is lost.
        let mut events = self.directory.watch().await?;
        self.bootstrap().await?;

        loop {
            tokio::select! {
                event = events.next() => match event {
                    Some(descriptor) => {
                        tracing::info!(key = %descriptor.key, address = %descriptor.address(), "Registration event");
                        self.spawn_build(descriptor);
                    }
                    None => {
                        tracing::warn!("Directory watch stream ended");
                        break;
                    }
                },
                _ = shutdown.recv() => {
                    tracing::info!("Registration controller stopping");
                    break;
                }
            }
        }
        Ok(())
    }
}

/// Connect `descriptor` and mount the result. Errors are logged here.
pub async fn build_and_mount(
    connector: &Connector,
    forwarder: &Forwarder,
    descriptor: &ServiceDescriptor,
) -> GatewayResult<Arc<CompositeConnection>> {
    match connector.connect(descriptor).await {
        Ok(connection) => {
            metrics::record_registration("mounted");
            Ok(forwarder.mount(connection))
        }
        Err(e) => {
            metrics::record_registration("failed");
            tracing::error!(key = %descriptor.key, address = %descriptor.address(), error = %e, "Service registration failed");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composite::connector::tests::{ack_for, MockClient};
    use crate::directory::MemoryDirectory;
    use crate::rpc::{Dialer, RpcError, ServiceClient};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Hands out a fresh client per descriptor key, failing unknown keys.
    struct KeyedDialer {
        clients: HashMap<String, Arc<MockClient>>,
    }

    #[async_trait]
    impl Dialer for KeyedDialer {
        async fn dial(&self, address: &str) -> Result<Arc<dyn ServiceClient>, RpcError> {
            match self.clients.get(address) {
                Some(client) => Ok(client.clone()),
                None => Err(RpcError::Unavailable(address.to_string())),
            }
        }
    }

    async fn wait_for(forwarder: &Forwarder, count: usize) {
        for _ in 0..100 {
            if forwarder.len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} mounted services, found {}", count, forwarder.len());
    }

    #[tokio::test]
    async fn test_bootstrap_and_watch_mount_services() {
        let billing = ServiceDescriptor::new("10.0.0.1", 7001, "billing").with_mount_path("/billing");
        let users = ServiceDescriptor::new("10.0.0.2", 7002, "users").with_mount_path("/users");

        let mut clients = HashMap::new();
        clients.insert(billing.address(), MockClient::new(Some(ack_for(&billing))));
        clients.insert(users.address(), MockClient::new(Some(ack_for(&users))));

        let directory = MemoryDirectory::new();
        directory.write(&billing).await.unwrap();

        let forwarder = Arc::new(Forwarder::new());
        let controller = Arc::new(RegistrationController::new(
            Arc::new(directory.clone()),
            Connector::new(Arc::new(KeyedDialer { clients })),
            forwarder.clone(),
        ));

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.run(shutdown_rx).await })
        };

        wait_for(&forwarder, 1).await;
        assert_eq!(forwarder.mounted_keys(), vec!["billing"]);

        directory.publish(&users).await.unwrap();
        wait_for(&forwarder, 2).await;
        assert_eq!(forwarder.resolve("users").unwrap().key(), "users");

        shutdown_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_build_is_not_mounted() {
        let ghost = ServiceDescriptor::new("10.9.9.9", 1, "ghost");
        let forwarder = Forwarder::new();
        let connector = Connector::new(Arc::new(KeyedDialer {
            clients: HashMap::new(),
        }));

        let result = build_and_mount(&connector, &forwarder, &ghost).await;
        assert!(result.is_err());
        assert!(forwarder.is_empty());
    }
}
