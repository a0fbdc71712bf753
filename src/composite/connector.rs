//! Dial → handshake → verify state machine.
//!
//! ```text
//! Dialing ──► Handshaking ──► Verifying ──► Ready
//!    │             │              │
//!    └── retry ◄───┘              └──► Failed (checksum / route table)
//!    └──────── attempts used up ─────► Failed (DialExhausted)
//! ```
//!
//! Dial and handshake failures draw from one shared attempt budget.
//! Checksum and route-table failures are never retried.

use std::collections::HashMap;
use std::sync::Arc;

use crate::composite::connection::{CompositeConnection, Transport};
use crate::directory::{ConnectionKind, ServiceDescriptor};
use crate::error::{GatewayError, GatewayResult};
use crate::resilience::{connect_backoff, MAX_CONNECT_ATTEMPTS};
use crate::routing::{PathPattern, ProtectedRoutes, Tier};
use crate::rpc::{local_hostname, Dialer, HandshakeRequest, HandshakeResponse, ServiceClient};

/// Gateway-declared protected routes per service key.
pub type StaticRoutes = HashMap<String, ProtectedRoutes>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    Dialing { attempt: u32 },
    Handshaking { attempt: u32 },
    Verifying,
    Ready,
    Failed,
}

/// Builds [`CompositeConnection`]s from descriptors.
#[derive(Clone)]
pub struct Connector {
    dialer: Arc<dyn Dialer>,
    hostname: String,
    static_routes: Arc<StaticRoutes>,
    max_attempts: u32,
}

impl Connector {
    pub fn new(dialer: Arc<dyn Dialer>) -> Self {
        Self {
            dialer,
            hostname: local_hostname(),
            static_routes: Arc::new(StaticRoutes::new()),
            max_attempts: MAX_CONNECT_ATTEMPTS,
        }
    }

    pub fn with_static_routes(mut self, routes: StaticRoutes) -> Self {
        self.static_routes = Arc::new(routes);
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    fn transition(&self, key: &str, state: ConnectState) {
        tracing::debug!(key = %key, state = ?state, "Connection state");
    }

    fn routes_for(&self, key: &str) -> ProtectedRoutes {
        self.static_routes.get(key).cloned().unwrap_or_default()
    }

    pub async fn connect(&self, descriptor: &ServiceDescriptor) -> GatewayResult<CompositeConnection> {
        let key = descriptor.key.as_str();
        let mount_path = descriptor.trimmed_mount_path().to_string();

        if descriptor.kind == ConnectionKind::Http {
            self.transition(key, ConnectState::Ready);
            return Ok(CompositeConnection::new(
                key,
                mount_path,
                Transport::Http {
                    base_url: format!("http://{}", descriptor.address()),
                },
                self.routes_for(key),
            ));
        }

        let address = descriptor.address();
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            if let Some(delay) = connect_backoff(attempt) {
                tokio::time::sleep(delay).await;
            }

            self.transition(key, ConnectState::Dialing { attempt });
            let client = match self.dialer.dial(&address).await {
                Ok(client) => client,
                Err(e) => {
                    tracing::warn!(key = %key, address = %address, attempt, error = %e, "Dial failed");
                    last_error = e.to_string();
                    continue;
                }
            };

            self.transition(key, ConnectState::Handshaking { attempt });
            let request = HandshakeRequest {
                from: self.hostname.clone(),
            };
            let ack = match client.handshake(request).await {
                Ok(ack) => ack,
                Err(e) => {
                    tracing::warn!(key = %key, address = %address, attempt, error = %e, "Handshake failed");
                    last_error = e.to_string();
                    close_quietly(key, client.as_ref());
                    continue;
                }
            };

            self.transition(key, ConnectState::Verifying);
            return match self.verify(descriptor, &ack) {
                Ok(protected) => {
                    self.transition(key, ConnectState::Ready);
                    tracing::info!(
                        key = %key,
                        server = %ack.server,
                        namespace = %ack.namespace,
                        protected_routes = protected.len(),
                        "Handshake complete"
                    );
                    Ok(CompositeConnection::new(key, mount_path, Transport::Rpc(client), protected))
                }
                Err(e) => {
                    self.transition(key, ConnectState::Failed);
                    close_quietly(key, client.as_ref());
                    Err(e)
                }
            };
        }

        self.transition(key, ConnectState::Failed);
        Err(GatewayError::DialExhausted {
            key: key.to_string(),
            attempts: self.max_attempts,
            last_error,
        })
    }

    fn verify(&self, descriptor: &ServiceDescriptor, ack: &HandshakeResponse) -> GatewayResult<ProtectedRoutes> {
        if !descriptor.verify_checksum(&ack.checksum) {
            return Err(GatewayError::ChecksumMismatch {
                key: descriptor.key.clone(),
                expected: descriptor.checksum(),
                received: ack.checksum.clone(),
            });
        }

        let mut protected = self.routes_for(&descriptor.key);
        protected.extend(&parse_protected_routes(ack)?);
        Ok(protected)
    }
}

/// Compile the handshake route table. Any bad pattern rejects the whole table.
pub fn parse_protected_routes(ack: &HandshakeResponse) -> GatewayResult<ProtectedRoutes> {
    let mut routes = ProtectedRoutes::new();
    for (method, entries) in &ack.protected_routes {
        for entry in entries {
            let pattern = PathPattern::from_regex(&entry.pattern)?;
            routes.push(method, pattern, Tier::from_handshake(&entry.tier));
        }
    }
    Ok(routes)
}

fn close_quietly(key: &str, client: &dyn ServiceClient) {
    if let Err(e) = client.close() {
        tracing::debug!(key = %key, error = %e, "Closing discarded client failed");
    }
}
