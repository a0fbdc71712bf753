//! Gateway ↔ backend transport.
//!
//! # Data Flow
//! ```text
//! Gateway:
//!     Dialer::dial(host:port) → ServiceClient
//!     ServiceClient::handshake → HandshakeResponse (checksum, protected routes)
//!     ServiceClient::dispatch  → DispatchReply (status, body, reply metadata)
//!
//! Backend (server.rs):
//!     POST /_rpc/handshake → BackendService::handshake
//!     POST /_rpc/dispatch  → BackendService::dispatch → Router → handler
//! ```
//!
//! # Design Decisions
//! - The gateway only sees the `Dialer` / `ServiceClient` traits, so the
//!   transport can be swapped without touching connection logic
//! - Side-channel metadata is a flat, lower-case keyed map
//! - "Unavailable" is a distinct error so the pipeline can answer 503

pub mod client;
pub mod server;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use client::{HttpDialer, HttpServiceClient};
pub use server::{handler, BackendServer, BackendService, Handler, Reply, RequestContext};

pub const HANDSHAKE_PATH: &str = "/_rpc/handshake";
pub const DISPATCH_PATH: &str = "/_rpc/dispatch";

pub const HEADER_METHOD: &str = "x-rpc-method";
pub const HEADER_PATH: &str = "x-rpc-path";
pub const HEADER_STATUS: &str = "x-rpc-status";
pub const HEADER_SERVER: &str = "x-rpc-server";
pub const METADATA_PREFIX: &str = "x-rpc-md-";

/// Side-channel key/value pairs. Keys are lower-case.
pub type Metadata = BTreeMap<String, String>;

/// Well-known metadata keys.
pub mod keys {
    pub const CLIENT_INFO: &str = "client-info";
    pub const AUTHORIZATION_INFO: &str = "x-authorization-info";
    pub const AUTHORIZATION: &str = "authorization";
    /// Prefix of forwarded client headers.
    pub const FORWARDED_PREFIX: &str = "bv-";
    pub const CONTENT_TYPE: &str = "bv-content-type";
    pub const REAL_IP: &str = "bv-real-ip";
    pub const REAL_IP_PROOF: &str = "bv-real-ip-proof";
    pub const REMOTE_ADDR: &str = "bv-x-remote-addr";
}

/// Calling client as seen by the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub agent: String,
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The peer could not be reached.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The peer answered with a transport-level failure.
    #[error("rpc status {code}: {message}")]
    Status { code: u16, message: String },

    /// Call on a client that was already closed.
    #[error("connection closed")]
    Closed,

    #[error("invalid target {0:?}")]
    InvalidTarget(String),

    #[error("codec error: {0}")]
    Codec(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeRequest {
    /// Caller hostname.
    pub from: String,
}

/// One protected-route entry as carried by the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRoute {
    pub pattern: String,
    #[serde(default)]
    pub tier: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeResponse {
    /// Responder hostname.
    pub server: String,
    pub checksum: String,
    #[serde(default)]
    pub namespace: String,
    /// Method → ordered entries.
    #[serde(default)]
    pub protected_routes: HashMap<String, Vec<WireRoute>>,
}

#[derive(Debug, Clone, Default)]
pub struct DispatchRequest {
    pub method: String,
    /// Path relative to the mount point, query included.
    pub path: String,
    pub body: Bytes,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Default)]
pub struct DispatchReply {
    pub server: String,
    pub status: u16,
    pub body: Bytes,
    pub metadata: Metadata,
}

/// A live handle to one backend.
#[async_trait]
pub trait ServiceClient: Send + Sync {
    async fn handshake(&self, request: HandshakeRequest) -> Result<HandshakeResponse, RpcError>;

    async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchReply, RpcError>;

    /// Release the transport. Callers close a client at most once.
    fn close(&self) -> Result<(), RpcError>;
}

/// Opens clients to `host:port` targets.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, address: &str) -> Result<Arc<dyn ServiceClient>, RpcError>;
}

/// Hostname reported in handshakes and replies; `?` when unknown.
pub fn local_hostname() -> String {
    if let Ok(host) = std::env::var("HOSTNAME") {
        if !host.trim().is_empty() {
            return host.trim().to_string();
        }
    }
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "?".to_string())
}
