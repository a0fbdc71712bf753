//! Gateway error taxonomy.
//!
//! # Propagation
//! - Registration-time failures are logged by the controller and the
//!   candidate connection is never mounted.
//! - Request-time failures always resolve to an envelope response.
//! - Configuration failures (`RouteConflict`, `MalformedTemplate`, `UnknownTier`) surface
//!   before the server starts accepting traffic.

use thiserror::Error;

use crate::auth::AuthorizationError;
use crate::directory::DirectoryError;
use crate::rpc::RpcError;

/// Result alias used across the gateway.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors produced by the gateway core.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Directory lookup miss.
    #[error("service descriptor not found")]
    ConfigNotFound,

    /// Caller identity could not be established.
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),

    /// Dial/handshake attempts used up.
    #[error("service {key}: gave up after {attempts} attempts: {last_error}")]
    DialExhausted {
        key: String,
        attempts: u32,
        last_error: String,
    },

    /// Handshake integrity check failed.
    #[error("service {key}: invalid service checksum (expected {expected}, received {received})")]
    ChecksumMismatch {
        key: String,
        expected: String,
        received: String,
    },

    /// Same compiled pattern registered twice for one method.
    #[error("path already registered: {method} {pattern}")]
    RouteConflict { method: String, pattern: String },

    /// Template with an unterminated or misplaced placeholder.
    #[error("malformed route template {template:?}: {reason}")]
    MalformedTemplate { template: String, reason: &'static str },

    /// A static route names a tier that does not exist.
    #[error("unknown tier {tier:?} for service {service}")]
    UnknownTier { service: String, tier: String },

    /// A protected-route pattern failed to compile.
    #[error("invalid route pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Backend transport not reachable.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Directory collaborator failure.
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// True for errors raised by static configuration rather than traffic.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            GatewayError::RouteConflict { .. }
                | GatewayError::MalformedTemplate { .. }
                | GatewayError::InvalidPattern { .. }
                | GatewayError::UnknownTier { .. }
        )
    }
}

impl From<RpcError> for GatewayError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Unavailable(msg) => GatewayError::Unavailable(msg),
            RpcError::Closed => GatewayError::Unavailable("connection closed".to_string()),
            other => GatewayError::Internal(other.to_string()),
        }
    }
}
