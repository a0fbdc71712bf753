//! Tiered caller authorization.
//!
//! # Data Flow
//! ```text
//! AuthRequest (built per call by the pipeline)
//!     → token.rs     ("{type} {value}" framing, bearer only)
//!     → engine.rs    (tier-specific claim extraction)
//!         strict  : legacy.rs bypass, else verified token
//!         protect : verified token
//!         private : integrity.rs keyed digest over claims
//!     → signature.rs (optional request signature, caller secret lookup)
//!     → AuthorizationIdentity
//! ```
//!
//! # Design Decisions
//! - One `Authorizer` contract, one engine instance per tier, wired at startup
//! - Every rejection is an `AuthorizationError`; infrastructure failures are
//!   plain `GatewayError`s so the pipeline can tell them apart
//! - The legacy bypass is isolated and only reachable from the strict tier

pub mod engine;
pub mod integrity;
pub mod legacy;
pub mod signature;
pub mod token;

use std::fmt;

use axum::body::Bytes;
use axum::http::Uri;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

pub use engine::{AuthEngines, Authorizer, TierAuthorizer};

/// Locale used when the requested one has no message.
pub const DEFAULT_LOCALE: &str = "en";

/// Everything an authorizer may look at. Built fresh per inbound call.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub method: String,
    pub uri: Uri,
    pub body: Bytes,
    /// Caller/composite identifier (`x-gateway-key`).
    pub client_id: String,
    /// `None` when the header is absent or unparsable.
    pub timestamp: Option<DateTime<FixedOffset>>,
    pub signature: String,
    /// Raw `authorization` header value.
    pub token: String,
}

/// Claims handed to backends as `x-authorization-info`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationIdentity {
    #[serde(rename = "id", default)]
    pub user_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(rename = "isorgadmin", default)]
    pub is_org_admin: i64,
    #[serde(rename = "isactive", default)]
    pub is_active: i64,
    #[serde(default)]
    pub organization_id: String,
    #[serde(rename = "app", default)]
    pub app_id: String,
    #[serde(default)]
    pub exp: i64,
}

/// Reason a caller was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    TokenNotFound,
    MalformedToken,
    Unsupported,
    InvalidToken,
    TokenRetired,
    CompositeFailed,
    SignatureMismatch,
    IntegrityMismatch,
}

impl AuthErrorKind {
    fn messages(&self) -> [(&'static str, &'static str); 2] {
        match self {
            AuthErrorKind::TokenNotFound => [("en", "Token not found"), ("id", "Token tidak ditemukan")],
            AuthErrorKind::MalformedToken => {
                [("en", "Malformed token"), ("id", "Format token tidak valid")]
            }
            AuthErrorKind::Unsupported => {
                [("en", "Unsupported authorization"), ("id", "Otorisasi tidak didukung")]
            }
            AuthErrorKind::InvalidToken
            | AuthErrorKind::TokenRetired
            | AuthErrorKind::IntegrityMismatch => [("en", "Invalid token"), ("id", "Token tidak valid")],
            AuthErrorKind::CompositeFailed => {
                [("en", "Client authorization failed"), ("id", "Otorisasi klien gagal")]
            }
            AuthErrorKind::SignatureMismatch => {
                [("en", "Signature mismatch"), ("id", "Signature tidak cocok")]
            }
        }
    }
}

/// Typed rejection carrying a machine string and localized messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationError {
    kind: AuthErrorKind,
    machine: String,
}

impl AuthorizationError {
    pub fn new(kind: AuthErrorKind, machine: impl Into<String>) -> Self {
        Self {
            kind,
            machine: machine.into(),
        }
    }

    pub fn token_not_found() -> Self {
        Self::new(AuthErrorKind::TokenNotFound, "token not found")
    }

    pub fn malformed_token() -> Self {
        Self::new(AuthErrorKind::MalformedToken, "malformed token")
    }

    pub fn unsupported() -> Self {
        Self::new(AuthErrorKind::Unsupported, "unsupported authorization")
    }

    pub fn invalid_token(detail: impl fmt::Display) -> Self {
        Self::new(AuthErrorKind::InvalidToken, format!("invalid token: {}", detail))
    }

    pub fn token_retired() -> Self {
        Self::new(AuthErrorKind::TokenRetired, "token has been retired")
    }

    pub fn composite_failed() -> Self {
        Self::new(AuthErrorKind::CompositeFailed, "composite authorization failed")
    }

    pub fn signature_mismatch() -> Self {
        Self::new(AuthErrorKind::SignatureMismatch, "signature mismatch")
    }

    pub fn integrity_mismatch() -> Self {
        Self::new(AuthErrorKind::IntegrityMismatch, "invalid authorization token, 0x10001")
    }

    pub fn kind(&self) -> AuthErrorKind {
        self.kind
    }

    /// Diagnostic text for logs.
    pub fn machine(&self) -> &str {
        &self.machine
    }

    /// User-facing text in `locale`, falling back to English.
    pub fn message(&self, locale: &str) -> &'static str {
        let messages = self.kind.messages();
        messages
            .iter()
            .find(|(lang, _)| lang.eq_ignore_ascii_case(locale))
            .or_else(|| messages.iter().find(|(lang, _)| *lang == DEFAULT_LOCALE))
            .map(|(_, text)| *text)
            .unwrap_or("Unauthorized")
    }
}

impl fmt::Display for AuthorizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.machine)
    }
}

impl std::error::Error for AuthorizationError {}
