//! Service descriptors and their integrity checksum.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// How the gateway talks to a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionKind {
    #[default]
    Rpc,
    Http,
}

impl ConnectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionKind::Rpc => "rpc",
            ConnectionKind::Http => "http",
        }
    }

    /// `http` (any case) is plain HTTP; every other value is RPC.
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("http") {
            ConnectionKind::Http
        } else {
            ConnectionKind::Rpc
        }
    }
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ConnectionKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ConnectionKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(ConnectionKind::parse(&value))
    }
}

/// A backend's self-description as stored in the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub host: String,
    pub port: u16,
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(rename = "typeconn", default)]
    pub kind: ConnectionKind,
    #[serde(rename = "gateway_endpoint", default, skip_serializing_if = "Option::is_none")]
    pub mount_path: Option<String>,
}

impl ServiceDescriptor {
    pub fn new(host: impl Into<String>, port: u16, key: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            key: key.into(),
            name: String::new(),
            namespace: String::new(),
            kind: ConnectionKind::Rpc,
            mount_path: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_kind(mut self, kind: ConnectionKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_mount_path(mut self, mount_path: impl Into<String>) -> Self {
        self.mount_path = Some(mount_path.into());
        self
    }

    /// `host:port` dial target.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn has_mount_path(&self) -> bool {
        self.mount_path.as_deref().is_some_and(|p| !p.is_empty())
    }

    /// Mount path with surrounding slashes removed.
    pub fn trimmed_mount_path(&self) -> &str {
        self.mount_path.as_deref().unwrap_or("").trim_matches('/')
    }

    /// Case-normalised tuple the checksum is computed over.
    fn canonical(&self) -> String {
        format!(
            "<{}:{}:{}:{}:{}:{}:{}>",
            self.host,
            self.port,
            self.key,
            self.namespace.to_lowercase(),
            self.kind.as_str(),
            self.name.replace(' ', "").to_lowercase(),
            self.trimmed_mount_path(),
        )
    }

    /// Lower-case hex SHA-256 fingerprint of the descriptor.
    pub fn checksum(&self) -> String {
        hex::encode(Sha256::digest(self.canonical().as_bytes()))
    }

    /// Case-insensitive comparison against a checksum received over the wire.
    pub fn verify_checksum(&self, received: &str) -> bool {
        let expected = self.checksum();
        tracing::debug!(key = %self.key, received = %received, expected = %expected, "Comparing checksum");
        received.eq_ignore_ascii_case(&expected)
    }
}
