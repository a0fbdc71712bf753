//! Service directory collaborator.
//!
//! # Data Flow
//! ```text
//! Backend process:
//!     ServiceDescriptor → write (keyed store) → publish (change stream)
//!
//! Gateway:
//!     get() snapshot        → registration controller bootstrap
//!     watch() change stream → registration controller (one build per event)
//!     secret_by_id()        → signature tier of the authorization engine
//! ```
//!
//! # Design Decisions
//! - The store itself is external; the gateway only depends on the traits
//! - `watch()` never terminates while the directory is alive
//! - Not-found is a distinct variant so callers can fail closed on it

pub mod descriptor;
pub mod file;
pub mod memory;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

pub use descriptor::{ConnectionKind, ServiceDescriptor};
pub use memory::MemoryDirectory;

/// Errors returned by directory implementations.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// No descriptor stored under the key.
    #[error("descriptor {0} not found")]
    NotFound(String),

    /// The store could not be reached or returned garbage.
    #[error("directory error: {0}")]
    Backend(String),
}

/// Errors returned by credential lookups.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("identity {0} not found")]
    NotFound(String),

    #[error("credential lookup failed: {0}")]
    Backend(String),
}

/// Keyed store plus publish/subscribe channel of service descriptors.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Full snapshot of stored descriptors.
    async fn get(&self) -> Result<Vec<ServiceDescriptor>, DirectoryError>;

    async fn get_by_key(&self, key: &str) -> Result<ServiceDescriptor, DirectoryError>;

    /// Stream of published descriptors.
    async fn watch(&self) -> Result<BoxStream<'static, ServiceDescriptor>, DirectoryError>;

    async fn write(&self, descriptor: &ServiceDescriptor) -> Result<(), DirectoryError>;

    async fn publish(&self, descriptor: &ServiceDescriptor) -> Result<(), DirectoryError>;
}

/// Lookup of per-caller shared secrets for request signatures.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn secret_by_id(&self, id: &str) -> Result<String, CredentialError>;
}
