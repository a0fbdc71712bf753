//! Directory seed file and hot reload.
//!
//! ```toml
//! [[services]]
//! host = "10.0.0.5"
//! port = 7001
//! key = "billing"
//! name = "Billing"
//! namespace = "finance"
//! typeconn = "rpc"
//! gateway_endpoint = "/billing"
//!
//! [[credentials]]
//! id = "mobile-app"
//! secret = "..."
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};

use crate::directory::{Directory, DirectoryError, MemoryDirectory, ServiceDescriptor};

/// Caller identifier and its signing secret.
#[derive(Debug, Clone, Deserialize)]
pub struct Credential {
    pub id: String,
    pub secret: String,
}

/// Parsed directory file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DirectoryFile {
    pub services: Vec<ServiceDescriptor>,
    pub credentials: Vec<Credential>,
}

/// Read and parse a directory file.
pub fn load_directory_file(path: &Path) -> Result<DirectoryFile, DirectoryError> {
    let content = fs::read_to_string(path)
        .map_err(|e| DirectoryError::Backend(format!("reading {}: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| DirectoryError::Backend(format!("parsing {}: {}", path.display(), e)))
}

/// Store every entry of `file` in `directory`, optionally publishing the
/// descriptors as registration events.
pub async fn apply(
    directory: &MemoryDirectory,
    file: &DirectoryFile,
    publish: bool,
) -> Result<(), DirectoryError> {
    for credential in &file.credentials {
        directory.set_credential(credential.id.clone(), credential.secret.clone());
    }
    for descriptor in &file.services {
        directory.write(descriptor).await?;
        if publish {
            directory.publish(descriptor).await?;
        }
    }
    Ok(())
}

/// Watches the directory file and forwards every successful reload.
pub struct DirectoryFileWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<DirectoryFile>,
}

impl DirectoryFileWatcher {
    /// Returns the watcher and a receiver for reloaded files.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<DirectoryFile>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. The returned handle must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!(path = %path.display(), "Directory file changed, reloading");
                        match load_directory_file(&path) {
                            Ok(file) => {
                                let _ = tx.send(file);
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "Failed to reload directory file, keeping current entries");
                            }
                        }
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Directory watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?self.path, "Directory file watcher started");
        Ok(watcher)
    }
}

/// Apply reloaded files until shutdown; every descriptor is re-published.
pub async fn sync_updates(
    directory: MemoryDirectory,
    mut updates: mpsc::UnboundedReceiver<DirectoryFile>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(file) = update else { break };
                if let Err(e) = apply(&directory, &file, true).await {
                    tracing::error!(error = %e, "Failed to apply directory update");
                }
            }
            _ = shutdown.recv() => break,
        }
    }
    tracing::debug!("Directory sync stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::io::Write;

    use crate::directory::{ConnectionKind, CredentialStore};

    const SAMPLE: &str = r#"
[[services]]
host = "127.0.0.1"
port = 7001
key = "billing"
name = "Billing"
namespace = "finance"
typeconn = "http"
gateway_endpoint = "/billing"

[[services]]
host = "127.0.0.1"
port = 7002
key = "users"

[[credentials]]
id = "mobile-app"
secret = "abc"
"#;

    #[test]
    fn test_load_directory_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let parsed = load_directory_file(file.path()).unwrap();
        assert_eq!(parsed.services.len(), 2);
        assert_eq!(parsed.services[0].kind, ConnectionKind::Http);
        assert_eq!(parsed.services[1].kind, ConnectionKind::Rpc);
        assert_eq!(parsed.services[1].mount_path, None);
        assert_eq!(parsed.credentials[0].id, "mobile-app");
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_directory_file(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, DirectoryError::Backend(_)));
    }

    #[tokio::test]
    async fn test_apply_publishes_when_asked() {
        let parsed: DirectoryFile = toml::from_str(SAMPLE).unwrap();
        let directory = MemoryDirectory::new();
        let mut events = directory.watch().await.unwrap();

        apply(&directory, &parsed, true).await.unwrap();

        assert_eq!(directory.len(), 2);
        assert_eq!(directory.secret_by_id("mobile-app").await.unwrap(), "abc");
        assert_eq!(events.next().await.unwrap().key, "billing");
        assert_eq!(events.next().await.unwrap().key, "users");
    }
}
