//! Serialization of uploads to the same remote file.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use tokio::sync::OwnedMutexGuard;

static SHARED: Lazy<Arc<UploadLocks>> = Lazy::new(|| Arc::new(UploadLocks::default()));

/// One async lock per `(host, remote path)`.
///
/// Registries of concurrently running tests share [`UploadLocks::shared`],
/// so two flows never write the same staging file at once.
#[derive(Debug, Default)]
pub struct UploadLocks {
    locks: Mutex<HashMap<(String, String), Arc<tokio::sync::Mutex<()>>>>,
}

impl UploadLocks {
    /// The process-wide instance.
    pub fn shared() -> Arc<UploadLocks> {
        SHARED.clone()
    }

    /// Wait until no one else is uploading `path` to `host`.
    pub async fn acquire(&self, host: &str, path: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry((host.to_string(), path.to_string()))
                .or_default()
                .clone()
        };
        lock.lock_owned().await
    }
}
