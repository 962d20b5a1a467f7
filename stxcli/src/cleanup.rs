//! Scoped cleanup of resources created by tests.
//!
//! Keywords that create something (a volume, a subcloud, an uploaded
//! application) register it here under a scope. When the scope ends, the
//! entries are released in reverse order of registration through a
//! kind-keyed deleter supplied by the domain layer.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use log::{debug, error, info, warn};
use tokio::time::Instant;

use crate::error::{CleanupError, CleanupFailure, Error, Result};

/// Test lifetimes, innermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CleanupScope {
    Function,
    Class,
    Module,
    Session,
}

impl CleanupScope {
    /// Every scope, in release order.
    pub const ALL: [CleanupScope; 4] = [
        CleanupScope::Function,
        CleanupScope::Class,
        CleanupScope::Module,
        CleanupScope::Session,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupScope::Function => "function",
            CleanupScope::Class => "class",
            CleanupScope::Module => "module",
            CleanupScope::Session => "session",
        }
    }
}

impl fmt::Display for CleanupScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CleanupScope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        CleanupScope::ALL
            .into_iter()
            .find(|scope| scope.as_str() == s)
            .ok_or_else(|| format!("unknown cleanup scope '{s}'"))
    }
}

/// Deletes one resource given its id.
pub type Deleter = Arc<dyn Fn(String) -> BoxFuture<'static, Result<()>> + Send + Sync>;

fn boxed<F, Fut>(f: F) -> Deleter
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |id| f(id).boxed())
}

struct Entry {
    kind: String,
    id: String,
    deleter: Option<Deleter>,
}

/// What a release did.
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    /// `(kind, id)` of every entry released successfully, in release order.
    pub released: Vec<(String, String)>,

    pub failures: Vec<CleanupFailure>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.released.len() + self.failures.len()
    }

    fn merge(&mut self, other: CleanupReport) {
        self.released.extend(other.released);
        self.failures.extend(other.failures);
    }
}

/// Cleanup entries per scope.
pub struct CleanupRegistry {
    deleters: HashMap<String, Deleter>,
    entries: HashMap<CleanupScope, Vec<Entry>>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self {
            deleters: HashMap::new(),
            entries: HashMap::new(),
        }
    }

    /// Set how resources of `kind` are deleted.
    pub fn register_kind<F, Fut>(&mut self, kind: impl Into<String>, deleter: F)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.deleters.insert(kind.into(), boxed(deleter));
    }

    /// Record a resource, deleted later through its kind's deleter.
    pub fn add(&mut self, kind: impl Into<String>, id: impl Into<String>, scope: CleanupScope) {
        self.push(kind.into(), id.into(), scope, None);
    }

    /// Record a resource with its own deleter.
    pub fn add_with<F, Fut>(
        &mut self,
        kind: impl Into<String>,
        id: impl Into<String>,
        scope: CleanupScope,
        deleter: F,
    ) where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.push(kind.into(), id.into(), scope, Some(boxed(deleter)));
    }

    /// Forget a resource that the test already deleted.
    pub fn remove(&mut self, kind: &str, id: &str, scope: CleanupScope) -> bool {
        let Some(entries) = self.entries.get_mut(&scope) else {
            return false;
        };
        match entries.iter().rposition(|e| e.kind == kind && e.id == id) {
            Some(pos) => {
                entries.remove(pos);
                debug!("cleanup: dropped {}/{} from {} scope", kind, id, scope);
                true
            }
            None => false,
        }
    }

    /// Number of entries waiting in `scope`.
    pub fn pending(&self, scope: CleanupScope) -> usize {
        self.entries.get(&scope).map_or(0, Vec::len)
    }

    /// Release every entry of `scope`, newest first, within `timeout`.
    ///
    /// Every entry is attempted even when earlier ones fail. Each deleter
    /// gets whatever is left of `timeout`; entries still waiting when it
    /// runs out are recorded as failures. Failures are logged and returned
    /// together as [`CleanupError::Partial`].
    pub async fn release(&mut self, scope: CleanupScope, timeout: Duration) -> Result<CleanupReport> {
        let deadline = Instant::now() + timeout;
        let report = self.release_scope(scope, deadline).await;
        into_result(scope.as_str(), report)
    }

    /// Release all scopes, function first and session last, sharing one
    /// `timeout`.
    pub async fn release_all(&mut self, timeout: Duration) -> Result<CleanupReport> {
        let deadline = Instant::now() + timeout;
        let mut report = CleanupReport::default();
        for scope in CleanupScope::ALL {
            report.merge(self.release_scope(scope, deadline).await);
        }
        into_result("all", report)
    }

    fn push(&mut self, kind: String, id: String, scope: CleanupScope, deleter: Option<Deleter>) {
        debug!("cleanup: registered {}/{} in {} scope", kind, id, scope);
        self.entries.entry(scope).or_default().push(Entry { kind, id, deleter });
    }

    async fn release_scope(&mut self, scope: CleanupScope, deadline: Instant) -> CleanupReport {
        let entries = self.entries.remove(&scope).unwrap_or_default();
        let mut report = CleanupReport::default();
        if entries.is_empty() {
            return report;
        }
        info!("cleanup: releasing {} entries in {} scope", entries.len(), scope);

        for entry in entries.into_iter().rev() {
            let deleter = entry
                .deleter
                .clone()
                .or_else(|| self.deleters.get(&entry.kind).cloned());
            let remaining = deadline.saturating_duration_since(Instant::now());
            let outcome = match deleter {
                _ if remaining.is_zero() => Err("cleanup deadline passed before release".to_string()),
                Some(deleter) => match tokio::time::timeout_at(deadline, deleter(entry.id.clone())).await {
                    Ok(result) => result.map_err(|e| e.to_string()),
                    Err(_) => Err(format!("timed out with {remaining:?} left of the cleanup deadline")),
                },
                None => Err(format!("no deleter registered for kind '{}'", entry.kind)),
            };

            match outcome {
                Ok(()) => {
                    debug!("cleanup: released {}/{}", entry.kind, entry.id);
                    report.released.push((entry.kind, entry.id));
                }
                Err(message) => {
                    error!("cleanup: failed to release {}/{}: {}", entry.kind, entry.id, message);
                    report.failures.push(CleanupFailure {
                        kind: entry.kind,
                        id: entry.id,
                        message,
                    });
                }
            }
        }
        report
    }
}

impl Default for CleanupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CleanupRegistry {
    fn drop(&mut self) {
        let left: usize = self.entries.values().map(Vec::len).sum();
        if left > 0 {
            warn!("cleanup registry dropped with {} unreleased entries", left);
        }
    }
}

fn into_result(scope: &str, report: CleanupReport) -> Result<CleanupReport> {
    if report.is_clean() {
        return Ok(report);
    }
    Err(Error::Cleanup(CleanupError::Partial {
        scope: scope.to_string(),
        attempted: report.attempted(),
        failures: report.failures,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::{ErrorKind, SessionError};

    type Calls = Arc<Mutex<Vec<String>>>;

    fn recording(calls: &Calls, fail_on: &'static str) -> impl Fn(String) -> std::future::Ready<Result<()>> + Send + Sync + 'static {
        let calls = calls.clone();
        move |id: String| {
            calls.lock().unwrap().push(id.clone());
            if id == fail_on {
                std::future::ready(Err(SessionError::Closed.into()))
            } else {
                std::future::ready(Ok(()))
            }
        }
    }

    #[tokio::test]
    async fn test_release_in_reverse_order() {
        let calls = Calls::default();
        let mut cleanup = CleanupRegistry::new();
        cleanup.register_kind("volume", recording(&calls, ""));
        cleanup.add("volume", "v1", CleanupScope::Function);
        cleanup.add("volume", "v2", CleanupScope::Function);
        cleanup.add("volume", "v3", CleanupScope::Function);

        let report = cleanup.release(CleanupScope::Function, Duration::from_secs(60)).await.unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["v3", "v2", "v1"]);
        assert_eq!(report.released.len(), 3);
        assert_eq!(cleanup.pending(CleanupScope::Function), 0);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_release() {
        let calls = Calls::default();
        let mut cleanup = CleanupRegistry::new();
        cleanup.register_kind("volume", recording(&calls, "v2"));
        for id in ["v1", "v2", "v3"] {
            cleanup.add("volume", id, CleanupScope::Function);
        }

        let err = cleanup.release(CleanupScope::Function, Duration::from_secs(60)).await.unwrap_err();
        assert_eq!(*calls.lock().unwrap(), vec!["v3", "v2", "v1"]);
        assert_eq!(err.kind(), ErrorKind::CleanupPartial);
        match err {
            Error::Cleanup(CleanupError::Partial {
                attempted,
                failures,
                ..
            }) => {
                assert_eq!(attempted, 3);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].id, "v2");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(cleanup.pending(CleanupScope::Function), 0);
    }

    #[tokio::test]
    async fn test_scopes_are_independent() {
        let calls = Calls::default();
        let mut cleanup = CleanupRegistry::new();
        cleanup.register_kind("subcloud", recording(&calls, ""));
        cleanup.add("subcloud", "subcloud1", CleanupScope::Module);
        cleanup.add("subcloud", "subcloud2", CleanupScope::Function);

        cleanup.release(CleanupScope::Function, Duration::from_secs(60)).await.unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["subcloud2"]);
        assert_eq!(cleanup.pending(CleanupScope::Module), 1);

        let report = cleanup.release_all(Duration::from_secs(60)).await.unwrap();
        assert_eq!(report.released, vec![("subcloud".to_string(), "subcloud1".to_string())]);
    }

    #[tokio::test]
    async fn test_add_with_and_missing_kind() {
        let calls = Calls::default();
        let mut cleanup = CleanupRegistry::new();
        cleanup.add_with("app", "stx-openstack", CleanupScope::Class, recording(&calls, ""));
        cleanup.add("port", "p1", CleanupScope::Class);

        let err = cleanup.release(CleanupScope::Class, Duration::from_secs(60)).await.unwrap_err();
        assert!(err.to_string().contains("1 of 2"));
        assert_eq!(*calls.lock().unwrap(), vec!["stx-openstack"]);
    }

    #[tokio::test]
    async fn test_remove_skips_entry() {
        let calls = Calls::default();
        let mut cleanup = CleanupRegistry::new();
        cleanup.register_kind("volume", recording(&calls, ""));
        cleanup.add("volume", "v1", CleanupScope::Function);
        cleanup.add("volume", "v2", CleanupScope::Function);

        assert!(cleanup.remove("volume", "v1", CleanupScope::Function));
        assert!(!cleanup.remove("volume", "v1", CleanupScope::Function));
        cleanup.release(CleanupScope::Function, Duration::from_secs(60)).await.unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["v2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_deleter_times_out() {
        let mut cleanup = CleanupRegistry::new();
        cleanup.register_kind("image", |_id: String| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });
        cleanup.add("image", "cirros", CleanupScope::Session);

        let err = cleanup
            .release(CleanupScope::Session, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Cleanup(CleanupError::Partial { ref failures, .. })
                if failures[0].message.contains("timed out")
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_bounded_by_overall_deadline() {
        let calls = Calls::default();
        let mut cleanup = CleanupRegistry::new();
        let seen = calls.clone();
        cleanup.register_kind("volume", move |id: String| {
            seen.lock().unwrap().push(id);
            async {
                tokio::time::sleep(Duration::from_secs(4)).await;
                Ok(())
            }
        });
        for id in ["v1", "v2", "v3"] {
            cleanup.add("volume", id, CleanupScope::Function);
        }

        let start = Instant::now();
        let err = cleanup
            .release(CleanupScope::Function, Duration::from_secs(6))
            .await
            .unwrap_err();

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(6) && elapsed < Duration::from_secs(7));
        assert_eq!(*calls.lock().unwrap(), vec!["v3", "v2"]);
        match err {
            Error::Cleanup(CleanupError::Partial {
                attempted,
                failures,
                ..
            }) => {
                assert_eq!(attempted, 3);
                let ids: Vec<&str> = failures.iter().map(|f| f.id.as_str()).collect();
                assert_eq!(ids, vec!["v2", "v1"]);
                assert!(failures[1].message.contains("deadline passed"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(cleanup.pending(CleanupScope::Function), 0);
    }

    #[test]
    fn test_scope_names() {
        assert_eq!("module".parse::<CleanupScope>().unwrap(), CleanupScope::Module);
        assert!("suite".parse::<CleanupScope>().is_err());
        assert_eq!(CleanupScope::Session.to_string(), "session");
    }
}
