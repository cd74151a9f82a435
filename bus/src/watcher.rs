//! Directory change notification.
//!
//! The bus only needs one capability from the OS: subscribe to a directory and
//! receive a stream of changes until the subscription is dropped. Each call to
//! [`ChangeNotifier::subscribe`] starts a fresh stream; streams are not resumed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::event::{AccessKind, AccessMode};
use notify::{PollWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::config::WatchBackend;
use crate::error::Result;

/// A change observed in a watched directory.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// The kind of change.
    pub kind: ChangeKind,

    /// Path of the affected entry.
    pub path: PathBuf,

    /// When the change was received.
    pub observed_at: DateTime<Utc>,
}

impl ChangeEvent {
    /// Create a new change event.
    pub fn new(kind: ChangeKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            observed_at: Utc::now(),
        }
    }

    /// Whether the change can have produced readable content.
    pub fn may_have_content(&self) -> bool {
        matches!(
            self.kind,
            ChangeKind::Created | ChangeKind::Modified | ChangeKind::Other
        )
    }
}

/// Kind of directory change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Entry was created.
    Created,

    /// Entry content, name or metadata changed, or a writer closed it.
    Modified,

    /// Entry was removed.
    Removed,

    /// Entry was opened or read.
    Accessed,

    /// Backend could not classify the change.
    Other,
}

impl From<notify::EventKind> for ChangeKind {
    fn from(kind: notify::EventKind) -> Self {
        match kind {
            notify::EventKind::Create(_) => Self::Created,
            notify::EventKind::Modify(_) => Self::Modified,
            notify::EventKind::Access(AccessKind::Close(AccessMode::Write)) => Self::Modified,
            notify::EventKind::Access(_) => Self::Accessed,
            notify::EventKind::Remove(_) => Self::Removed,
            notify::EventKind::Any | notify::EventKind::Other => Self::Other,
        }
    }
}

/// Keeps the OS-level watch alive. Dropping it stops notifications.
pub struct SubscriptionGuard(#[allow(dead_code)] Box<dyn Send>);

impl std::fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SubscriptionGuard")
    }
}

/// A live stream of changes for one directory.
#[derive(Debug)]
pub struct Subscription {
    events: mpsc::Receiver<ChangeEvent>,
    guard: SubscriptionGuard,
}

impl Subscription {
    /// Wrap a change stream and whatever keeps its source alive.
    pub fn new(events: mpsc::Receiver<ChangeEvent>, guard: impl Send + 'static) -> Self {
        Self {
            events,
            guard: SubscriptionGuard(Box::new(guard)),
        }
    }

    /// Wait for the next change. `None` once the source has stopped.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    /// Split into the change stream and the guard, so the two can be owned
    /// by different parties.
    pub fn into_parts(self) -> (mpsc::Receiver<ChangeEvent>, SubscriptionGuard) {
        (self.events, self.guard)
    }
}

/// Source of directory change notifications.
pub trait ChangeNotifier: Send + Sync {
    /// Start watching `dir` (non-recursively).
    fn subscribe(&self, dir: &Path) -> Result<Subscription>;
}

/// [`ChangeNotifier`] backed by the `notify` crate.
#[derive(Debug, Clone)]
pub struct NotifyWatcher {
    backend: WatchBackend,
    capacity: usize,
}

impl NotifyWatcher {
    /// Create a notifier for the given backend and channel capacity.
    pub fn new(backend: WatchBackend, capacity: usize) -> Self {
        Self {
            backend,
            capacity: capacity.max(1),
        }
    }
}

impl ChangeNotifier for NotifyWatcher {
    fn subscribe(&self, dir: &Path) -> Result<Subscription> {
        let (event_tx, event_rx) = mpsc::channel(self.capacity);

        // Runs on the backend's own thread, so blocking_send is allowed.
        let handler = move |res: std::result::Result<notify::Event, notify::Error>| match res {
            Ok(event) => {
                let kind = ChangeKind::from(event.kind);
                for path in event.paths {
                    if event_tx.blocking_send(ChangeEvent::new(kind, path)).is_err() {
                        debug!("Change stream closed, dropping notification");
                        return;
                    }
                }
            }
            Err(e) => {
                error!("Watch error: {e}");
            }
        };

        match self.backend {
            WatchBackend::Native => {
                let mut watcher = notify::recommended_watcher(handler)?;
                watcher.watch(dir, RecursiveMode::NonRecursive)?;
                debug!("Started watching: {}", dir.display());
                Ok(Subscription::new(event_rx, watcher))
            }
            WatchBackend::Poll { interval_ms } => {
                let config = notify::Config::default()
                    .with_poll_interval(Duration::from_millis(interval_ms.max(1)));
                let mut watcher = PollWatcher::new(handler, config)?;
                watcher.watch(dir, RecursiveMode::NonRecursive)?;
                debug!(
                    "Started polling {} every {interval_ms}ms",
                    dir.display()
                );
                Ok(Subscription::new(event_rx, watcher))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_change_kind_from_notify() {
        use notify::event::{CreateKind, DataChange, ModifyKind, RemoveKind};

        assert_eq!(
            ChangeKind::from(notify::EventKind::Create(CreateKind::File)),
            ChangeKind::Created
        );
        assert_eq!(
            ChangeKind::from(notify::EventKind::Modify(ModifyKind::Data(DataChange::Any))),
            ChangeKind::Modified
        );
        assert_eq!(
            ChangeKind::from(notify::EventKind::Access(AccessKind::Close(AccessMode::Write))),
            ChangeKind::Modified
        );
        assert_eq!(
            ChangeKind::from(notify::EventKind::Access(AccessKind::Read)),
            ChangeKind::Accessed
        );
        assert_eq!(
            ChangeKind::from(notify::EventKind::Remove(RemoveKind::File)),
            ChangeKind::Removed
        );
    }

    #[test]
    fn test_may_have_content() {
        assert!(ChangeEvent::new(ChangeKind::Created, "/q/1").may_have_content());
        assert!(!ChangeEvent::new(ChangeKind::Removed, "/q/1").may_have_content());
        assert!(!ChangeEvent::new(ChangeKind::Accessed, "/q/1").may_have_content());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_native_subscription_reports_new_file() {
        let temp_dir = TempDir::new().unwrap();
        let notifier = NotifyWatcher::new(WatchBackend::Native, 16);
        let mut subscription = notifier.subscribe(temp_dir.path()).unwrap();

        fs::write(temp_dir.path().join("1"), r#"["x"]"#).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), subscription.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.path.file_name().unwrap(), "1");
        assert!(event.may_have_content());
    }

    #[test]
    fn test_subscription_pending_until_change() {
        use tokio_test::{assert_pending, assert_ready, task};

        let (tx, rx) = mpsc::channel(4);
        let mut subscription = Subscription::new(rx, ());

        let mut next = task::spawn(subscription.next());
        assert_pending!(next.poll());

        tx.try_send(ChangeEvent::new(ChangeKind::Created, "/q/1")).unwrap();
        assert!(next.is_woken());
        let event = assert_ready!(next.poll()).unwrap();
        assert_eq!(event.kind, ChangeKind::Created);
        drop(next);

        drop(tx);
        let mut next = task::spawn(subscription.next());
        assert!(assert_ready!(next.poll()).is_none());
    }

    #[test]
    fn test_subscribe_missing_dir_fails() {
        let temp_dir = TempDir::new().unwrap();
        let notifier = NotifyWatcher::new(WatchBackend::Native, 16);
        assert!(notifier.subscribe(&temp_dir.path().join("missing")).is_err());
    }
}
