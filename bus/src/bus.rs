//! Listener registry.
//!
//! The bus owns one entry per event: the callbacks registered for it and the
//! watcher feeding its dispatcher. Directories and watchers are created with
//! the first listener of an event and destroyed with its removal.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cleanup::CleanupCoordinator;
use crate::config::BusConfig;
use crate::dispatch::{self, Callback, CallbackList, WatcherHandle};
use crate::error::{BusError, Result};
use crate::sender::Sender;
use crate::store::BufferStore;
use crate::watcher::{ChangeNotifier, NotifyWatcher};

/// An event's callbacks plus the watcher dispatching to them.
struct ListenerEntry {
    callbacks: CallbackList,
    watcher: WatcherHandle,
}

#[derive(Default)]
struct BusState {
    listeners: HashMap<String, ListenerEntry>,

    /// Whether this bus created the buffer root and has not removed it since.
    root_ready: bool,

    closed: bool,
}

struct BusInner {
    store: BufferStore,
    notifier: Box<dyn ChangeNotifier>,
    runtime: Handle,
    cleanup: CleanupCoordinator,
    state: Mutex<BusState>,
    shutdown_tx: watch::Sender<bool>,
}

/// Process-local side of the event bus.
///
/// Construct one per process, register listeners on it, and call
/// [`EventBus::shutdown`] when done. Dropping the bus removes its directories
/// as well.
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus with the `notify` backend chosen by `config`.
    ///
    /// Must be called inside a tokio runtime; dispatchers run on it.
    pub fn new(config: BusConfig) -> Result<Self> {
        let notifier = NotifyWatcher::new(config.backend, config.channel_capacity);
        Self::with_notifier(config, notifier)
    }

    /// Create a bus using the environment and the current directory.
    pub fn discover() -> Result<Self> {
        Self::new(BusConfig::from_env())
    }

    /// Create a bus with a custom change notification source.
    pub fn with_notifier(
        config: BusConfig,
        notifier: impl ChangeNotifier + 'static,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| BusError::NoRuntime)?;
        let store = BufferStore::new(config.buffer_root()?, config.encode_event_names);
        let (shutdown_tx, _) = watch::channel(false);

        debug!("Created event bus at {}", store.root().display());

        Ok(Self {
            inner: Arc::new(BusInner {
                store,
                notifier: Box::new(notifier),
                runtime,
                cleanup: CleanupCoordinator::new(config.signal_policy),
                state: Mutex::new(BusState::default()),
                shutdown_tx,
            }),
        })
    }

    /// The buffer root directory.
    pub fn root(&self) -> &Path {
        self.inner.store.root()
    }

    /// A sender writing into this bus's buffer.
    pub fn sender(&self) -> Sender {
        Sender::from_store(self.inner.store.clone())
    }

    /// Register `callback` for `event`.
    ///
    /// The first registration creates the buffer root, clearing anything left
    /// from an earlier run, and installs the cleanup hook. The first listener
    /// of an event creates its directory, discarding undelivered messages, and
    /// starts watching it.
    pub fn add_listener(&self, event: &str, callback: Option<Callback>) -> Result<()> {
        if event.is_empty() {
            return Err(BusError::EventNameNotDefined);
        }
        let callback = callback.ok_or(BusError::CallbackNotDefined)?;
        self.inner.store.dir_name(event)?;

        let mut state = self.inner.lock();
        if state.closed {
            return Err(BusError::ShutDown);
        }

        if !state.root_ready {
            self.inner.store.reset_root()?;
            state.root_ready = true;

            let bus = Arc::downgrade(&self.inner);
            self.inner
                .cleanup
                .register(&self.inner.runtime, move || teardown_on_signal(&bus));
        }

        if let Some(entry) = state.listeners.get(event) {
            let mut callbacks = entry
                .callbacks
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            callbacks.push(callback);
            debug!("Added listener #{} for event {event}", callbacks.len());
            return Ok(());
        }

        let dir = self.inner.store.reset_event_dir(event)?;
        let subscription = match self.inner.notifier.subscribe(&dir) {
            Ok(subscription) => subscription,
            Err(e) => {
                if let Err(cleanup) = self.inner.store.remove_event_dir(event) {
                    warn!("Failed to remove {}: {cleanup}", dir.display());
                }
                return Err(e);
            }
        };

        let callbacks: CallbackList = Arc::new(RwLock::new(vec![callback]));
        let watcher = dispatch::spawn(
            &self.inner.runtime,
            event.to_string(),
            dir,
            subscription,
            callbacks.clone(),
        );
        state
            .listeners
            .insert(event.to_string(), ListenerEntry { callbacks, watcher });

        info!("Listening for event {event}");
        Ok(())
    }

    /// Register a closure for `event`.
    pub fn on<F>(&self, event: &str, callback: F) -> Result<()>
    where
        F: Fn(&[String]) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        self.add_listener(event, Some(callback))
    }

    /// Remove every listener for `event`, stop its watcher and delete its
    /// directory with any pending messages.
    pub fn remove_listeners(&self, event: &str) -> Result<()> {
        let mut state = self.inner.lock();
        let entry = state
            .listeners
            .remove(event)
            .ok_or_else(|| BusError::ListenerDoesNotExist(event.to_string()))?;

        entry.watcher.close();
        self.inner.store.remove_event_dir(event)?;

        info!("Removed listeners for event {event}");
        Ok(())
    }

    /// Remove all listeners and delete the buffer root. Safe to call when
    /// nothing is registered.
    pub fn remove_all_listeners(&self) -> Result<()> {
        self.inner.remove_all()
    }

    /// Remove all listeners and refuse further registrations.
    pub fn shutdown(&self) -> Result<()> {
        self.inner.shutdown()
    }

    /// Whether the bus has been shut down.
    pub fn is_shut_down(&self) -> bool {
        *self.inner.shutdown_tx.borrow()
    }

    /// Wait until the bus is shut down, by [`EventBus::shutdown`] or by the
    /// cleanup hook.
    pub async fn wait_for_shutdown(&self) {
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();
        // The sender lives in `inner`, which outlives this borrow.
        let _ = shutdown_rx.wait_for(|closed| *closed).await;
    }

    /// Events with at least one listener, sorted.
    pub fn events(&self) -> Vec<String> {
        let mut events: Vec<String> = self.inner.lock().listeners.keys().cloned().collect();
        events.sort();
        events
    }

    /// Number of callbacks registered for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.inner.lock().listeners.get(event).map_or(0, |entry| {
            entry
                .callbacks
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .len()
        })
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("root", &self.root())
            .field("events", &self.events())
            .finish()
    }
}

impl BusInner {
    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove_all(&self) -> Result<()> {
        let mut state = self.lock();
        self.remove_all_locked(&mut state)
    }

    fn remove_all_locked(&self, state: &mut BusState) -> Result<()> {
        close_all(state);
        self.store.remove_root()?;
        state.root_ready = false;

        info!("Removed all listeners");
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        let result = {
            let mut state = self.lock();
            state.closed = true;
            self.remove_all_locked(&mut state)
        };
        self.shutdown_tx.send_replace(true);
        result
    }
}

impl Drop for BusInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !state.root_ready && state.listeners.is_empty() {
            return;
        }

        close_all(state);
        if let Err(e) = self.store.remove_root() {
            warn!(
                "Failed to remove buffer root {}: {e}",
                self.store.root().display()
            );
        }
        debug!("Event bus dropped");
    }
}

fn close_all(state: &mut BusState) {
    for (event, entry) in state.listeners.drain() {
        entry.watcher.close();
        debug!("Closed watcher for event {event}");
    }
}

fn teardown_on_signal(bus: &Weak<BusInner>) {
    let Some(bus) = bus.upgrade() else {
        return;
    };
    if let Err(e) = bus.shutdown() {
        warn!("Failed to clean up event bus: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SignalPolicy;
    use crate::watcher::{ChangeEvent, ChangeKind, Subscription};
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    /// Notifier driven by the test instead of the OS.
    #[derive(Clone, Default)]
    struct ManualNotifier {
        senders: Arc<Mutex<HashMap<PathBuf, mpsc::Sender<ChangeEvent>>>>,
    }

    impl ManualNotifier {
        fn sender(&self, dir: &Path) -> mpsc::Sender<ChangeEvent> {
            self.senders.lock().unwrap().get(dir).cloned().unwrap()
        }

        async fn touch(&self, dir: &Path, name: &str) {
            let tx = self.sender(dir);
            tx.send(ChangeEvent::new(ChangeKind::Created, dir.join(name)))
                .await
                .unwrap();
        }
    }

    impl ChangeNotifier for ManualNotifier {
        fn subscribe(&self, dir: &Path) -> Result<Subscription> {
            let (tx, rx) = mpsc::channel(16);
            self.senders.lock().unwrap().insert(dir.to_path_buf(), tx);
            Ok(Subscription::new(rx, ()))
        }
    }

    fn config(temp_dir: &TempDir) -> BusConfig {
        BusConfig::new()
            .with_project_root(temp_dir.path())
            .with_signal_policy(SignalPolicy::Ignore)
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_requires_runtime() {
        let temp_dir = TempDir::new().unwrap();
        let err = EventBus::new(config(&temp_dir)).unwrap_err();
        assert!(matches!(err, BusError::NoRuntime));
    }

    #[tokio::test]
    async fn test_root_created_lazily() {
        let temp_dir = TempDir::new().unwrap();
        let bus = EventBus::with_notifier(config(&temp_dir), ManualNotifier::default()).unwrap();
        assert!(!bus.root().exists());

        bus.on("greet", |_| {}).unwrap();
        assert!(bus.root().join("greet").is_dir());
        assert_eq!(bus.events(), ["greet"]);
    }

    #[tokio::test]
    async fn test_manual_notification_dispatches() {
        let temp_dir = TempDir::new().unwrap();
        let notifier = ManualNotifier::default();
        let bus = EventBus::with_notifier(config(&temp_dir), notifier.clone()).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        bus.on("tick", move |args| {
            assert_eq!(args, ["a"]);
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        let path = bus.sender().send("tick", &["a"]).unwrap();
        notifier.touch(&bus.root().join("tick"), "1").await;

        eventually(|| calls.load(Ordering::SeqCst) == 1).await;
        eventually(|| !path.exists()).await;
    }

    #[tokio::test]
    async fn test_second_listener_reuses_entry() {
        let temp_dir = TempDir::new().unwrap();
        let bus = EventBus::with_notifier(config(&temp_dir), ManualNotifier::default()).unwrap();

        bus.on("tick", |_| {}).unwrap();
        let pending = bus.sender().send("tick", &["kept"]).unwrap();
        bus.on("tick", |_| {}).unwrap();

        assert_eq!(bus.listener_count("tick"), 2);
        // Only the first listener clears the directory.
        assert!(pending.exists());
    }

    fn counting_listener(bus: &EventBus, event: &str) -> Arc<AtomicUsize> {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        bus.on(event, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        calls
    }

    #[tokio::test]
    async fn test_no_dispatch_after_remove_listeners() {
        let temp_dir = TempDir::new().unwrap();
        let notifier = ManualNotifier::default();
        let bus = EventBus::with_notifier(config(&temp_dir), notifier.clone()).unwrap();
        let calls = counting_listener(&bus, "tick");

        let dir = bus.root().join("tick");
        let pending = bus.sender().send("tick", &["late"]).unwrap();
        let tx = notifier.sender(&dir);

        bus.remove_listeners("tick").unwrap();
        assert!(!pending.exists());

        // Recreate the file behind the bus's back and report it.
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(&pending, r#"["late"]"#).unwrap();
        eventually(|| tx.is_closed()).await;
        assert!(
            tx.try_send(ChangeEvent::new(ChangeKind::Created, pending.clone()))
                .is_err()
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(pending.exists());
    }

    #[tokio::test]
    async fn test_no_dispatch_after_remove_all_listeners() {
        let temp_dir = TempDir::new().unwrap();
        let notifier = ManualNotifier::default();
        let bus = EventBus::with_notifier(config(&temp_dir), notifier.clone()).unwrap();
        let ticks = counting_listener(&bus, "tick");
        let tocks = counting_listener(&bus, "tock");

        let tick_tx = notifier.sender(&bus.root().join("tick"));
        let tock_tx = notifier.sender(&bus.root().join("tock"));

        bus.remove_all_listeners().unwrap();

        eventually(|| tick_tx.is_closed() && tock_tx.is_closed()).await;
        assert!(
            tick_tx
                .try_send(ChangeEvent::new(ChangeKind::Created, bus.root().join("tick/1")))
                .is_err()
        );
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
        assert_eq!(tocks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_listeners() {
        let temp_dir = TempDir::new().unwrap();
        let bus = EventBus::with_notifier(config(&temp_dir), ManualNotifier::default()).unwrap();
        bus.on("tick", |_| {}).unwrap();

        bus.shutdown().unwrap();
        bus.wait_for_shutdown().await;

        assert!(bus.is_shut_down());
        assert!(!bus.root().exists());
        assert!(matches!(bus.on("tick", |_| {}), Err(BusError::ShutDown)));
    }

    #[tokio::test]
    async fn test_drop_removes_root() {
        let temp_dir = TempDir::new().unwrap();
        let root = {
            let bus =
                EventBus::with_notifier(config(&temp_dir), ManualNotifier::default()).unwrap();
            bus.on("tick", |_| {}).unwrap();
            bus.root().to_path_buf()
        };
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_invalid_event_name() {
        let temp_dir = TempDir::new().unwrap();
        let bus = EventBus::with_notifier(config(&temp_dir), ManualNotifier::default()).unwrap();

        assert!(matches!(
            bus.on("..", |_| {}),
            Err(BusError::InvalidEventName(_))
        ));
        assert!(!bus.root().exists());
    }
}
