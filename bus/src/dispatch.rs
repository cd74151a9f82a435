//! Per-event dispatch loop.
//!
//! Each registered event gets one task that takes notifications off its
//! subscription one at a time and runs read, decode, invoke, delete for the
//! file named in the notification before taking the next one.

use std::any::Any;
use std::ffi::OsStr;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::codec::Message;
use crate::error::CodecError;
use crate::watcher::{ChangeEvent, Subscription, SubscriptionGuard};

/// A listener callback. Receives the message arguments in order.
pub type Callback = Arc<dyn Fn(&[String]) + Send + Sync>;

/// Callbacks for one event, shared between the registry and its dispatcher.
pub(crate) type CallbackList = Arc<RwLock<Vec<Callback>>>;

/// What happened to a single notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// The file was gone, e.g. a removal notification or an already
    /// consumed message.
    Missing,

    /// The file was empty or could not be read yet.
    NotReady,

    /// The content was not a message. The file is left for a later write.
    Malformed,

    /// Callbacks ran and deletion was attempted.
    Delivered { invoked: usize, panicked: usize },
}

/// Owned handle to a running dispatcher.
///
/// Dropping it (or calling [`WatcherHandle::close`]) stops the OS watch and
/// tells the task to stop before it takes another notification. A dispatch
/// already in progress runs to completion.
#[derive(Debug)]
pub(crate) struct WatcherHandle {
    event: String,
    _guard: SubscriptionGuard,
    _stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    /// Stop watching.
    pub(crate) fn close(self) {
        debug!(
            "Closing watcher for event {} (finished: {})",
            self.event,
            self.task.is_finished()
        );
    }
}

/// Start the dispatcher for `event` on `runtime`.
pub(crate) fn spawn(
    runtime: &Handle,
    event: String,
    dir: PathBuf,
    subscription: Subscription,
    callbacks: CallbackList,
) -> WatcherHandle {
    let (events, guard) = subscription.into_parts();
    let (stop_tx, stop_rx) = oneshot::channel();
    let task = runtime.spawn(run(event.clone(), dir, events, stop_rx, callbacks));

    WatcherHandle {
        event,
        _guard: guard,
        _stop: stop_tx,
        task,
    }
}

async fn run(
    event: String,
    dir: PathBuf,
    mut events: mpsc::Receiver<ChangeEvent>,
    mut stop: oneshot::Receiver<()>,
    callbacks: CallbackList,
) {
    loop {
        let change = tokio::select! {
            biased;
            _ = &mut stop => break,
            change = events.recv() => match change {
                Some(change) => change,
                None => break,
            },
        };

        if !change.may_have_content() {
            continue;
        }
        let Some(file_name) = change.path.file_name() else {
            continue;
        };

        match dispatch(&event, &dir, file_name, &callbacks).await {
            Outcome::Delivered { invoked, panicked } => debug!(
                "Delivered {} to {invoked} listener(s) for event {event}, {panicked} panicked (observed {})",
                change.path.display(),
                change.observed_at.format("%H:%M:%S%.3f")
            ),
            outcome => debug!("Skipped {}: {outcome:?}", change.path.display()),
        }
    }

    debug!("Dispatcher for event {event} stopped");
}

/// Handle one notification for `file_name` inside `dir`.
pub(crate) async fn dispatch(
    event: &str,
    dir: &Path,
    file_name: &OsStr,
    callbacks: &CallbackList,
) -> Outcome {
    let path = dir.join(file_name);

    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Outcome::Missing,
        Err(e) => {
            warn!("Failed to read message {}: {e}", path.display());
            return Outcome::NotReady;
        }
    };

    let message = match Message::decode(&bytes) {
        Ok(message) => message,
        Err(CodecError::Empty) => {
            debug!("Message {} is empty, waiting for the writer", path.display());
            return Outcome::NotReady;
        }
        Err(e) => {
            warn!("Dropping notification for {}: {e}", path.display());
            return Outcome::Malformed;
        }
    };

    // Clone out so callbacks may register further listeners.
    let callbacks: Vec<Callback> = callbacks
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();

    let mut panicked = 0;
    for callback in &callbacks {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(message.args()))) {
            panicked += 1;
            error!(
                "Listener for event {event} panicked: {}",
                panic_message(payload.as_ref())
            );
        }
    }

    match tokio::fs::remove_file(&path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to delete message {}: {e}", path.display()),
    }

    Outcome::Delivered {
        invoked: callbacks.len(),
        panicked,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
