//! Teardown on graceful termination.
//!
//! The hook is installed at most once per bus. The bus also tears itself down
//! when dropped, which covers a normal return from `main` and unwinding
//! panics; nothing covers SIGKILL or abort.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::config::SignalPolicy;

/// Exit status used after cleaning up on a signal (128 + SIGINT).
pub const SIGNAL_EXIT_CODE: i32 = 130;

/// Installs the termination hook for one bus.
#[derive(Debug)]
pub struct CleanupCoordinator {
    policy: SignalPolicy,
    registered: AtomicBool,
}

impl CleanupCoordinator {
    pub fn new(policy: SignalPolicy) -> Self {
        Self {
            policy,
            registered: AtomicBool::new(false),
        }
    }

    /// Whether a hook has been installed.
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    /// Install the hook running `teardown` on Ctrl-C or SIGTERM.
    ///
    /// Returns `false` when the hook was already installed or the policy is
    /// [`SignalPolicy::Ignore`].
    pub fn register<F>(&self, runtime: &Handle, teardown: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.policy == SignalPolicy::Ignore {
            return false;
        }
        if self.registered.swap(true, Ordering::SeqCst) {
            debug!("Cleanup hook already registered");
            return false;
        }

        let policy = self.policy;
        runtime.spawn(async move {
            if let Err(e) = termination().await {
                warn!("Failed to listen for termination signals: {e}");
                return;
            }

            info!("Termination signal received, cleaning up event bus");
            teardown();

            if policy == SignalPolicy::CleanupAndExit {
                std::process::exit(SIGNAL_EXIT_CODE);
            }
        });

        debug!("Registered cleanup hook ({policy:?})");
        true
    }
}

#[cfg(unix)]
async fn termination() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn termination() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
