//! Configuration for the event bus.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::project_root;

/// Name of the buffer directory created under the project root.
pub const DEFAULT_BUFFER_DIR: &str = ".filebus";

/// Environment variable overriding [`BusConfig::buffer_dir_name`].
pub const BUFFER_DIR_ENV: &str = "FILEBUS_BUFFER_DIR";

/// Configuration shared by listening and sending processes.
///
/// Both sides must agree on `project_root` (or discover the same one) and on
/// `buffer_dir_name`, otherwise they will look at different directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Explicit project root. Discovered from the current directory when unset.
    pub project_root: Option<PathBuf>,

    /// Name of the buffer directory inside the project root.
    pub buffer_dir_name: String,

    /// File names marking a project root during discovery.
    pub root_markers: Vec<String>,

    /// Whether event names are percent-encoded before use as directory names.
    pub encode_event_names: bool,

    /// How event directories are watched.
    pub backend: WatchBackend,

    /// Capacity of each watcher's notification channel.
    pub channel_capacity: usize,

    /// What the bus does when the process receives a termination signal.
    pub signal_policy: SignalPolicy,
}

impl BusConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self {
            project_root: None,
            buffer_dir_name: DEFAULT_BUFFER_DIR.to_string(),
            root_markers: project_root::DEFAULT_MARKERS
                .iter()
                .map(ToString::to_string)
                .collect(),
            encode_event_names: true,
            backend: WatchBackend::default(),
            channel_capacity: 256,
            signal_policy: SignalPolicy::default(),
        }
    }

    /// Create a config with defaults and environment overrides applied.
    pub fn from_env() -> Self {
        Self::new().with_env(|key| std::env::var(key).ok())
    }

    /// Apply environment overrides read through `lookup`.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(name) = lookup(BUFFER_DIR_ENV).filter(|name| !name.trim().is_empty()) {
            self.buffer_dir_name = name;
        }
        self
    }

    /// Use an explicit project root instead of discovering one.
    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = Some(root.into());
        self
    }

    /// Set the buffer directory name.
    pub fn with_buffer_dir_name(mut self, name: impl Into<String>) -> Self {
        self.buffer_dir_name = name.into();
        self
    }

    /// Replace the project root markers.
    pub fn with_root_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.root_markers = markers.into_iter().map(Into::into).collect();
        self
    }

    /// Use event names verbatim as directory names.
    pub fn raw_event_names(mut self) -> Self {
        self.encode_event_names = false;
        self
    }

    /// Set the watch backend.
    pub fn with_backend(mut self, backend: WatchBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Set the signal policy.
    pub fn with_signal_policy(mut self, policy: SignalPolicy) -> Self {
        self.signal_policy = policy;
        self
    }

    /// Resolve the buffer root directory: `<projectRoot>/<bufferDirName>`.
    pub fn buffer_root(&self) -> Result<PathBuf> {
        let project_root = match &self.project_root {
            Some(root) => root.clone(),
            None => project_root::discover(&self.root_markers)?,
        };
        Ok(project_root.join(&self.buffer_dir_name))
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// How event directories are watched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum WatchBackend {
    /// The platform's native change notification (inotify, FSEvents, ...).
    #[default]
    Native,

    /// Periodic scans, for filesystems without native notification.
    Poll {
        /// Milliseconds between scans.
        interval_ms: u64,
    },
}

impl WatchBackend {
    /// Polling backend with the given interval.
    pub fn poll(interval: Duration) -> Self {
        Self::Poll {
            interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// What happens to the bus when the process is asked to terminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SignalPolicy {
    /// Install no signal handler. Cleanup relies on `shutdown` or drop.
    Ignore,

    /// Tear the bus down and wake `wait_for_shutdown` waiters.
    Cleanup,

    /// Tear the bus down, then exit the process.
    #[default]
    CleanupAndExit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    #[test]
    fn test_config_defaults() {
        let config = BusConfig::new();

        assert_eq!(config.buffer_dir_name, DEFAULT_BUFFER_DIR);
        assert!(config.encode_event_names);
        assert_eq!(config.backend, WatchBackend::Native);
        assert_eq!(config.signal_policy, SignalPolicy::CleanupAndExit);
        assert!(config.root_markers.iter().any(|m| m == "Cargo.toml"));
    }

    #[test]
    fn test_env_override() {
        let config = BusConfig::new().with_env(|key| {
            (key == BUFFER_DIR_ENV).then(|| ".custom-bus".to_string())
        });
        assert_eq!(config.buffer_dir_name, ".custom-bus");

        let config = BusConfig::new().with_env(|_| Some("   ".to_string()));
        assert_eq!(config.buffer_dir_name, DEFAULT_BUFFER_DIR);
    }

    #[test]
    fn test_buffer_root_with_explicit_project_root() {
        let config = BusConfig::new()
            .with_project_root("/work/app")
            .with_buffer_dir_name(".queue");

        assert_eq!(
            config.buffer_root().unwrap(),
            Path::new("/work/app/.queue")
        );
    }

    #[test]
    fn test_backend_serde() {
        let backend = WatchBackend::poll(Duration::from_millis(250));
        let json = serde_json::to_string(&backend).unwrap();
        assert_eq!(json, r#"{"kind":"poll","interval_ms":250}"#);

        let parsed: WatchBackend = serde_json::from_str(r#"{"kind":"native"}"#).unwrap();
        assert_eq!(parsed, WatchBackend::Native);
    }
}
