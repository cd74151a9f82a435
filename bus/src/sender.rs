//! Sending events to a listening process.

use std::collections::HashSet;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::codec::Message;
use crate::config::BusConfig;
use crate::error::{BusError, Result};
use crate::store::BufferStore;

/// Drops message files into a listener's event directories.
///
/// Sending needs no runtime and holds no state besides the buffer location.
/// Filename allocation scans then writes, so two processes sending to the same
/// event at the same moment can pick the same name.
#[derive(Debug, Clone)]
pub struct Sender {
    store: BufferStore,
}

impl Sender {
    /// Create a sender for the buffer described by `config`.
    pub fn new(config: &BusConfig) -> Result<Self> {
        let root = config.buffer_root()?;
        Ok(Self::from_store(BufferStore::new(root, config.encode_event_names)))
    }

    /// Create a sender using the environment and the current directory.
    pub fn discover() -> Result<Self> {
        Self::new(&BusConfig::from_env())
    }

    pub(crate) fn from_store(store: BufferStore) -> Self {
        Self { store }
    }

    /// The buffer root this sender writes into.
    pub fn root(&self) -> &Path {
        self.store.root()
    }

    /// Queue `messages` for the listeners of `event`.
    ///
    /// Returns the path of the message file. Delivery is not confirmed.
    pub fn send<S: AsRef<str>>(&self, event: &str, messages: &[S]) -> Result<PathBuf> {
        if event.is_empty() {
            return Err(BusError::EventNameNotDefined);
        }
        if !self.store.root_exists() {
            return Err(BusError::BufferRootNotFound(self.store.root().to_path_buf()));
        }

        let dir = self.store.event_dir(event)?;
        if !dir.is_dir() {
            return Err(BusError::ListenerDoesNotExist(event.to_string()));
        }

        let path = dir.join(next_free_name(&dir)?.to_string());
        let message = Message::new(messages.iter().map(|m| m.as_ref()));
        fs::write(&path, message.encode())?;

        debug!("Sent event {event} as {}", path.display());
        Ok(path)
    }
}

/// Smallest positive integer not used as a file name in `dir`.
pub fn next_free_name(dir: &Path) -> io::Result<u64> {
    let mut taken: HashSet<OsString> = HashSet::new();
    for entry in fs::read_dir(dir)? {
        taken.insert(entry?.file_name());
    }

    let mut candidate: u64 = 1;
    while taken.contains(OsStr::new(&candidate.to_string())) {
        candidate += 1;
    }
    Ok(candidate)
}
