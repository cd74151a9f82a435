//! Directory layout of the buffer.
//!
//! ```text
//! <projectRoot>/<bufferDirName>/<eventName>/<n>
//! ```

use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{BusError, Result};
use crate::fs_util;

/// Owns the paths of the buffer root and its event directories.
#[derive(Debug, Clone)]
pub struct BufferStore {
    /// The buffer root directory.
    root: PathBuf,

    /// Whether event names are percent-encoded.
    encode_names: bool,
}

impl BufferStore {
    /// Create a store rooted at `root`. Nothing is created on disk.
    pub fn new(root: impl Into<PathBuf>, encode_names: bool) -> Self {
        Self {
            root: root.into(),
            encode_names,
        }
    }

    /// The buffer root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the buffer root exists.
    pub fn root_exists(&self) -> bool {
        self.root.is_dir()
    }

    /// Directory holding pending messages for `event`.
    pub fn event_dir(&self, event: &str) -> Result<PathBuf> {
        Ok(self.root.join(self.dir_name(event)?.as_ref()))
    }

    /// Map an event name to its directory name.
    pub fn dir_name<'a>(&self, event: &'a str) -> Result<Cow<'a, str>> {
        if event.is_empty() {
            return Err(BusError::EventNameNotDefined);
        }

        let name = if self.encode_names {
            urlencoding::encode(event)
        } else {
            if event.contains(['/', '\\']) {
                return Err(BusError::InvalidEventName(event.to_string()));
            }
            Cow::Borrowed(event)
        };

        if name == "." || name == ".." {
            return Err(BusError::InvalidEventName(event.to_string()));
        }
        Ok(name)
    }

    /// Create the buffer root, discarding anything left by an earlier run.
    pub fn reset_root(&self) -> Result<()> {
        fs_util::clear_dir(&self.root)?;
        info!("Initialized buffer root: {}", self.root.display());
        Ok(())
    }

    /// Create the directory for `event`, discarding stale messages.
    pub fn reset_event_dir(&self, event: &str) -> Result<PathBuf> {
        let dir = self.event_dir(event)?;
        fs_util::clear_dir(&dir)?;
        debug!("Initialized event directory: {}", dir.display());
        Ok(dir)
    }

    /// Delete the directory for `event` and its pending messages.
    pub fn remove_event_dir(&self, event: &str) -> Result<()> {
        let dir = self.event_dir(event)?;
        fs_util::remove_dir_all(&dir)?;
        Ok(())
    }

    /// Delete the buffer root and everything in it.
    pub fn remove_root(&self) -> Result<()> {
        fs_util::remove_dir_all(&self.root)?;
        Ok(())
    }

    /// Names of the files currently queued for `event`.
    pub fn pending(&self, event: &str) -> Result<Vec<String>> {
        let dir = self.event_dir(event)?;
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort_by_key(|name| (name.len(), name.clone()));
        Ok(names)
    }
}
