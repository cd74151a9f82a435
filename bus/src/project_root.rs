//! Project root discovery.
//!
//! Listening and sending processes agree on where the buffer lives by walking
//! up from where they run until they hit the same project root marker.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{BusError, Result};

/// Markers used when none are configured.
pub const DEFAULT_MARKERS: &[&str] = &["Cargo.toml", "package.json", ".git"];

/// Discover the project root from the current working directory.
pub fn discover<S: AsRef<str>>(markers: &[S]) -> Result<PathBuf> {
    let start = std::env::current_dir().map_err(|_| BusError::CallerStackTooSmall)?;
    discover_from(&start, markers)
}

/// Walk upward from `start` until a directory containing one of `markers`.
pub fn discover_from<S: AsRef<str>>(start: &Path, markers: &[S]) -> Result<PathBuf> {
    for dir in start.ancestors() {
        if let Some(marker) = markers
            .iter()
            .map(AsRef::as_ref)
            .find(|marker| dir.join(marker).exists())
        {
            debug!("Found project root {} (marker {marker})", dir.display());
            return Ok(dir.to_path_buf());
        }
    }

    Err(BusError::PackageRootNotFound(start.to_path_buf()))
}
