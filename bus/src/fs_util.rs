//! Filesystem helpers.

use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

/// Remove a directory and everything below it.
///
/// Walks the tree contents-first instead of recursing, so directories holding
/// many pending files do not grow the stack. A missing directory is not an
/// error.
pub fn remove_dir_all(path: &Path) -> io::Result<()> {
    if !path.exists() {
        return Ok(());
    }

    let mut removed = 0usize;
    let walker = WalkDir::new(path).follow_links(false).contents_first(true);

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            // Entries can vanish under us when a dispatch deletes a message.
            Err(e) if is_not_found(&e) => continue,
            Err(e) => return Err(e.into()),
        };

        let result = if entry.file_type().is_dir() {
            fs::remove_dir(entry.path())
        } else {
            fs::remove_file(entry.path())
        };

        match result {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }

    debug!("Removed {} ({removed} entries)", path.display());
    Ok(())
}

/// Replace whatever is at `path` with a fresh empty directory.
pub fn clear_dir(path: &Path) -> io::Result<()> {
    remove_dir_all(path)?;
    fs::create_dir_all(path)
}

fn is_not_found(error: &walkdir::Error) -> bool {
    error
        .io_error()
        .is_some_and(|e| e.kind() == io::ErrorKind::NotFound)
}
