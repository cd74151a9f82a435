//! Error types for the event bus.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur when listening on or sending to the bus.
#[derive(Error, Debug)]
pub enum BusError {
    /// An empty event name was given.
    #[error("event name not defined")]
    EventNameNotDefined,

    /// A listener was registered without a callback.
    #[error("callback not defined")]
    CallbackNotDefined,

    /// No listener is registered for the event.
    #[error("listener for event \"{0}\" does not exist")]
    ListenerDoesNotExist(String),

    /// The buffer root has never been created by a listening process.
    #[error("no listeners were found, is the app running? ({} not found)", .0.display())]
    BufferRootNotFound(PathBuf),

    /// The location of the caller could not be determined.
    #[error("could not determine the caller's location")]
    CallerStackTooSmall,

    /// No project root marker above the starting directory.
    #[error("could not find a project root above {}", .0.display())]
    PackageRootNotFound(PathBuf),

    /// The event name cannot be used as a directory name.
    #[error("invalid event name: {0:?}")]
    InvalidEventName(String),

    /// Listeners need a tokio runtime to dispatch on.
    #[error("no tokio runtime available for dispatching events")]
    NoRuntime,

    /// The bus was already shut down.
    #[error("event bus has been shut down")]
    ShutDown,

    /// Message encoding error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Notify error.
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced while decoding a message file.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The file has no content yet, the writer may still be mid-write.
    #[error("message file is empty")]
    Empty,

    /// The content is not a JSON array of strings.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}
