//! # filebus
//!
//! A local inter-process event bus. One process registers listeners for named
//! events; any process running in the same project can send an event with
//! string arguments by dropping a file into a directory the listener watches.
//! No sockets, no daemon.
//!
//! ## Features
//!
//! - **Lazy Directories**: The buffer and event directories exist only while
//!   something listens
//! - **Ordered Callbacks**: Listeners run in registration order
//! - **Pluggable Watching**: Native notification or polling, or any
//!   [`ChangeNotifier`]
//! - **Scoped Cleanup**: Shutdown, drop and termination signals remove the
//!   buffer
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Event Bus                               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Sender ──► <root>/<event>/<n> ──► ChangeNotifier               │
//! │                   ▲                      │                      │
//! │                   │                      ▼                      │
//! │  EventBus ──► BufferStore          dispatcher task              │
//! │     │                                    │                      │
//! │     ▼                                    ▼                      │
//! │  CleanupCoordinator              callbacks, then delete         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use filebus::{BusConfig, EventBus, Sender};
//!
//! // Listening process
//! let bus = EventBus::new(BusConfig::from_env())?;
//! bus.on("greet", |args| println!("hello {}", args.join(" ")))?;
//!
//! // Any other process in the same project
//! Sender::discover()?.send("greet", &["hi", "there"])?;
//! ```

pub mod bus;
pub mod cleanup;
pub mod codec;
pub mod config;
mod dispatch;
pub mod error;
pub mod fs_util;
pub mod project_root;
pub mod sender;
pub mod store;
pub mod watcher;

pub use bus::EventBus;
pub use cleanup::CleanupCoordinator;
pub use codec::Message;
pub use config::{BusConfig, SignalPolicy, WatchBackend};
pub use dispatch::Callback;
pub use error::{BusError, CodecError, Result};
pub use sender::Sender;
pub use store::BufferStore;
pub use watcher::{ChangeEvent, ChangeKind, ChangeNotifier, NotifyWatcher, Subscription};
