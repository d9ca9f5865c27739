//! Platform-agnostic filesystem watcher
//!
//! Wraps the `notify` recommended watcher and exposes its callback as a
//! cancellable, debounced [`FsEventStream`].

mod debounce;
mod error;
mod event;
mod watcher;

pub use debounce::Debouncer;
pub use error::{Result, WatcherError};
pub use event::{FsEvent, FsEventKind, RawEventKind, RawNotifyEvent, RenameHalf};
pub use watcher::{FsEventStream, FsWatcher, WatcherConfig};
