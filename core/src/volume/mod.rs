//! Storage access: the backend contract, protocol adapters and their
//! shared error taxonomy

pub mod backend;
pub mod error;
pub mod path;

pub use backend::{
	backend_for_root, GuardedBackend, Listing, LocalBackend, MountedBackend, OpendalBackend,
	SkippedEntry, StorageBackend,
};
pub use error::{StorageError, StorageResult};
