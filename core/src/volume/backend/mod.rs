//! Storage backend abstraction
//!
//! Every protocol implements [`StorageBackend`], so the tracker, breaker
//! and orchestrator never branch on the protocol.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{Protocol, StorageRoot};
use crate::domain::FileInfo;

use super::error::{StorageError, StorageResult};

pub mod ftp;
pub mod guarded;
pub mod local;
pub mod mount;
pub mod nfs;
pub mod remote;
pub mod smb;
pub mod webdav;

pub use guarded::GuardedBackend;
pub use local::LocalBackend;
pub use mount::MountedBackend;
pub use remote::OpendalBackend;

/// An entry a listing could not read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
	pub path: String,
	pub error: StorageError,
}

/// Result of listing one directory. Unreadable entries are reported in
/// `skipped` instead of failing the whole call.
#[derive(Debug, Clone, Default)]
pub struct Listing {
	pub entries: Vec<FileInfo>,
	pub skipped: Vec<SkippedEntry>,
}

/// Capability set every protocol adapter provides.
///
/// Paths are root-relative (`/a/b`). `connect` and `disconnect` are
/// idempotent.
#[async_trait]
pub trait StorageBackend: Send + Sync + fmt::Debug {
	async fn connect(&self) -> StorageResult<()>;

	async fn disconnect(&self) -> StorageResult<()>;

	fn is_connected(&self) -> bool;

	/// Cheap liveness probe
	async fn test_connection(&self) -> StorageResult<()> {
		let root = self.stat(super::path::ROOT).await?;
		if root.is_directory {
			Ok(())
		} else {
			Err(StorageError::Protocol("root is not a directory".into()))
		}
	}

	/// Direct children of `path`
	async fn list(&self, path: &str) -> StorageResult<Listing>;

	async fn read(&self, path: &str) -> StorageResult<Bytes>;

	/// Write a file, creating parent directories as needed
	async fn write(&self, path: &str, data: Bytes) -> StorageResult<()>;

	/// Delete a file or a whole directory tree
	async fn delete(&self, path: &str) -> StorageResult<()>;

	async fn stat(&self, path: &str) -> StorageResult<FileInfo>;

	async fn exists(&self, path: &str) -> StorageResult<bool> {
		match self.stat(path).await {
			Ok(_) => Ok(true),
			Err(StorageError::NotFound(_)) => Ok(false),
			Err(e) => Err(e),
		}
	}

	/// Create a directory and any missing parents
	async fn create_dir(&self, path: &str) -> StorageResult<()>;

	fn protocol(&self) -> Protocol;
}

/// Build the unguarded adapter for a configured root
pub fn backend_for_root(root: &StorageRoot) -> StorageResult<Arc<dyn StorageBackend>> {
	let missing = |what: &str| StorageError::Protocol(format!("root {} has no {what}", root.id));

	let backend: Arc<dyn StorageBackend> = match root.protocol {
		Protocol::Local => {
			let path = root.connection.path.as_ref().ok_or_else(|| missing("path"))?;
			Arc::new(LocalBackend::new(PathBuf::from(path)))
		}
		Protocol::Smb => Arc::new(smb::smb_backend(root)?),
		Protocol::Nfs => Arc::new(nfs::nfs_backend(root)?),
		Protocol::Ftp => Arc::new(ftp::ftp_backend(root)?),
		Protocol::Webdav => Arc::new(webdav::webdav_backend(root)?),
	};

	Ok(backend)
}
