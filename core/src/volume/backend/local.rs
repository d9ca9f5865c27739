//! Local filesystem backend implementation

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs;
use tracing::debug;

use super::{Listing, SkippedEntry, StorageBackend};
use crate::config::Protocol;
use crate::domain::FileInfo;
use crate::volume::error::{StorageError, StorageResult};
use crate::volume::path;

/// Local filesystem backend
///
/// Thin wrapper around tokio::fs rooted at a directory. Symlinks are not
/// followed and never reported.
#[derive(Debug)]
pub struct LocalBackend {
	/// Directory every path is resolved against
	root: PathBuf,
	connected: AtomicBool,
	/// Protocol reported to callers; mount-backed adapters reuse this backend
	protocol: Protocol,
}

impl LocalBackend {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self::with_protocol(root, Protocol::Local)
	}

	pub(crate) fn with_protocol(root: impl Into<PathBuf>, protocol: Protocol) -> Self {
		Self {
			root: root.into(),
			connected: AtomicBool::new(false),
			protocol,
		}
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Resolve a root-relative path against the root directory
	fn resolve_path(&self, path: &str) -> StorageResult<PathBuf> {
		let relative = path::relative(path)?;
		if relative.is_empty() {
			Ok(self.root.clone())
		} else {
			Ok(self.root.join(relative))
		}
	}

	fn ensure_connected(&self) -> StorageResult<()> {
		if self.connected.load(Ordering::Acquire) {
			Ok(())
		} else {
			Err(StorageError::NotConnected)
		}
	}

	fn to_info(path: String, metadata: &std::fs::Metadata) -> FileInfo {
		let mod_time = metadata.modified().ok().map(DateTime::<Utc>::from);
		if metadata.is_dir() {
			FileInfo::directory(path, mod_time)
		} else {
			FileInfo::file(path, metadata.len(), mod_time)
		}
	}
}

#[async_trait]
impl StorageBackend for LocalBackend {
	async fn connect(&self) -> StorageResult<()> {
		let metadata = fs::metadata(&self.root)
			.await
			.map_err(|e| StorageError::from_io(e, &self.root.to_string_lossy()))?;

		if !metadata.is_dir() {
			return Err(StorageError::Protocol(format!(
				"{} is not a directory",
				self.root.display()
			)));
		}

		if !self.connected.swap(true, Ordering::AcqRel) {
			debug!("LocalBackend::connect: {}", self.root.display());
		}
		Ok(())
	}

	async fn disconnect(&self) -> StorageResult<()> {
		self.connected.store(false, Ordering::Release);
		Ok(())
	}

	fn is_connected(&self) -> bool {
		self.connected.load(Ordering::Acquire)
	}

	async fn test_connection(&self) -> StorageResult<()> {
		self.ensure_connected()?;
		let metadata = fs::metadata(&self.root)
			.await
			.map_err(|e| StorageError::from_io(e, path::ROOT))?;

		if metadata.is_dir() {
			Ok(())
		} else {
			Err(StorageError::Protocol("root is not a directory".into()))
		}
	}

	async fn list(&self, dir: &str) -> StorageResult<Listing> {
		self.ensure_connected()?;
		let dir = path::normalize(dir)?;
		let full_path = self.resolve_path(&dir)?;
		debug!("LocalBackend::list: {}", full_path.display());

		let mut listing = Listing::default();
		let mut read_dir = fs::read_dir(&full_path)
			.await
			.map_err(|e| StorageError::from_io(e, &dir))?;

		while let Some(entry) = read_dir
			.next_entry()
			.await
			.map_err(|e| StorageError::from_io(e, &dir))?
		{
			let name = match entry.file_name().into_string() {
				Ok(name) => name,
				Err(raw) => {
					listing.skipped.push(SkippedEntry {
						path: path::join(&dir, &raw.to_string_lossy()),
						error: StorageError::Protocol("file name is not valid UTF-8".into()),
					});
					continue;
				}
			};
			let child = path::join(&dir, &name);

			let file_type = match entry.file_type().await {
				Ok(t) => t,
				Err(e) => {
					listing.skipped.push(SkippedEntry {
						error: StorageError::from_io(e, &child),
						path: child,
					});
					continue;
				}
			};
			if file_type.is_symlink() {
				debug!("Skipping symlink {}", child);
				continue;
			}

			match entry.metadata().await {
				Ok(metadata) => listing.entries.push(Self::to_info(child, &metadata)),
				Err(e) => listing.skipped.push(SkippedEntry {
					error: StorageError::from_io(e, &child),
					path: child,
				}),
			}
		}

		Ok(listing)
	}

	async fn read(&self, file: &str) -> StorageResult<Bytes> {
		self.ensure_connected()?;
		let full_path = self.resolve_path(file)?;
		debug!("LocalBackend::read: {}", full_path.display());

		let data = fs::read(&full_path)
			.await
			.map_err(|e| StorageError::from_io(e, file))?;

		Ok(Bytes::from(data))
	}

	async fn write(&self, file: &str, data: Bytes) -> StorageResult<()> {
		self.ensure_connected()?;
		let full_path = self.resolve_path(file)?;
		debug!(
			"LocalBackend::write: {} ({} bytes)",
			full_path.display(),
			data.len()
		);

		// Create parent directories if needed
		if let Some(parent) = full_path.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(|e| StorageError::from_io(e, file))?;
		}

		fs::write(&full_path, data)
			.await
			.map_err(|e| StorageError::from_io(e, file))
	}

	async fn delete(&self, target: &str) -> StorageResult<()> {
		self.ensure_connected()?;
		if path::normalize(target)? == path::ROOT {
			return Err(StorageError::InvalidPath("refusing to delete the root".into()));
		}
		let full_path = self.resolve_path(target)?;
		debug!("LocalBackend::delete: {}", full_path.display());

		let metadata = fs::symlink_metadata(&full_path)
			.await
			.map_err(|e| StorageError::from_io(e, target))?;

		let result = if metadata.is_dir() {
			fs::remove_dir_all(&full_path).await
		} else {
			fs::remove_file(&full_path).await
		};

		result.map_err(|e| StorageError::from_io(e, target))
	}

	async fn stat(&self, target: &str) -> StorageResult<FileInfo> {
		self.ensure_connected()?;
		let target = path::normalize(target)?;
		let full_path = self.resolve_path(&target)?;

		let metadata = fs::symlink_metadata(&full_path)
			.await
			.map_err(|e| StorageError::from_io(e, &target))?;

		if metadata.is_symlink() {
			return Err(StorageError::NotFound(target));
		}

		Ok(Self::to_info(target, &metadata))
	}

	async fn exists(&self, target: &str) -> StorageResult<bool> {
		self.ensure_connected()?;
		let full_path = self.resolve_path(target)?;
		fs::try_exists(&full_path)
			.await
			.map_err(|e| StorageError::from_io(e, target))
	}

	async fn create_dir(&self, dir: &str) -> StorageResult<()> {
		self.ensure_connected()?;
		let full_path = self.resolve_path(dir)?;
		debug!("LocalBackend::create_dir: {}", full_path.display());

		fs::create_dir_all(&full_path)
			.await
			.map_err(|e| StorageError::from_io(e, dir))
	}

	fn protocol(&self) -> Protocol {
		self.protocol
	}
}
