//! Remote backends built on OpenDAL operators (FTP, WebDAV)

use async_trait::async_trait;
use bytes::Bytes;
use opendal::{EntryMode, ErrorKind, Metadata, Operator};
use parking_lot::RwLock;
use std::fmt;
use tracing::{debug, info, warn};

use super::{Listing, StorageBackend};
use crate::config::Protocol;
use crate::domain::FileInfo;
use crate::volume::error::{StorageError, StorageResult};
use crate::volume::path;

type OperatorFactory = Box<dyn Fn() -> opendal::Result<Operator> + Send + Sync>;

/// Adapter over an OpenDAL operator.
///
/// The operator is built on `connect` so a misconfigured or unreachable
/// server surfaces through the normal error taxonomy.
pub struct OpendalBackend {
	protocol: Protocol,
	/// Human readable endpoint for logs, never contains credentials
	endpoint: String,
	factory: OperatorFactory,
	operator: RwLock<Option<Operator>>,
}

impl fmt::Debug for OpendalBackend {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("OpendalBackend")
			.field("protocol", &self.protocol)
			.field("endpoint", &self.endpoint)
			.field("connected", &self.is_connected())
			.finish()
	}
}

impl OpendalBackend {
	pub fn new(
		protocol: Protocol,
		endpoint: impl Into<String>,
		factory: impl Fn() -> opendal::Result<Operator> + Send + Sync + 'static,
	) -> Self {
		Self {
			protocol,
			endpoint: endpoint.into(),
			factory: Box::new(factory),
			operator: RwLock::new(None),
		}
	}

	fn operator(&self) -> StorageResult<Operator> {
		self.operator
			.read()
			.clone()
			.ok_or(StorageError::NotConnected)
	}

	/// OpenDAL file key for a root-relative path
	fn file_key(target: &str) -> StorageResult<String> {
		let relative = path::relative(target)?;
		if relative.is_empty() {
			Ok("/".to_string())
		} else {
			Ok(relative)
		}
	}

	/// OpenDAL directory keys end with a slash
	fn dir_key(target: &str) -> StorageResult<String> {
		let relative = path::relative(target)?;
		if relative.is_empty() {
			Ok("/".to_string())
		} else {
			Ok(format!("{relative}/"))
		}
	}

	fn to_info(target: String, metadata: &Metadata) -> FileInfo {
		match metadata.mode() {
			EntryMode::DIR => FileInfo::directory(target, metadata.last_modified()),
			_ => FileInfo::file(target, metadata.content_length(), metadata.last_modified()),
		}
	}

	async fn stat_any(&self, op: &Operator, target: &str) -> StorageResult<Metadata> {
		let normalized = path::normalize(target)?;
		if normalized == path::ROOT {
			return op
				.stat("/")
				.await
				.map_err(|e| map_opendal_error(e, &normalized));
		}

		match op.stat(&Self::file_key(&normalized)?).await {
			Ok(metadata) => Ok(metadata),
			Err(e) if e.kind() == ErrorKind::NotFound => op
				.stat(&Self::dir_key(&normalized)?)
				.await
				.map_err(|e| map_opendal_error(e, &normalized)),
			Err(e) => Err(map_opendal_error(e, &normalized)),
		}
	}
}

/// Translate OpenDAL errors into the common taxonomy
pub(crate) fn map_opendal_error(err: opendal::Error, target: &str) -> StorageError {
	let message = format!("{target}: {err}");
	match err.kind() {
		ErrorKind::NotFound => StorageError::NotFound(target.to_string()),
		ErrorKind::PermissionDenied => StorageError::Auth(message),
		ErrorKind::Unsupported => StorageError::Unsupported(message),
		ErrorKind::RateLimited => StorageError::Connection(message),
		_ if err.is_temporary() => StorageError::Connection(message),
		ErrorKind::Unexpected => StorageError::Connection(message),
		_ => StorageError::Protocol(message),
	}
}

#[async_trait]
impl StorageBackend for OpendalBackend {
	async fn connect(&self) -> StorageResult<()> {
		if self.is_connected() {
			return Ok(());
		}

		let op = (self.factory)().map_err(|e| map_opendal_error(e, &self.endpoint))?;
		op.check()
			.await
			.map_err(|e| map_opendal_error(e, &self.endpoint))?;

		info!(protocol = %self.protocol, endpoint = %self.endpoint, "Connected");
		*self.operator.write() = Some(op);
		Ok(())
	}

	async fn disconnect(&self) -> StorageResult<()> {
		if self.operator.write().take().is_some() {
			info!(protocol = %self.protocol, endpoint = %self.endpoint, "Disconnected");
		}
		Ok(())
	}

	fn is_connected(&self) -> bool {
		self.operator.read().is_some()
	}

	async fn test_connection(&self) -> StorageResult<()> {
		let op = self.operator()?;
		op.check()
			.await
			.map_err(|e| map_opendal_error(e, &self.endpoint))
	}

	async fn list(&self, dir: &str) -> StorageResult<Listing> {
		let op = self.operator()?;
		let dir = path::normalize(dir)?;
		let key = Self::dir_key(&dir)?;
		debug!("OpendalBackend::list: {} ({})", dir, self.endpoint);

		let entries = op
			.list(&key)
			.await
			.map_err(|e| map_opendal_error(e, &dir))?;

		let mut listing = Listing::default();
		for entry in entries {
			let entry_path = format!("/{}", entry.path().trim_matches('/'));
			// Some services report the listed directory itself
			if entry_path == dir || entry.path() == key {
				continue;
			}
			let Ok(child) = path::normalize(&entry_path) else {
				warn!("Skipping entry with unusable path {:?}", entry.path());
				continue;
			};

			let metadata = entry.metadata();
			let needs_stat = metadata.mode() == EntryMode::Unknown
				|| (metadata.mode() == EntryMode::FILE && metadata.last_modified().is_none());

			if needs_stat {
				match op.stat(entry.path()).await {
					Ok(full) => listing.entries.push(Self::to_info(child, &full)),
					Err(e) => listing.skipped.push(super::SkippedEntry {
						error: map_opendal_error(e, &child),
						path: child,
					}),
				}
			} else {
				listing.entries.push(Self::to_info(child, metadata));
			}
		}

		Ok(listing)
	}

	async fn read(&self, file: &str) -> StorageResult<Bytes> {
		let op = self.operator()?;
		let key = Self::file_key(file)?;
		debug!("OpendalBackend::read: {}", key);

		let buffer = op
			.read(&key)
			.await
			.map_err(|e| map_opendal_error(e, file))?;

		Ok(buffer.to_bytes())
	}

	async fn write(&self, file: &str, data: Bytes) -> StorageResult<()> {
		let op = self.operator()?;
		let key = Self::file_key(file)?;
		debug!("OpendalBackend::write: {} ({} bytes)", key, data.len());

		if let Some(parent) = path::parent(&path::normalize(file)?) {
			if parent != path::ROOT {
				op.create_dir(&Self::dir_key(parent)?)
					.await
					.map_err(|e| map_opendal_error(e, parent))?;
			}
		}

		op.write(&key, data)
			.await
			.map_err(|e| map_opendal_error(e, file))?;
		Ok(())
	}

	async fn delete(&self, target: &str) -> StorageResult<()> {
		let op = self.operator()?;
		let normalized = path::normalize(target)?;
		if normalized == path::ROOT {
			return Err(StorageError::InvalidPath("refusing to delete the root".into()));
		}
		debug!("OpendalBackend::delete: {}", normalized);

		let metadata = self.stat_any(&op, &normalized).await?;
		if metadata.is_dir() {
			op.remove_all(&Self::dir_key(&normalized)?)
				.await
				.map_err(|e| map_opendal_error(e, &normalized))
		} else {
			op.delete(&Self::file_key(&normalized)?)
				.await
				.map_err(|e| map_opendal_error(e, &normalized))
		}
	}

	async fn stat(&self, target: &str) -> StorageResult<FileInfo> {
		let op = self.operator()?;
		let normalized = path::normalize(target)?;
		let metadata = self.stat_any(&op, &normalized).await?;
		Ok(Self::to_info(normalized, &metadata))
	}

	async fn create_dir(&self, dir: &str) -> StorageResult<()> {
		let op = self.operator()?;
		op.create_dir(&Self::dir_key(dir)?)
			.await
			.map_err(|e| map_opendal_error(e, dir))
	}

	fn protocol(&self) -> Protocol {
		self.protocol
	}
}
