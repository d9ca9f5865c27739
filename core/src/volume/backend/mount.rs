//! Mount-backed adapters (SMB, NFS)
//!
//! The share is mounted with the system `mount` helper and every file
//! operation goes through a [`LocalBackend`] rooted at the mount point.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio::task;
use tracing::{debug, info, warn};

use super::{Listing, LocalBackend, StorageBackend};
use crate::config::Protocol;
use crate::domain::FileInfo;
use crate::volume::error::{StorageError, StorageResult};

const PROC_MOUNTS: &str = "/proc/mounts";

/// Everything needed to mount one share
#[derive(Clone)]
pub struct MountSpec {
	/// Filesystem type handed to `mount -t`
	pub fstype: &'static str,
	/// `//host/share` or `host:/export`
	pub source: String,
	pub mount_point: PathBuf,
	/// Comma separated `-o` options
	pub options: String,
	/// Passed through the environment, never on the command line
	pub password: Option<String>,
}

impl std::fmt::Debug for MountSpec {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MountSpec")
			.field("fstype", &self.fstype)
			.field("source", &self.source)
			.field("mount_point", &self.mount_point)
			.field("options", &self.options)
			.finish_non_exhaustive()
	}
}

#[derive(Debug)]
pub struct MountedBackend {
	protocol: Protocol,
	spec: MountSpec,
	local: LocalBackend,
	/// Set when this backend performed the mount, so it only unmounts its own
	mounted_by_us: AtomicBool,
	mount_lock: Mutex<()>,
}

impl MountedBackend {
	/// `sub_path` selects a directory inside the share as the root
	pub fn new(protocol: Protocol, spec: MountSpec, sub_path: &str) -> StorageResult<Self> {
		let relative = crate::volume::path::relative(sub_path)?;
		let local_root = if relative.is_empty() {
			spec.mount_point.clone()
		} else {
			spec.mount_point.join(relative)
		};

		Ok(Self {
			protocol,
			local: LocalBackend::with_protocol(local_root, protocol),
			spec,
			mounted_by_us: AtomicBool::new(false),
			mount_lock: Mutex::new(()),
		})
	}

	pub fn mount_point(&self) -> &Path {
		&self.spec.mount_point
	}

	async fn mount(&self) -> StorageResult<()> {
		let mount_point = self.spec.mount_point.clone();
		tokio::fs::create_dir_all(&mount_point)
			.await
			.map_err(|e| StorageError::from_io(e, &mount_point.to_string_lossy()))?;

		let spec = self.spec.clone();
		let output = task::spawn_blocking(move || {
			let mut command = Command::new("mount");
			command.arg("-t").arg(spec.fstype);
			if !spec.options.is_empty() {
				command.arg("-o").arg(&spec.options);
			}
			command.arg(&spec.source).arg(&spec.mount_point);
			if let Some(password) = &spec.password {
				command.env("PASSWD", password);
			}
			command.output()
		})
		.await
		.map_err(|e| StorageError::Io(format!("mount task failed: {e}")))?
		.map_err(|e| StorageError::Io(format!("failed to run mount: {e}")))?;

		if !output.status.success() {
			let stderr = String::from_utf8_lossy(&output.stderr);
			return Err(classify_mount_failure(&self.spec.source, &stderr));
		}

		info!(
			protocol = %self.protocol,
			source = %self.spec.source,
			mount_point = %self.spec.mount_point.display(),
			"Mounted share"
		);
		Ok(())
	}

	async fn unmount(&self) -> StorageResult<()> {
		let mount_point = self.spec.mount_point.clone();
		let output = task::spawn_blocking(move || Command::new("umount").arg(&mount_point).output())
			.await
			.map_err(|e| StorageError::Io(format!("umount task failed: {e}")))?
			.map_err(|e| StorageError::Io(format!("failed to run umount: {e}")))?;

		if !output.status.success() {
			let stderr = String::from_utf8_lossy(&output.stderr);
			warn!(
				mount_point = %self.spec.mount_point.display(),
				"umount failed: {}",
				stderr.trim()
			);
			return Err(StorageError::Io(format!("umount failed: {}", stderr.trim())));
		}

		info!(mount_point = %self.spec.mount_point.display(), "Unmounted share");
		Ok(())
	}
}

/// Map the mount helper's complaint to the error taxonomy
pub(crate) fn classify_mount_failure(source: &str, stderr: &str) -> StorageError {
	let lower = stderr.to_lowercase();
	let message = format!("{source}: {}", stderr.trim());

	let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

	if has(&[
		"permission denied",
		"access denied",
		"logon failure",
		"error(13)",
		"only root can",
		"must be superuser",
	]) {
		StorageError::Auth(message)
	} else if has(&["timed out", "error(110)"]) {
		StorageError::Timeout(message)
	} else if has(&[
		"connection refused",
		"host is down",
		"no route to host",
		"unreachable",
		"error(111)",
		"error(112)",
		"error(113)",
	]) {
		StorageError::Connection(message)
	} else if has(&["no such file", "does not exist", "not found", "error(2)"]) {
		StorageError::NotFound(message)
	} else {
		StorageError::Protocol(message)
	}
}

/// Fields in /proc/mounts escape whitespace as octal
fn unescape_mount_field(field: &str) -> String {
	field
		.replace("\\040", " ")
		.replace("\\011", "\t")
		.replace("\\012", "\n")
		.replace("\\134", "\\")
}

pub(crate) fn mounts_contain(mounts: &str, mount_point: &Path) -> bool {
	let wanted = mount_point.to_string_lossy();
	mounts
		.lines()
		.filter_map(|line| line.split_whitespace().nth(1))
		.any(|field| unescape_mount_field(field) == wanted.trim_end_matches('/'))
}

async fn is_mounted(mount_point: &Path) -> bool {
	match tokio::fs::read_to_string(PROC_MOUNTS).await {
		Ok(mounts) => mounts_contain(&mounts, mount_point),
		Err(e) => {
			debug!("Could not read {}: {}", PROC_MOUNTS, e);
			false
		}
	}
}

#[async_trait]
impl StorageBackend for MountedBackend {
	async fn connect(&self) -> StorageResult<()> {
		if self.local.is_connected() {
			return Ok(());
		}

		let _guard = self.mount_lock.lock().await;
		if self.local.is_connected() {
			return Ok(());
		}

		if is_mounted(&self.spec.mount_point).await {
			debug!(
				"{} already mounted at {}",
				self.spec.source,
				self.spec.mount_point.display()
			);
		} else {
			self.mount().await?;
			self.mounted_by_us.store(true, Ordering::Release);
		}

		self.local.connect().await
	}

	async fn disconnect(&self) -> StorageResult<()> {
		let _guard = self.mount_lock.lock().await;
		self.local.disconnect().await?;

		if self.mounted_by_us.swap(false, Ordering::AcqRel) {
			self.unmount().await?;
		}
		Ok(())
	}

	fn is_connected(&self) -> bool {
		self.local.is_connected()
	}

	async fn test_connection(&self) -> StorageResult<()> {
		self.local.test_connection().await
	}

	async fn list(&self, path: &str) -> StorageResult<Listing> {
		self.local.list(path).await
	}

	async fn read(&self, path: &str) -> StorageResult<Bytes> {
		self.local.read(path).await
	}

	async fn write(&self, path: &str, data: Bytes) -> StorageResult<()> {
		self.local.write(path, data).await
	}

	async fn delete(&self, path: &str) -> StorageResult<()> {
		self.local.delete(path).await
	}

	async fn stat(&self, path: &str) -> StorageResult<FileInfo> {
		self.local.stat(path).await
	}

	async fn exists(&self, path: &str) -> StorageResult<bool> {
		self.local.exists(path).await
	}

	async fn create_dir(&self, path: &str) -> StorageResult<()> {
		self.local.create_dir(path).await
	}

	fn protocol(&self) -> Protocol {
		self.protocol
	}
}
