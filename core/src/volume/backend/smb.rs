//! SMB adapter, mounted through `mount.cifs`

use std::path::PathBuf;

use super::mount::{MountSpec, MountedBackend};
use crate::config::{Protocol, StorageRoot};
use crate::volume::error::{StorageError, StorageResult};

/// Mount point used when the root does not configure one
pub(crate) fn default_mount_point(root_id: &str) -> PathBuf {
	std::env::temp_dir()
		.join("sd-storage-sync")
		.join("mounts")
		.join(root_id)
}

pub fn smb_backend(root: &StorageRoot) -> StorageResult<MountedBackend> {
	let params = &root.connection;
	let missing = |what: &str| StorageError::Protocol(format!("smb root {} has no {what}", root.id));

	let host = params.host.as_deref().ok_or_else(|| missing("host"))?;
	let share = params
		.share
		.as_deref()
		.ok_or_else(|| missing("share"))?
		.trim_matches('/');

	let mut options = Vec::new();
	match &params.username {
		Some(user) => options.push(format!("username={user}")),
		None => options.push("guest".to_string()),
	}
	if let Some(domain) = &params.domain {
		options.push(format!("domain={domain}"));
	}
	if let Some(port) = params.port {
		options.push(format!("port={port}"));
	}
	if let Some(extra) = &params.mount_options {
		options.push(extra.clone());
	}

	let spec = MountSpec {
		fstype: "cifs",
		source: format!("//{host}/{share}"),
		mount_point: params
			.mount_point
			.clone()
			.unwrap_or_else(|| default_mount_point(&root.id)),
		options: options.join(","),
		password: params.password.clone(),
	};

	MountedBackend::new(
		Protocol::Smb,
		spec,
		params.path.as_deref().unwrap_or("/"),
	)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::volume::StorageBackend;

	#[test]
	fn test_smb_spec() {
		let mut root = StorageRoot::new("movies", Protocol::Smb);
		root.connection.host = Some("nas.local".into());
		root.connection.share = Some("/media/".into());
		root.connection.username = Some("viewer".into());
		root.connection.password = Some("secret".into());
		root.connection.domain = Some("HOME".into());

		let backend = smb_backend(&root).unwrap();
		let debug = format!("{backend:?}");
		assert!(debug.contains("//nas.local/media"));
		assert!(debug.contains("username=viewer,domain=HOME"));
		assert!(!debug.contains("secret"));
		assert_eq!(backend.mount_point(), default_mount_point("movies"));
		assert_eq!(backend.protocol(), Protocol::Smb);
	}

	#[test]
	fn test_smb_requires_share() {
		let mut root = StorageRoot::new("movies", Protocol::Smb);
		root.connection.host = Some("nas.local".into());
		assert!(smb_backend(&root).is_err());
	}
}
