//! NFS adapter, mounted through `mount.nfs`

use super::mount::{MountSpec, MountedBackend};
use crate::config::{Protocol, StorageRoot};
use crate::volume::error::{StorageError, StorageResult};

const DEFAULT_NFS_OPTIONS: &str = "vers=3";

pub fn nfs_backend(root: &StorageRoot) -> StorageResult<MountedBackend> {
	let params = &root.connection;
	let missing = |what: &str| StorageError::Protocol(format!("nfs root {} has no {what}", root.id));

	let host = params.host.as_deref().ok_or_else(|| missing("host"))?;
	let export = params
		.export_path
		.as_deref()
		.ok_or_else(|| missing("export_path"))?;
	let mount_point = params
		.mount_point
		.clone()
		.ok_or_else(|| missing("mount_point"))?;

	let mut options = vec![params
		.mount_options
		.clone()
		.unwrap_or_else(|| DEFAULT_NFS_OPTIONS.to_string())];
	if let Some(port) = params.port {
		options.push(format!("port={port}"));
	}

	let spec = MountSpec {
		fstype: "nfs",
		source: format!("{host}:/{}", export.trim_start_matches('/')),
		mount_point,
		options: options.join(","),
		password: None,
	};

	MountedBackend::new(
		Protocol::Nfs,
		spec,
		params.path.as_deref().unwrap_or("/"),
	)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::path::Path;

	#[test]
	fn test_nfs_spec_defaults_to_v3() {
		let mut root = StorageRoot::new("archive", Protocol::Nfs);
		root.connection.host = Some("filer".into());
		root.connection.export_path = Some("/export/media".into());
		root.connection.mount_point = Some("/mnt/archive".into());

		let backend = nfs_backend(&root).unwrap();
		let debug = format!("{backend:?}");
		assert!(debug.contains("filer:/export/media"));
		assert!(debug.contains("vers=3"));
		assert_eq!(backend.mount_point(), Path::new("/mnt/archive"));
	}

	#[test]
	fn test_nfs_requires_mount_point() {
		let mut root = StorageRoot::new("archive", Protocol::Nfs);
		root.connection.host = Some("filer".into());
		root.connection.export_path = Some("/export/media".into());
		assert!(nfs_backend(&root).is_err());
	}
}
