//! FTP adapter

use opendal::{services, Operator};

use super::remote::OpendalBackend;
use crate::config::{Protocol, StorageRoot};
use crate::volume::error::{StorageError, StorageResult};
use crate::volume::path;

const DEFAULT_FTP_PORT: u16 = 21;

pub fn ftp_backend(root: &StorageRoot) -> StorageResult<OpendalBackend> {
	let params = root.connection.clone();
	let host = params
		.host
		.clone()
		.ok_or_else(|| StorageError::Protocol(format!("ftp root {} has no host", root.id)))?;
	let endpoint = format!(
		"ftp://{}:{}",
		host,
		params.port.unwrap_or(DEFAULT_FTP_PORT)
	);
	let base = path::normalize(params.path.as_deref().unwrap_or(path::ROOT))?;

	let factory_endpoint = endpoint.clone();
	Ok(OpendalBackend::new(Protocol::Ftp, endpoint, move || {
		let mut builder = services::Ftp::default()
			.endpoint(&factory_endpoint)
			.root(&base);
		if let Some(user) = &params.username {
			builder = builder.user(user);
		}
		if let Some(password) = &params.password {
			builder = builder.password(password);
		}

		Ok(Operator::new(builder)?.finish())
	}))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_requires_host() {
		let root = StorageRoot::new("ftp", Protocol::Ftp);
		assert!(ftp_backend(&root).is_err());
	}

	#[test]
	fn test_endpoint_defaults_port() {
		let mut root = StorageRoot::new("ftp", Protocol::Ftp);
		root.connection.host = Some("files.local".into());
		let backend = ftp_backend(&root).unwrap();
		assert!(format!("{backend:?}").contains("ftp://files.local:21"));
	}
}
