//! WebDAV adapter

use opendal::{services, Operator};

use super::remote::OpendalBackend;
use crate::config::{Protocol, StorageRoot};
use crate::volume::error::{StorageError, StorageResult};
use crate::volume::path;

pub fn webdav_backend(root: &StorageRoot) -> StorageResult<OpendalBackend> {
	let params = root.connection.clone();
	let url = params
		.url
		.clone()
		.ok_or_else(|| StorageError::Protocol(format!("webdav root {} has no url", root.id)))?;
	let base = path::normalize(params.path.as_deref().unwrap_or(path::ROOT))?;

	let factory_url = url.clone();
	Ok(OpendalBackend::new(Protocol::Webdav, url, move || {
		let mut builder = services::Webdav::default()
			.endpoint(&factory_url)
			.root(&base);
		if let Some(user) = &params.username {
			builder = builder.username(user);
		}
		if let Some(password) = &params.password {
			builder = builder.password(password);
		}

		Ok(Operator::new(builder)?.finish())
	}))
}
