//! Computes content signatures through a storage backend

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::snapshot::Snapshot;
use crate::domain::{ContentSignature, FileInfo};
use crate::volume::{StorageBackend, StorageResult};

#[derive(Debug, Clone)]
pub struct Signer {
	backend: Arc<dyn StorageBackend>,
	hash_threshold: u64,
}

impl Signer {
	pub fn new(backend: Arc<dyn StorageBackend>, hash_threshold: u64) -> Self {
		Self {
			backend,
			hash_threshold,
		}
	}

	/// Signature for one file. Small files are hashed; large ones, and files
	/// that cannot be read, get a metadata signature. Only errors saying the
	/// root is unreachable are returned.
	pub async fn signature(&self, info: &FileInfo) -> StorageResult<ContentSignature> {
		let fallback = || ContentSignature::from_metadata(info.size, info.mod_time, info.name());

		if info.size >= self.hash_threshold {
			return Ok(fallback());
		}

		match self.backend.read(&info.path).await {
			Ok(data) => Ok(ContentSignature::from_content(&data)),
			Err(e) if e.is_unavailable() => Err(e),
			Err(e) => {
				debug!("Could not read {} for hashing: {}", info.path, e);
				Ok(fallback())
			}
		}
	}

	/// Fill in the signature of a file entry
	pub async fn sign(&self, info: &mut FileInfo) -> StorageResult<()> {
		if !info.is_directory {
			info.content_signature = Some(self.signature(info).await?);
		}
		Ok(())
	}

	/// Sign every file in `current`, reusing signatures of entries unchanged
	/// since `previous`.
	///
	/// A file that vanished from `previous` and shows up elsewhere with the
	/// same size, mtime and name (a renamed parent directory, typically) keeps
	/// its signature too, unless several vanished files share that state.
	pub async fn sign_snapshot(&self, current: &mut Snapshot, previous: &Snapshot) -> StorageResult<()> {
		let vanished = vanished_files(current, previous);
		let mut hashed = 0usize;
		let mut carried = 0usize;

		for info in current.iter_mut() {
			if info.is_directory || info.content_signature.is_some() {
				continue;
			}

			if let Some(signature) = previous
				.get(&info.path)
				.filter(|old| old.same_state(info))
				.and_then(|old| old.content_signature.clone())
			{
				info.content_signature = Some(signature);
				continue;
			}

			let relocated = info
				.mod_time
				.and_then(|mod_time| vanished.get(&(info.size, mod_time, info.name().to_string())))
				.and_then(|signature| signature.clone());

			match relocated {
				Some(signature) => {
					info.content_signature = Some(signature);
					carried += 1;
				}
				None => {
					self.sign(info).await?;
					hashed += 1;
				}
			}
		}

		debug!(
			"Signed {} new or changed entries, carried {} relocated ones",
			hashed, carried
		);
		Ok(())
	}
}

type StateKey = (u64, DateTime<Utc>, String);

/// Signed files of `previous` missing from `current`. Keys shared by more
/// than one file map to `None`.
fn vanished_files(current: &Snapshot, previous: &Snapshot) -> HashMap<StateKey, Option<ContentSignature>> {
	let mut vanished: HashMap<StateKey, Option<ContentSignature>> = HashMap::new();

	for old in previous.iter() {
		if old.is_directory || current.contains(&old.path) {
			continue;
		}
		let (Some(mod_time), Some(signature)) = (old.mod_time, old.content_signature.as_ref()) else {
			continue;
		};

		vanished
			.entry((old.size, mod_time, old.name().to_string()))
			.and_modify(|existing| *existing = None)
			.or_insert_with(|| Some(signature.clone()));
	}

	vanished
}
