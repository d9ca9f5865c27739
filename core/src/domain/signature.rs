//! Content signatures used to recognise the same file under a new path

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const CONTENT_PREFIX: &str = "b3:";
const METADATA_PREFIX: &str = "meta:";
const DIRECTORY_PREFIX: &str = "dir:";

/// Opaque identity of an entry's content.
///
/// Small files are identified by a blake3 hash of their bytes, large files by
/// a hash of `(size, mtime, base name)`, directories by a hash over their
/// file descendants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentSignature(String);

impl ContentSignature {
	pub fn from_content(data: &[u8]) -> Self {
		Self(format!("{CONTENT_PREFIX}{}", blake3::hash(data).to_hex()))
	}

	pub fn from_metadata(size: u64, mod_time: Option<DateTime<Utc>>, name: &str) -> Self {
		let mut hasher = blake3::Hasher::new();
		hasher.update(&size.to_le_bytes());
		hasher.update(&mod_time.map(|t| t.timestamp()).unwrap_or_default().to_le_bytes());
		hasher.update(name.as_bytes());

		Self(format!("{METADATA_PREFIX}{}", hasher.finalize().to_hex()))
	}

	/// Signature of a directory from `(path relative to the directory, signature)`
	/// pairs of its files. Order of the input does not matter.
	pub fn for_directory<'a>(
		children: impl IntoIterator<Item = (&'a str, &'a ContentSignature)>,
	) -> Self {
		let mut children = children.into_iter().collect::<Vec<_>>();
		children.sort();

		let mut hasher = blake3::Hasher::new();
		for (relative, signature) in children {
			hasher.update(relative.as_bytes());
			hasher.update(&[0]);
			hasher.update(signature.0.as_bytes());
			hasher.update(&[0]);
		}

		Self(format!("{DIRECTORY_PREFIX}{}", hasher.finalize().to_hex()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// True when derived from the actual bytes rather than metadata
	pub fn is_content_hash(&self) -> bool {
		self.0.starts_with(CONTENT_PREFIX)
	}

	pub fn is_directory(&self) -> bool {
		self.0.starts_with(DIRECTORY_PREFIX)
	}
}

impl fmt::Display for ContentSignature {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for ContentSignature {
	fn from(value: &str) -> Self {
		Self(value.to_string())
	}
}
