//! File domain model - one entry of a storage listing

use super::signature::ContentSignature;
use crate::volume::path;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Read-only snapshot of one entry on a storage root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
	/// Root-relative path (`/a/movie.mp4`)
	pub path: String,

	/// Size in bytes, zero for directories
	pub size: u64,

	/// Last modification time as reported by the backend
	pub mod_time: Option<DateTime<Utc>>,

	pub is_directory: bool,

	/// Identity used to correlate deletes with creates
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub content_signature: Option<ContentSignature>,
}

impl FileInfo {
	pub fn file(path: impl Into<String>, size: u64, mod_time: Option<DateTime<Utc>>) -> Self {
		Self {
			path: path.into(),
			size,
			mod_time,
			is_directory: false,
			content_signature: None,
		}
	}

	pub fn directory(path: impl Into<String>, mod_time: Option<DateTime<Utc>>) -> Self {
		Self {
			path: path.into(),
			size: 0,
			mod_time,
			is_directory: true,
			content_signature: None,
		}
	}

	pub fn with_signature(mut self, signature: ContentSignature) -> Self {
		self.content_signature = Some(signature);
		self
	}

	/// Base name of the entry
	pub fn name(&self) -> &str {
		path::file_name(&self.path)
	}

	/// Whether two observations describe the same on-disk state, ignoring path
	/// and signature. Used to reuse signatures across snapshots.
	pub fn same_state(&self, other: &FileInfo) -> bool {
		self.is_directory == other.is_directory
			&& self.size == other.size
			&& self.mod_time == other.mod_time
	}

	/// Same entry relocated under another path
	pub fn relocated(&self, path: impl Into<String>) -> Self {
		Self {
			path: path.into(),
			..self.clone()
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	#[test]
	fn test_name_and_state() {
		let mtime = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
		let a = FileInfo::file("/a/movie.mp4", 42, Some(mtime));
		let b = a.relocated("/b/other.mp4");

		assert_eq!(a.name(), "movie.mp4");
		assert!(a.same_state(&b));
		assert!(!a.same_state(&FileInfo::file("/a/movie.mp4", 43, Some(mtime))));
		assert!(!a.same_state(&FileInfo::directory("/a/movie.mp4", Some(mtime))));
	}
}
