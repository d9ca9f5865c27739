//! File events flowing from change sources through the move tracker to
//! the ingestion pipeline

use super::file::FileInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEventKind {
	Created,
	Modified,
	Deleted,
	Moved,
}

impl fmt::Display for FileEventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Created => "created",
			Self::Modified => "modified",
			Self::Deleted => "deleted",
			Self::Moved => "moved",
		})
	}
}

/// One descendant rewritten by a bulk directory move
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovedChild {
	pub old_path: String,
	pub new_path: String,
}

/// A change observed on one storage root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
	pub root_id: String,
	pub kind: FileEventKind,
	pub path: String,
	/// Previous location, set for `moved` only
	pub old_path: Option<String>,
	pub info: FileInfo,
	/// Descendants of a created or deleted directory, folded by the change
	/// source. The tracker expands them before anything leaves the crate.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub children: Vec<FileInfo>,
	/// Descendants carried along by a directory move
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub moved_children: Vec<MovedChild>,
	pub detected_at: DateTime<Utc>,
}

impl FileEvent {
	fn new(root_id: impl Into<String>, kind: FileEventKind, info: FileInfo) -> Self {
		Self {
			root_id: root_id.into(),
			kind,
			path: info.path.clone(),
			old_path: None,
			info,
			children: Vec::new(),
			moved_children: Vec::new(),
			detected_at: Utc::now(),
		}
	}

	pub fn created(root_id: impl Into<String>, info: FileInfo) -> Self {
		Self::new(root_id, FileEventKind::Created, info)
	}

	pub fn modified(root_id: impl Into<String>, info: FileInfo) -> Self {
		Self::new(root_id, FileEventKind::Modified, info)
	}

	pub fn deleted(root_id: impl Into<String>, info: FileInfo) -> Self {
		Self::new(root_id, FileEventKind::Deleted, info)
	}

	/// `info` describes the entry at its new location
	pub fn moved(root_id: impl Into<String>, old_path: impl Into<String>, info: FileInfo) -> Self {
		let mut event = Self::new(root_id, FileEventKind::Moved, info);
		event.old_path = Some(old_path.into());
		event
	}

	pub fn with_children(mut self, children: Vec<FileInfo>) -> Self {
		self.children = children;
		self
	}

	pub fn with_moved_children(mut self, moved_children: Vec<MovedChild>) -> Self {
		self.moved_children = moved_children;
		self
	}

	/// Keep the time of the original observation
	pub fn with_detected_at(mut self, detected_at: DateTime<Utc>) -> Self {
		self.detected_at = detected_at;
		self
	}

	pub fn is_directory(&self) -> bool {
		self.info.is_directory
	}
}

/// Flat wire form handed to the catalog ingestion pipeline.
///
/// `moved` is applied as a path rewrite of `old_path` and of every
/// `moved_children` pair; anything else under the old directory arrives as
/// its own event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestEvent {
	pub root_id: String,
	#[serde(rename = "type")]
	pub kind: FileEventKind,
	pub path: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub old_path: Option<String>,
	pub size: u64,
	pub mod_time: Option<DateTime<Utc>>,
	pub is_directory: bool,
	pub detected_at: DateTime<Utc>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub moved_children: Vec<MovedChild>,
}

impl From<&FileEvent> for IngestEvent {
	fn from(event: &FileEvent) -> Self {
		Self {
			root_id: event.root_id.clone(),
			kind: event.kind,
			path: event.path.clone(),
			old_path: event.old_path.clone(),
			size: event.info.size,
			mod_time: event.info.mod_time,
			is_directory: event.info.is_directory,
			detected_at: event.detected_at,
			moved_children: event.moved_children.clone(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_ingest_event_wire_shape() {
		let event = FileEvent::moved(
			"movies",
			"/a/movie.mp4",
			FileInfo::file("/a/renamed.mp4", 7, None),
		);
		let json = serde_json::to_value(IngestEvent::from(&event)).unwrap();

		assert_eq!(json["type"], "moved");
		assert_eq!(json["root_id"], "movies");
		assert_eq!(json["path"], "/a/renamed.mp4");
		assert_eq!(json["old_path"], "/a/movie.mp4");
		assert_eq!(json["size"], 7);
		assert_eq!(json["is_directory"], false);
		assert!(json.get("moved_children").is_none());
	}

	#[test]
	fn test_created_has_no_old_path() {
		let event = FileEvent::created("r", FileInfo::file("/x", 1, None));
		let json = serde_json::to_value(IngestEvent::from(&event)).unwrap();
		assert!(json.get("old_path").is_none());
		assert_eq!(event.path, "/x");
	}
}
