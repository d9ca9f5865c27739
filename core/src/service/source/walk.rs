//! Breadth-first listing of a subtree through a storage backend

use std::collections::VecDeque;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::FileInfo;
use crate::volume::{path, SkippedEntry, StorageBackend, StorageError, StorageResult};

#[derive(Debug, Default)]
pub(crate) struct WalkOutcome {
	pub entries: Vec<FileInfo>,
	/// Entries the backend reported but could not describe
	pub skipped: Vec<SkippedEntry>,
	/// Directories whose listing failed; their contents are unknown
	pub failed_dirs: Vec<String>,
	/// Directories that disappeared between being listed and being read
	pub gone_dirs: Vec<String>,
}

/// List everything below `start` down to `max_depth` levels under the root.
///
/// Failing to list `start` itself fails the walk, as does any error saying
/// the backend is unreachable. Returns `None` when cancelled part way.
pub(crate) async fn walk(
	backend: &dyn StorageBackend,
	start: &str,
	max_depth: usize,
	cancel: Option<&CancellationToken>,
) -> StorageResult<Option<WalkOutcome>> {
	let mut outcome = WalkOutcome::default();
	let mut queue = VecDeque::from([start.to_string()]);

	while let Some(dir) = queue.pop_front() {
		if cancel.is_some_and(|token| token.is_cancelled()) {
			debug!("Walk of {} cancelled", start);
			return Ok(None);
		}

		let listing = match backend.list(&dir).await {
			Ok(listing) => listing,
			Err(e) if dir == start => return Err(e),
			Err(e) if e.is_unavailable() => return Err(e),
			Err(StorageError::NotFound(_)) => {
				debug!("Directory vanished during walk: {}", dir);
				outcome.gone_dirs.push(dir);
				continue;
			}
			Err(e) => {
				warn!("Failed to list {}, keeping previous contents: {}", dir, e);
				outcome.failed_dirs.push(dir);
				continue;
			}
		};

		for skipped in &listing.skipped {
			warn!("Skipping {}: {}", skipped.path, skipped.error);
		}
		outcome.skipped.extend(listing.skipped);

		for entry in listing.entries {
			if entry.is_directory && path::depth(&entry.path) < max_depth {
				queue.push_back(entry.path.clone());
			}
			outcome.entries.push(entry);
		}
	}

	Ok(Some(outcome))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::MemoryBackend;
	use crate::config::Protocol;

	#[tokio::test]
	async fn test_walk_respects_depth_and_failures() {
		let backend = MemoryBackend::new(Protocol::Ftp);
		backend.add_file("/a/b/c/deep.txt", b"deep");
		backend.add_file("/a/top.txt", b"top");
		backend.add_file("/locked/secret.txt", b"s");
		backend.connect().await.unwrap();
		backend.fail_path("/locked", StorageError::Protocol("550".into()));

		let outcome = walk(&backend, "/", 2, None).await.unwrap().unwrap();
		let mut paths = outcome
			.entries
			.iter()
			.map(|e| e.path.as_str())
			.collect::<Vec<_>>();
		paths.sort();

		assert_eq!(paths, vec!["/a", "/a/b", "/a/top.txt", "/locked"]);
		assert_eq!(outcome.failed_dirs, vec!["/locked".to_string()]);
	}

	#[tokio::test]
	async fn test_walk_aborts_when_unreachable() {
		let backend = MemoryBackend::new(Protocol::Ftp);
		backend.add_file("/a/x", b"x");
		backend.connect().await.unwrap();
		backend.fail_path("/a", StorageError::Connection("reset".into()));

		assert!(matches!(
			walk(&backend, "/", 8, None).await,
			Err(StorageError::Connection(_))
		));
	}

	#[tokio::test]
	async fn test_walk_stops_on_cancel() {
		let backend = MemoryBackend::new(Protocol::Ftp);
		backend.add_file("/a/x", b"x");
		backend.connect().await.unwrap();

		let token = CancellationToken::new();
		token.cancel();
		assert!(walk(&backend, "/", 8, Some(&token)).await.unwrap().is_none());
	}
}
