//! Snapshot-diff change source for protocols without change notification

use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::signer::Signer;
use super::snapshot::Snapshot;
use super::walk::walk;
use crate::domain::FileEvent;
use crate::volume::{path, StorageBackend, StorageResult};

/// Lists a root on demand and reports what changed since the last listing.
///
/// Holds the root's [`Snapshot`]; the caller guarantees one `poll` at a
/// time by holding `&mut self`.
#[derive(Debug)]
pub struct SnapshotPoller {
	root_id: String,
	backend: Arc<dyn StorageBackend>,
	signer: Signer,
	max_depth: usize,
	/// Emit the baseline listing as `created` events
	initial_scan: bool,
	/// `None` until the first successful poll
	snapshot: Option<Snapshot>,
	cancel: Option<CancellationToken>,
}

impl SnapshotPoller {
	pub fn new(
		root_id: impl Into<String>,
		backend: Arc<dyn StorageBackend>,
		hash_threshold: u64,
		max_depth: usize,
		initial_scan: bool,
	) -> Self {
		Self {
			root_id: root_id.into(),
			signer: Signer::new(backend.clone(), hash_threshold),
			backend,
			max_depth,
			initial_scan,
			snapshot: None,
			cancel: None,
		}
	}

	/// Abandon a running poll between directory listings once `token` fires
	pub fn with_cancel(mut self, token: CancellationToken) -> Self {
		self.cancel = Some(token);
		self
	}

	pub fn root_id(&self) -> &str {
		&self.root_id
	}

	pub fn snapshot(&self) -> Option<&Snapshot> {
		self.snapshot.as_ref()
	}

	pub(crate) fn snapshot_mut(&mut self) -> Option<&mut Snapshot> {
		self.snapshot.as_mut()
	}

	pub(crate) fn signer(&self) -> &Signer {
		&self.signer
	}

	pub(crate) fn max_depth(&self) -> usize {
		self.max_depth
	}

	pub fn has_baseline(&self) -> bool {
		self.snapshot.is_some()
	}

	/// Run one poll cycle.
	///
	/// On error the previous snapshot is left untouched, so the next
	/// successful cycle diffs against the last state actually seen.
	pub async fn poll(&mut self) -> StorageResult<Vec<FileEvent>> {
		let started = Instant::now();

		let Some(outcome) = walk(
			self.backend.as_ref(),
			path::ROOT,
			self.max_depth,
			self.cancel.as_ref(),
		)
		.await?
		else {
			return Ok(Vec::new());
		};

		let empty = Snapshot::new();
		let previous = self.snapshot.as_ref().unwrap_or(&empty);

		let mut current: Snapshot = outcome.entries.into_iter().collect();

		for gone in &outcome.gone_dirs {
			current.remove_subtree(gone);
		}

		// What could not be seen keeps its last known state
		for failed in &outcome.failed_dirs {
			for info in previous.descendants(failed) {
				current.insert(info.clone());
			}
		}
		for skipped in &outcome.skipped {
			if let Some(info) = previous.get(&skipped.path) {
				current.insert(info.clone());
				for below in previous.descendants(&skipped.path) {
					current.insert(below.clone());
				}
			}
		}

		self.signer.sign_snapshot(&mut current, previous).await?;

		let events = match &self.snapshot {
			Some(previous) => Snapshot::diff(previous, &current, &self.root_id),
			None if self.initial_scan => Snapshot::diff(&empty, &current, &self.root_id),
			None => Vec::new(),
		};

		if self.snapshot.is_none() {
			info!(
				root_id = %self.root_id,
				entries = current.len(),
				"Baseline listing taken in {:?}",
				started.elapsed()
			);
		} else {
			debug!(
				root_id = %self.root_id,
				entries = current.len(),
				events = events.len(),
				"Poll finished in {:?}",
				started.elapsed()
			);
		}

		self.snapshot = Some(current);
		Ok(events)
	}
}
