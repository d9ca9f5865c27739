//! Event-driven change source for local disk
//!
//! OS notifications arrive through `sd-fs-watcher` already debounced per
//! path. They are checked against an index of the tree (the poller's
//! snapshot) so deletes still know the signature of what vanished, and a
//! full rescan can reconcile whatever the watcher missed.

use sd_fs_watcher::{FsEvent, FsEventKind, FsEventStream, FsWatcher, WatcherConfig, WatcherError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::poller::SnapshotPoller;
use super::snapshot::Snapshot;
use super::walk::walk;
use crate::domain::{FileEvent, FileInfo};
use crate::volume::{path, LocalBackend, StorageBackend, StorageError, StorageResult};

#[derive(Debug)]
pub struct LocalChangeSource {
	root_id: String,
	root_path: PathBuf,
	/// Canonical form of `root_path`, which is what the OS reports
	canonical_root: Option<PathBuf>,
	backend: Arc<dyn StorageBackend>,
	index: SnapshotPoller,
}

impl LocalChangeSource {
	pub fn new(
		root_id: impl Into<String>,
		root_path: impl Into<PathBuf>,
		backend: Arc<dyn StorageBackend>,
		hash_threshold: u64,
		max_depth: usize,
		initial_scan: bool,
	) -> Self {
		let root_id = root_id.into();
		Self {
			index: SnapshotPoller::new(
				root_id.clone(),
				backend.clone(),
				hash_threshold,
				max_depth,
				initial_scan,
			),
			root_id,
			root_path: root_path.into(),
			canonical_root: None,
			backend,
		}
	}

	/// Source over a plain directory
	pub fn for_directory(
		root_id: impl Into<String>,
		root_path: impl Into<PathBuf>,
		hash_threshold: u64,
		max_depth: usize,
		initial_scan: bool,
	) -> Self {
		let root_path = root_path.into();
		let backend = Arc::new(LocalBackend::new(root_path.clone()));
		Self::new(
			root_id,
			root_path,
			backend,
			hash_threshold,
			max_depth,
			initial_scan,
		)
	}

	pub fn root_id(&self) -> &str {
		&self.root_id
	}

	pub fn backend(&self) -> &Arc<dyn StorageBackend> {
		&self.backend
	}

	pub fn index(&self) -> Option<&Snapshot> {
		self.index.snapshot()
	}

	/// Start the OS watch. Call before [`Self::reconcile`] so nothing between
	/// the initial walk and the first notification is lost.
	pub async fn watch(
		&mut self,
		config: WatcherConfig,
		cancel: CancellationToken,
	) -> Result<FsEventStream, WatcherError> {
		self.canonical_root = tokio::fs::canonicalize(&self.root_path).await.ok();
		FsWatcher::watch(&self.root_path, config, cancel)
	}

	/// Walk the whole tree against the index. The first call builds the index
	/// (and reports it as created when initial scan is on); later calls, after
	/// a re-established watch or a requested rescan, report what changed since
	/// the index was last correct.
	pub async fn reconcile(&mut self) -> StorageResult<Vec<FileEvent>> {
		self.index.poll().await
	}

	/// Turn a batch of watcher events into file events, updating the index.
	///
	/// Individual paths that cannot be inspected are logged and skipped; only
	/// an error making the whole root unusable is returned.
	pub async fn apply(&mut self, batch: Vec<FsEvent>) -> StorageResult<Vec<FileEvent>> {
		let mut events = Vec::new();

		for event in batch {
			trace!(root_id = %self.root_id, "Watcher event {:?}", event.kind);
			let result = match event.kind {
				FsEventKind::Create { path } | FsEventKind::Modify { path } => {
					match self.relative(&path) {
						Some(target) => self.on_upsert(&target, &mut events).await,
						None => Ok(()),
					}
				}
				FsEventKind::Remove { path } => {
					if let Some(target) = self.relative(&path) {
						self.on_remove(&target, &mut events);
					}
					Ok(())
				}
				FsEventKind::Rename { from, to } => {
					match (self.relative(&from), self.relative(&to)) {
						(Some(from), Some(to)) => self.on_rename(&from, &to, &mut events).await,
						(Some(from), None) => {
							self.on_remove(&from, &mut events);
							Ok(())
						}
						(None, Some(to)) => self.on_upsert(&to, &mut events).await,
						(None, None) => Ok(()),
					}
				}
			};

			match result {
				Ok(()) => {}
				Err(e) if e.is_unavailable() => return Err(e),
				Err(e) => warn!(root_id = %self.root_id, "Skipping watcher event: {}", e),
			}
		}

		Ok(events)
	}

	/// Root-relative form of an absolute path reported by the OS
	fn relative(&self, absolute: &Path) -> Option<String> {
		let stripped = absolute.strip_prefix(&self.root_path).ok().or_else(|| {
			self.canonical_root
				.as_ref()
				.and_then(|root| absolute.strip_prefix(root).ok())
		})?;

		let Some(text) = stripped.to_str() else {
			debug!("Ignoring non UTF-8 path {}", absolute.display());
			return None;
		};

		let target = path::normalize(text).ok()?;
		(target != path::ROOT && path::depth(&target) <= self.index.max_depth()).then_some(target)
	}

	fn index_mut(&mut self) -> Option<&mut Snapshot> {
		self.index.snapshot_mut()
	}

	async fn stat(&self, target: &str) -> StorageResult<Option<FileInfo>> {
		match self.backend.stat(target).await {
			Ok(info) => Ok(Some(info)),
			Err(StorageError::NotFound(_)) => Ok(None),
			Err(e) => Err(e),
		}
	}

	/// Created or modified: whatever is on disk now wins
	async fn on_upsert(&mut self, target: &str, events: &mut Vec<FileEvent>) -> StorageResult<()> {
		let Some(mut info) = self.stat(target).await? else {
			self.on_remove(target, events);
			return Ok(());
		};

		let known = self.index().and_then(|index| index.get(target)).cloned();

		match known {
			Some(old) if old.is_directory != info.is_directory => {
				self.on_remove(target, events);
				self.on_create(info, events).await
			}
			Some(old) if old.is_directory || old.same_state(&info) => Ok(()),
			Some(_) => {
				self.index.signer().sign(&mut info).await?;
				if let Some(index) = self.index_mut() {
					index.insert(info.clone());
				}
				events.push(FileEvent::modified(&self.root_id, info));
				Ok(())
			}
			None => self.on_create(info, events).await,
		}
	}

	async fn on_create(&mut self, mut info: FileInfo, events: &mut Vec<FileEvent>) -> StorageResult<()> {
		if !info.is_directory {
			self.index.signer().sign(&mut info).await?;
			if let Some(index) = self.index_mut() {
				index.insert(info.clone());
			}
			events.push(FileEvent::created(&self.root_id, info));
			return Ok(());
		}

		// A directory can show up with content already inside it (moved in
		// from outside the root, or created faster than the watch)
		let mut subtree = Snapshot::new();
		let max_depth = self.index.max_depth();
		if path::depth(&info.path) < max_depth {
			if let Some(outcome) = walk(self.backend.as_ref(), &info.path, max_depth, None).await? {
				subtree = outcome.entries.into_iter().collect();
			}
		}
		self.index
			.signer()
			.sign_snapshot(&mut subtree, &Snapshot::new())
			.await?;

		let children = subtree.iter().cloned().collect::<Vec<_>>();
		let signed = info.clone().with_signature(subtree.directory_signature(&info.path));

		if let Some(index) = self.index_mut() {
			index.insert(info);
			for child in &children {
				index.insert(child.clone());
			}
		}

		events.push(FileEvent::created(&self.root_id, signed).with_children(children));
		Ok(())
	}

	fn on_remove(&mut self, target: &str, events: &mut Vec<FileEvent>) {
		let root_id = self.root_id.clone();
		let Some(index) = self.index_mut() else {
			return;
		};

		let signature = index
			.get(target)
			.filter(|info| info.is_directory)
			.map(|_| index.directory_signature(target));

		let mut removed = index.remove_subtree(target).into_iter();
		let Some(entry) = removed.next() else {
			trace!("Remove of unindexed path {}", target);
			return;
		};

		let event = match signature {
			Some(signature) => FileEvent::deleted(root_id, entry.with_signature(signature))
				.with_children(removed.collect()),
			None => FileEvent::deleted(root_id, entry),
		};
		events.push(event);
	}

	async fn on_rename(&mut self, from: &str, to: &str, events: &mut Vec<FileEvent>) -> StorageResult<()> {
		if self.stat(to).await?.is_none() {
			self.on_remove(from, events);
			return Ok(());
		}

		let known = self.index().is_some_and(|index| index.contains(from));
		if !known {
			return self.on_upsert(to, events).await;
		}

		// Whatever the move overwrote is gone
		if self.index().is_some_and(|index| index.contains(to)) {
			self.on_remove(to, events);
		}

		let root_id = self.root_id.clone();
		let Some(index) = self.index_mut() else {
			return Ok(());
		};
		let moved_children = index.rebase_subtree(from, to);

		if let Some(info) = index.get(to).cloned() {
			events.push(FileEvent::moved(root_id, from, info).with_moved_children(moved_children));
		}

		// The content may also have changed on the way
		self.on_upsert(to, events).await
	}
}
