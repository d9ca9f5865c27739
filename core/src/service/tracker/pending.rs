//! Pending deletes of one root, waiting for a matching create

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use tokio::time::Instant;

use super::directory::directory_signature;
use crate::domain::{ContentSignature, FileEvent, FileInfo};

/// A delete held back in case the entry reappears elsewhere
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDelete {
	pub root_id: String,
	pub path: String,
	pub signature: ContentSignature,
	pub info: FileInfo,
	/// Descendants, when the entry is a directory
	pub children: Vec<FileInfo>,
	pub deleted_at: Instant,
	pub expires_at: Instant,
	/// Wall clock time the delete was observed
	pub detected_at: DateTime<Utc>,
	pub(super) seq: u64,
}

impl PendingDelete {
	pub fn is_expired(&self, now: Instant) -> bool {
		now > self.expires_at
	}

	pub fn is_directory(&self) -> bool {
		self.info.is_directory
	}

	fn order_key(&self) -> (Instant, u64) {
		(self.deleted_at, self.seq)
	}

	/// The delete was real: the entry, then every descendant
	pub fn into_deleted_events(self) -> Vec<FileEvent> {
		let mut children = self.children;
		children.sort_by(|a, b| a.path.cmp(&b.path));

		let mut events = Vec::with_capacity(children.len() + 1);
		events.push(
			FileEvent::deleted(self.root_id.clone(), self.info).with_detected_at(self.detected_at),
		);
		events.extend(children.into_iter().map(|child| {
			FileEvent::deleted(self.root_id.clone(), child).with_detected_at(self.detected_at)
		}));
		events
	}
}

/// A file-level match and whether other candidates shared its signature
#[derive(Debug)]
pub(crate) struct FileMatch {
	pub pending: PendingDelete,
	pub ambiguous: bool,
}

/// Per-root storage for pending deletes.
///
/// At most `batch_size` entries are admitted per cycle; the rest wait in
/// `deferred`, in arrival order, and are still consulted by lookups.
#[derive(Debug)]
pub(crate) struct PendingTable {
	/// FIFO per signature, ordered by deletion time
	files: HashMap<ContentSignature, VecDeque<PendingDelete>>,
	/// Path index into `files`
	paths: HashMap<String, ContentSignature>,
	file_count: usize,
	directories: VecDeque<PendingDelete>,
	deferred: VecDeque<PendingDelete>,
	batch_size: usize,
	admitted: usize,
	next_seq: u64,
}

fn insert_ordered(queue: &mut VecDeque<PendingDelete>, entry: PendingDelete) {
	let key = entry.order_key();
	let position = queue.partition_point(|existing| existing.order_key() <= key);
	queue.insert(position, entry);
}

fn sort_by_age(entries: &mut [PendingDelete]) {
	entries.sort_by_key(PendingDelete::order_key);
}

impl PendingTable {
	pub fn new(batch_size: usize) -> Self {
		Self {
			files: HashMap::new(),
			paths: HashMap::new(),
			file_count: 0,
			directories: VecDeque::new(),
			deferred: VecDeque::new(),
			batch_size: batch_size.max(1),
			admitted: 0,
			next_seq: 0,
		}
	}

	pub fn next_seq(&mut self) -> u64 {
		self.next_seq += 1;
		self.next_seq
	}

	/// Entries in the table proper
	pub fn len(&self) -> usize {
		self.file_count + self.directories.len()
	}

	pub fn file_count(&self) -> usize {
		self.file_count
	}

	pub fn directory_count(&self) -> usize {
		self.directories.len()
	}

	pub fn deferred_len(&self) -> usize {
		self.deferred.len()
	}

	/// Start a new admission cycle and promote deferred entries into the
	/// freed budget. Deferred entries that expired while waiting are returned.
	pub fn begin_cycle(&mut self, now: Instant) -> Vec<PendingDelete> {
		self.admitted = 0;
		let mut expired = Vec::new();

		while self.admitted < self.batch_size {
			let Some(entry) = self.deferred.pop_front() else {
				break;
			};
			if entry.is_expired(now) {
				expired.push(entry);
			} else {
				self.insert(entry);
				self.admitted += 1;
			}
		}

		expired
	}

	/// Hold a delete, in the table if this cycle has budget left
	pub fn admit(&mut self, entry: PendingDelete) {
		if self.admitted < self.batch_size {
			self.insert(entry);
			self.admitted += 1;
		} else {
			self.deferred.push_back(entry);
		}
	}

	fn insert(&mut self, entry: PendingDelete) {
		if entry.is_directory() {
			insert_ordered(&mut self.directories, entry);
			return;
		}

		self.paths.insert(entry.path.clone(), entry.signature.clone());
		self.file_count += 1;
		insert_ordered(self.files.entry(entry.signature.clone()).or_default(), entry);
	}

	fn forget_file(&mut self, entry: &PendingDelete) {
		self.file_count -= 1;
		if self.paths.get(&entry.path) == Some(&entry.signature) {
			self.paths.remove(&entry.path);
		}
	}

	/// Oldest unexpired file delete with `signature`: table first, then
	/// deferred, then files inside pending directory deletes. Expired entries
	/// met on the way are moved into `expired`.
	pub fn take_file_match(
		&mut self,
		signature: &ContentSignature,
		now: Instant,
		expired: &mut Vec<PendingDelete>,
	) -> Option<FileMatch> {
		let mut found = None;

		if let Some(queue) = self.files.get_mut(signature) {
			let mut stale = Vec::new();
			while let Some(front) = queue.pop_front() {
				if front.is_expired(now) {
					stale.push(front);
				} else {
					found = Some(front);
					break;
				}
			}
			let remaining = queue.iter().any(|e| !e.is_expired(now));
			if queue.is_empty() {
				self.files.remove(signature);
			}

			for entry in &stale {
				self.forget_file(entry);
			}
			expired.extend(stale);

			if let Some(pending) = found.take() {
				self.forget_file(&pending);
				let ambiguous = remaining || self.deferred_has(signature, now);
				return Some(FileMatch { pending, ambiguous });
			}
		}

		let mut idx = 0;
		while idx < self.deferred.len() {
			let entry = &self.deferred[idx];
			if entry.is_directory() || &entry.signature != signature {
				idx += 1;
				continue;
			}
			if entry.is_expired(now) {
				if let Some(stale) = self.deferred.remove(idx) {
					expired.push(stale);
				}
				continue;
			}
			let pending = self.deferred.remove(idx)?;
			let ambiguous = self.deferred_has(signature, now);
			return Some(FileMatch { pending, ambiguous });
		}

		self.take_directory_child(signature, now)
	}

	/// A file moved out of a directory that was deleted afterwards. The file
	/// is detached from its pending parent so the parent's expiry no longer
	/// reports it.
	fn take_directory_child(&mut self, signature: &ContentSignature, now: Instant) -> Option<FileMatch> {
		let mut found: Option<(bool, usize, usize)> = None;
		let mut others = false;

		let tables = [(false, &self.directories), (true, &self.deferred)];
		for (in_deferred, queue) in tables {
			for (idx, dir) in queue.iter().enumerate() {
				if !dir.is_directory() || dir.is_expired(now) {
					continue;
				}
				for (child_idx, child) in dir.children.iter().enumerate() {
					if child.is_directory || child.content_signature.as_ref() != Some(signature) {
						continue;
					}
					if found.is_none() {
						found = Some((in_deferred, idx, child_idx));
					} else {
						others = true;
					}
				}
			}
		}

		let (in_deferred, idx, child_idx) = found?;
		let parent = if in_deferred {
			self.deferred.get_mut(idx)?
		} else {
			self.directories.get_mut(idx)?
		};

		let info = parent.children.remove(child_idx);
		parent.signature = directory_signature(&parent.path, &parent.children);

		Some(FileMatch {
			pending: PendingDelete {
				root_id: parent.root_id.clone(),
				path: info.path.clone(),
				signature: signature.clone(),
				info,
				children: Vec::new(),
				deleted_at: parent.deleted_at,
				expires_at: parent.expires_at,
				detected_at: parent.detected_at,
				seq: parent.seq,
			},
			ambiguous: others,
		})
	}

	fn deferred_has(&self, signature: &ContentSignature, now: Instant) -> bool {
		self.deferred
			.iter()
			.any(|e| !e.is_directory() && &e.signature == signature && !e.is_expired(now))
	}

	/// Remove whatever pending delete sits at `target`, of any kind
	pub fn take_path(&mut self, target: &str) -> Option<PendingDelete> {
		if let Some(signature) = self.paths.get(target).cloned() {
			if let Some(queue) = self.files.get_mut(&signature) {
				if let Some(position) = queue.iter().position(|e| e.path == target) {
					let entry = queue.remove(position);
					if queue.is_empty() {
						self.files.remove(&signature);
					}
					if let Some(entry) = entry {
						self.forget_file(&entry);
						return Some(entry);
					}
				}
			}
		}

		if let Some(position) = self.directories.iter().position(|e| e.path == target) {
			return self.directories.remove(position);
		}

		let position = self.deferred.iter().position(|e| e.path == target)?;
		self.deferred.remove(position)
	}

	/// Pending directories, oldest first, deferred ones last
	pub fn directory_candidates(&self) -> impl Iterator<Item = &PendingDelete> {
		self.directories
			.iter()
			.chain(self.deferred.iter().filter(|e| e.is_directory()))
	}

	pub fn take_directory(&mut self, seq: u64) -> Option<PendingDelete> {
		if let Some(position) = self.directories.iter().position(|e| e.seq == seq) {
			return self.directories.remove(position);
		}
		let position = self.deferred.iter().position(|e| e.seq == seq)?;
		self.deferred.remove(position)
	}

	/// Remove expired directories, wherever they wait
	pub fn drain_expired_directories(&mut self, now: Instant) -> Vec<PendingDelete> {
		let mut expired = Vec::new();

		let (stale, live): (Vec<_>, Vec<_>) = self
			.directories
			.drain(..)
			.partition(|e| e.is_expired(now));
		self.directories = live.into();
		expired.extend(stale);

		let (stale, live): (Vec<_>, Vec<_>) = self
			.deferred
			.drain(..)
			.partition(|e| e.is_directory() && e.is_expired(now));
		self.deferred = live.into();
		expired.extend(stale);

		sort_by_age(&mut expired);
		expired
	}

	/// Remove every expired entry, oldest first
	pub fn drain_expired(&mut self, now: Instant) -> Vec<PendingDelete> {
		let mut expired = self.drain_expired_directories(now);

		let mut emptied = Vec::new();
		let mut stale_files = Vec::new();
		for (signature, queue) in self.files.iter_mut() {
			while queue.front().is_some_and(|e| e.is_expired(now)) {
				if let Some(entry) = queue.pop_front() {
					stale_files.push(entry);
				}
			}
			if queue.is_empty() {
				emptied.push(signature.clone());
			}
		}
		for signature in emptied {
			self.files.remove(&signature);
		}
		for entry in &stale_files {
			self.forget_file(entry);
		}
		expired.extend(stale_files);

		let (stale, live): (Vec<_>, Vec<_>) =
			self.deferred.drain(..).partition(|e| e.is_expired(now));
		self.deferred = live.into();
		expired.extend(stale);

		sort_by_age(&mut expired);
		expired
	}

	/// Empty the table, oldest first
	pub fn drain_all(&mut self) -> Vec<PendingDelete> {
		let mut all = self
			.files
			.drain()
			.flat_map(|(_, queue)| queue)
			.chain(self.directories.drain(..))
			.chain(self.deferred.drain(..))
			.collect::<Vec<_>>();

		self.paths.clear();
		self.file_count = 0;
		sort_by_age(&mut all);
		all
	}
}
