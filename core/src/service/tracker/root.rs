//! Move/rename correlation for one storage root

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::directory::{directory_signature, match_ratio, pair_children};
use super::pending::{PendingDelete, PendingTable};
use crate::config::{StorageRoot, SyncSettings};
use crate::domain::{FileEvent, FileEventKind, FileInfo};
use crate::volume::path;

#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
	/// How long a delete waits for a matching create
	pub move_window: Duration,
	/// Pending deletes admitted per cycle
	pub batch_size: usize,
	/// Share of child signatures needed to call two directories the same
	pub directory_match_ratio: f64,
}

impl TrackerConfig {
	pub fn for_root(root: &StorageRoot, settings: &SyncSettings) -> Self {
		Self {
			move_window: root.effective_move_window(),
			batch_size: root.effective_batch_size(),
			directory_match_ratio: settings.directory_match_ratio,
		}
	}
}

/// Counters for one root's tracker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerStats {
	pub root_id: String,
	pub pending_files: usize,
	pub pending_directories: usize,
	pub deferred: usize,
	pub moves_detected: u64,
	pub directory_moves_detected: u64,
	pub ambiguous_matches: u64,
	pub expirations: u64,
}

#[derive(Debug)]
struct TrackerState {
	table: PendingTable,
	moves: u64,
	directory_moves: u64,
	ambiguous: u64,
	expirations: u64,
}

/// Turns delete/create pairs of one root into moves.
///
/// Events are processed strictly in the order given. All state sits behind
/// one lock that is never held across an await.
#[derive(Debug)]
pub struct RootTracker {
	root_id: String,
	config: TrackerConfig,
	state: Mutex<TrackerState>,
}

impl RootTracker {
	pub fn new(root_id: impl Into<String>, config: TrackerConfig) -> Self {
		Self {
			root_id: root_id.into(),
			state: Mutex::new(TrackerState {
				table: PendingTable::new(config.batch_size),
				moves: 0,
				directory_moves: 0,
				ambiguous: 0,
				expirations: 0,
			}),
			config,
		}
	}

	pub fn root_id(&self) -> &str {
		&self.root_id
	}

	pub fn config(&self) -> &TrackerConfig {
		&self.config
	}

	/// Correlate one batch of change-source output. Starts a new admission
	/// cycle.
	pub fn process_batch(&self, events: Vec<FileEvent>, now: Instant) -> Vec<FileEvent> {
		let mut state = self.state.lock();
		let mut out = Vec::with_capacity(events.len());

		let expired = state.table.begin_cycle(now);
		self.flush(&mut state, expired, &mut out);

		for event in events {
			match event.kind {
				FileEventKind::Deleted => self.on_deleted(&mut state, event, now, &mut out),
				FileEventKind::Created if event.is_directory() => {
					self.on_created_directory(&mut state, event, now, &mut out)
				}
				FileEventKind::Created => {
					let detected_at = event.detected_at;
					self.on_created_file(&mut state, event.info, detected_at, now, &mut out)
				}
				FileEventKind::Modified | FileEventKind::Moved => out.push(event),
			}
		}

		out
	}

	/// Flush expired pending deletes as real deletes. Starts a new admission
	/// cycle.
	pub fn cleanup(&self, now: Instant) -> Vec<FileEvent> {
		let mut state = self.state.lock();
		let mut out = Vec::new();

		let expired = state.table.begin_cycle(now);
		self.flush(&mut state, expired, &mut out);
		let expired = state.table.drain_expired(now);
		self.flush(&mut state, expired, &mut out);

		if !out.is_empty() {
			debug!(
				root_id = %self.root_id,
				"Flushed {} expired deletes, {} still pending",
				out.len(),
				state.table.len()
			);
		}
		out
	}

	/// Give up on every pending delete, e.g. when the root goes away
	pub fn flush_all(&self) -> Vec<FileEvent> {
		let mut state = self.state.lock();
		let mut out = Vec::new();
		let all = state.table.drain_all();
		self.flush(&mut state, all, &mut out);
		out
	}

	/// Entries in the pending table, deferred ones excluded
	pub fn pending_len(&self) -> usize {
		self.state.lock().table.len()
	}

	pub fn deferred_len(&self) -> usize {
		self.state.lock().table.deferred_len()
	}

	pub fn stats(&self) -> TrackerStats {
		let state = self.state.lock();
		TrackerStats {
			root_id: self.root_id.clone(),
			pending_files: state.table.file_count(),
			pending_directories: state.table.directory_count(),
			deferred: state.table.deferred_len(),
			moves_detected: state.moves,
			directory_moves_detected: state.directory_moves,
			ambiguous_matches: state.ambiguous,
			expirations: state.expirations,
		}
	}

	fn flush(&self, state: &mut TrackerState, entries: Vec<PendingDelete>, out: &mut Vec<FileEvent>) {
		for entry in entries {
			state.expirations += 1;
			out.extend(entry.into_deleted_events());
		}
	}

	fn pending(&self, state: &mut TrackerState, event: &FileEvent, now: Instant) -> Option<PendingDelete> {
		let signature = event.info.content_signature.clone()?;
		Some(PendingDelete {
			root_id: self.root_id.clone(),
			path: event.path.clone(),
			signature,
			info: event.info.clone(),
			children: event.children.clone(),
			deleted_at: now,
			expires_at: now + self.config.move_window,
			detected_at: event.detected_at,
			seq: state.table.next_seq(),
		})
	}

	fn on_deleted(&self, state: &mut TrackerState, event: FileEvent, now: Instant, out: &mut Vec<FileEvent>) {
		match self.pending(state, &event, now) {
			Some(entry) => state.table.admit(entry),
			// Nothing to match it against later
			None => {
				let detected_at = event.detected_at;
				let children = event.children;
				out.push(FileEvent::deleted(&self.root_id, event.info).with_detected_at(detected_at));
				out.extend(children.into_iter().map(|child| {
					FileEvent::deleted(&self.root_id, child).with_detected_at(detected_at)
				}));
			}
		}
	}

	fn on_created_file(
		&self,
		state: &mut TrackerState,
		info: FileInfo,
		detected_at: chrono::DateTime<chrono::Utc>,
		now: Instant,
		out: &mut Vec<FileEvent>,
	) {
		let Some(signature) = info.content_signature.clone() else {
			out.push(FileEvent::created(&self.root_id, info).with_detected_at(detected_at));
			return;
		};

		let mut expired = Vec::new();
		let found = state.table.take_file_match(&signature, now, &mut expired);
		self.flush(state, expired, out);

		if let Some(found) = found {
			if found.ambiguous {
				state.ambiguous += 1;
				warn!(
					root_id = %self.root_id,
					path = %info.path,
					"Ambiguous move match, taking the oldest delete {}",
					found.pending.path
				);
			}

			if found.pending.path == info.path {
				out.push(FileEvent::modified(&self.root_id, info).with_detected_at(detected_at));
				return;
			}

			// The move landed on top of something that was also deleted
			if let Some(replaced) = state.table.take_path(&info.path) {
				out.extend(replaced.into_deleted_events());
			}

			state.moves += 1;
			debug!(
				root_id = %self.root_id,
				"Detected move {} -> {}",
				found.pending.path,
				info.path
			);
			out.push(
				FileEvent::moved(&self.root_id, found.pending.path, info).with_detected_at(detected_at),
			);
			return;
		}

		match state.table.take_path(&info.path) {
			// Replaced in place with different content
			Some(previous) if !previous.is_directory() && !previous.is_expired(now) => {
				out.push(FileEvent::modified(&self.root_id, info).with_detected_at(detected_at));
			}
			Some(previous) => {
				self.flush(state, vec![previous], out);
				out.push(FileEvent::created(&self.root_id, info).with_detected_at(detected_at));
			}
			None => out.push(FileEvent::created(&self.root_id, info).with_detected_at(detected_at)),
		}
	}

	/// Pending directory the created one most likely came from
	fn find_directory_match(&self, state: &mut TrackerState, event: &FileEvent) -> Option<u64> {
		let signature = event.info.content_signature.as_ref()?;

		let mut exact = state
			.table
			.directory_candidates()
			.filter(|candidate| &candidate.signature == signature);
		if let Some(first) = exact.next() {
			let seq = first.seq;
			if exact.next().is_some() {
				state.ambiguous += 1;
				warn!(
					root_id = %self.root_id,
					path = %event.path,
					"Ambiguous directory match, taking the oldest delete"
				);
			}
			return Some(seq);
		}

		// A sub-directory that is itself an exact move wins over a partial
		// match on the new parent
		if self.has_nested_exact_match(state, event) {
			return None;
		}

		let mut best: Option<(f64, u64)> = None;
		for candidate in state.table.directory_candidates() {
			let ratio = match_ratio(&candidate.children, &event.children);
			if ratio >= self.config.directory_match_ratio && best.map_or(true, |(top, _)| ratio > top) {
				best = Some((ratio, candidate.seq));
			}
		}

		best.map(|(ratio, seq)| {
			debug!(
				root_id = %self.root_id,
				path = %event.path,
				"Partial directory match at {:.0}%",
				ratio * 100.0
			);
			seq
		})
	}

	fn has_nested_exact_match(&self, state: &TrackerState, event: &FileEvent) -> bool {
		if state.table.directory_count() == 0 {
			return false;
		}

		event
			.children
			.iter()
			.filter(|child| child.is_directory)
			.any(|dir| {
				let descendants = event
					.children
					.iter()
					.filter(|c| path::is_descendant(&c.path, &dir.path))
					.cloned()
					.collect::<Vec<_>>();
				let signature = directory_signature(&dir.path, &descendants);
				state
					.table
					.directory_candidates()
					.any(|candidate| candidate.signature == signature)
			})
	}

	fn on_created_directory(
		&self,
		state: &mut TrackerState,
		event: FileEvent,
		now: Instant,
		out: &mut Vec<FileEvent>,
	) {
		let expired = state.table.drain_expired_directories(now);
		self.flush(state, expired, out);

		let matched = self
			.find_directory_match(state, &event)
			.and_then(|seq| state.table.take_directory(seq));

		match matched {
			Some(pending) => self.apply_directory_move(state, pending, event, now, out),
			None => {
				let detected_at = event.detected_at;
				out.push(
					FileEvent::created(&self.root_id, event.info).with_detected_at(detected_at),
				);
				self.expand_created(state, event.children, detected_at, now, out);
			}
		}
	}

	/// Children of an unmatched created directory, parents first. Files go
	/// through file matching; sub-directories get their own directory match.
	fn expand_created(
		&self,
		state: &mut TrackerState,
		mut children: Vec<FileInfo>,
		detected_at: chrono::DateTime<chrono::Utc>,
		now: Instant,
		out: &mut Vec<FileEvent>,
	) {
		// Segment-wise order keeps every subtree contiguous
		children.sort_by(|a, b| a.path.split('/').cmp(b.path.split('/')));

		let mut rest = children.into_iter().peekable();
		while let Some(child) = rest.next() {
			if !child.is_directory {
				self.on_created_file(state, child, detected_at, now, out);
				continue;
			}

			let mut subtree = Vec::new();
			while let Some(next) = rest.next_if(|next| path::is_descendant(&next.path, &child.path)) {
				subtree.push(next);
			}

			let signature = directory_signature(&child.path, &subtree);
			let event = FileEvent::created(&self.root_id, child.with_signature(signature))
				.with_children(subtree)
				.with_detected_at(detected_at);
			self.on_created_directory(state, event, now, out);
		}
	}

	fn apply_directory_move(
		&self,
		state: &mut TrackerState,
		pending: PendingDelete,
		event: FileEvent,
		now: Instant,
		out: &mut Vec<FileEvent>,
	) {
		let detected_at = event.detected_at;
		let pairing = pair_children(&pending.path, pending.children, &event.path, &event.children);

		state.moves += 1;
		state.directory_moves += 1;
		info!(
			root_id = %self.root_id,
			children = pairing.moved.len(),
			"Detected directory move {} -> {}",
			pending.path,
			event.path
		);

		for dir in pairing.old_dirs {
			out.push(FileEvent::deleted(&self.root_id, dir).with_detected_at(pending.detected_at));
		}

		out.push(
			FileEvent::moved(&self.root_id, pending.path, event.info)
				.with_moved_children(pairing.moved)
				.with_detected_at(detected_at),
		);

		for changed in pairing.changed {
			out.push(FileEvent::modified(&self.root_id, changed).with_detected_at(detected_at));
		}
		for dir in pairing.new_dirs {
			out.push(FileEvent::created(&self.root_id, dir).with_detected_at(detected_at));
		}

		// Left behind in the old directory: they may still turn up elsewhere
		for file in pairing.old_files {
			match file.content_signature.clone() {
				Some(signature) => {
					let seq = state.table.next_seq();
					state.table.admit(PendingDelete {
						root_id: self.root_id.clone(),
						path: file.path.clone(),
						signature,
						info: file,
						children: Vec::new(),
						deleted_at: pending.deleted_at,
						expires_at: pending.expires_at,
						detected_at: pending.detected_at,
						seq,
					});
				}
				None => out.push(
					FileEvent::deleted(&self.root_id, file).with_detected_at(pending.detected_at),
				),
			}
		}

		for file in pairing.new_files {
			self.on_created_file(state, file, detected_at, now, out);
		}
	}
}
