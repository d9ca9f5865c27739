//! Last known listing of a root and the diff between two of them

use std::collections::{BTreeMap, HashSet};

use crate::domain::{ContentSignature, FileEvent, FileInfo, MovedChild};
use crate::volume::path;

/// `path → FileInfo` for every entry below a root, the root itself excluded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
	entries: BTreeMap<String, FileInfo>,
}

impl Snapshot {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn get(&self, target: &str) -> Option<&FileInfo> {
		self.entries.get(target)
	}

	pub fn contains(&self, target: &str) -> bool {
		self.entries.contains_key(target)
	}

	pub fn insert(&mut self, info: FileInfo) -> Option<FileInfo> {
		self.entries.insert(info.path.clone(), info)
	}

	pub fn iter(&self) -> impl Iterator<Item = &FileInfo> {
		self.entries.values()
	}

	pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut FileInfo> {
		self.entries.values_mut()
	}

	/// Entries strictly below `dir`, in path order
	pub fn descendants<'a>(&'a self, dir: &str) -> impl Iterator<Item = &'a FileInfo> + 'a {
		let prefix = if dir == path::ROOT {
			path::ROOT.to_string()
		} else {
			format!("{dir}/")
		};

		self.entries
			.range(prefix.clone()..)
			.take_while(move |(key, _)| key.starts_with(&prefix))
			.map(|(_, info)| info)
	}

	/// Remove `target` and everything below it. The entry itself comes first.
	pub fn remove_subtree(&mut self, target: &str) -> Vec<FileInfo> {
		let Some(entry) = self.entries.remove(target) else {
			return Vec::new();
		};

		let below = self
			.descendants(target)
			.map(|info| info.path.clone())
			.collect::<Vec<_>>();

		let mut removed = Vec::with_capacity(below.len() + 1);
		removed.push(entry);
		removed.extend(below.iter().filter_map(|key| self.entries.remove(key)));
		removed
	}

	/// Move `from` and its subtree under `to`, returning the rewritten
	/// descendants
	pub fn rebase_subtree(&mut self, from: &str, to: &str) -> Vec<MovedChild> {
		let removed = self.remove_subtree(from);
		let mut moved = Vec::with_capacity(removed.len().saturating_sub(1));

		for (idx, info) in removed.into_iter().enumerate() {
			let Some(new_path) = path::rebase(&info.path, from, to) else {
				continue;
			};
			if idx > 0 {
				moved.push(MovedChild {
					old_path: info.path.clone(),
					new_path: new_path.clone(),
				});
			}
			self.insert(info.relocated(new_path));
		}

		moved
	}

	/// Signature over the signed files below `dir`
	pub fn directory_signature(&self, dir: &str) -> ContentSignature {
		let files = self
			.descendants(dir)
			.filter(|info| !info.is_directory)
			.filter_map(|info| {
				let relative = path::strip_ancestor(&info.path, dir)?;
				Some((relative, info.content_signature.as_ref()?))
			})
			.collect::<Vec<_>>();

		ContentSignature::for_directory(files)
	}

	/// Events turning `previous` into `current`.
	///
	/// Deletes come first, then creates, then modifications, each in path
	/// order. Descendants of a created or deleted directory are folded into
	/// the directory's event; directories are never reported as modified.
	pub fn diff(previous: &Snapshot, current: &Snapshot, root_id: &str) -> Vec<FileEvent> {
		let deleted = changed_entries(previous, current);
		let created = changed_entries(current, previous);

		let mut events = Vec::new();
		events.extend(fold(previous, &deleted, |info, children| {
			FileEvent::deleted(root_id, info).with_children(children)
		}));
		events.extend(fold(current, &created, |info, children| {
			FileEvent::created(root_id, info).with_children(children)
		}));

		for info in current.iter().filter(|info| !info.is_directory) {
			if let Some(old) = previous.get(&info.path) {
				if !old.is_directory && !old.same_state(info) {
					events.push(FileEvent::modified(root_id, info.clone()));
				}
			}
		}

		events
	}
}

/// Paths in `side` that are missing from `other` or changed kind
fn changed_entries(side: &Snapshot, other: &Snapshot) -> HashSet<String> {
	side.iter()
		.filter(|info| match other.get(&info.path) {
			Some(counterpart) => counterpart.is_directory != info.is_directory,
			None => true,
		})
		.map(|info| info.path.clone())
		.collect()
}

/// One event per changed entry whose parent did not change as well
fn fold(
	snapshot: &Snapshot,
	changed: &HashSet<String>,
	make: impl Fn(FileInfo, Vec<FileInfo>) -> FileEvent,
) -> Vec<FileEvent> {
	let covered = |target: &str| {
		let mut current = path::parent(target);
		while let Some(ancestor) = current {
			if changed.contains(ancestor) {
				return true;
			}
			current = path::parent(ancestor);
		}
		false
	};

	snapshot
		.iter()
		.filter(|info| changed.contains(&info.path) && !covered(&info.path))
		.map(|info| {
			if info.is_directory {
				let children = snapshot.descendants(&info.path).cloned().collect();
				let signed = info
					.clone()
					.with_signature(snapshot.directory_signature(&info.path));
				make(signed, children)
			} else {
				make(info.clone(), Vec::new())
			}
		})
		.collect()
}

impl FromIterator<FileInfo> for Snapshot {
	fn from_iter<T: IntoIterator<Item = FileInfo>>(iter: T) -> Self {
		Self {
			entries: iter
				.into_iter()
				.map(|info| (info.path.clone(), info))
				.collect(),
		}
	}
}
