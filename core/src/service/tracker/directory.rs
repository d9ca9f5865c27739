//! Comparing the contents of a deleted and a created directory

use std::collections::{HashMap, VecDeque};

use crate::domain::{ContentSignature, FileInfo, MovedChild};
use crate::volume::path;

/// Signature of a directory from its descendants
pub(crate) fn directory_signature(dir: &str, descendants: &[FileInfo]) -> ContentSignature {
	ContentSignature::for_directory(descendants.iter().filter(|c| !c.is_directory).filter_map(
		|child| {
			Some((
				path::strip_ancestor(&child.path, dir)?,
				child.content_signature.as_ref()?,
			))
		},
	))
}

/// Fraction of file signatures two directories share, counted as a
/// multiset and divided by the larger file count
pub(crate) fn match_ratio(old: &[FileInfo], new: &[FileInfo]) -> f64 {
	let mut available: HashMap<&ContentSignature, usize> = HashMap::new();
	let mut old_files = 0usize;
	for signature in old
		.iter()
		.filter(|c| !c.is_directory)
		.filter_map(|c| c.content_signature.as_ref())
	{
		*available.entry(signature).or_default() += 1;
		old_files += 1;
	}

	let mut new_files = 0usize;
	let mut matched = 0usize;
	for signature in new
		.iter()
		.filter(|c| !c.is_directory)
		.filter_map(|c| c.content_signature.as_ref())
	{
		new_files += 1;
		if let Some(count) = available.get_mut(signature) {
			if *count > 0 {
				*count -= 1;
				matched += 1;
			}
		}
	}

	let larger = old_files.max(new_files);
	if larger == 0 {
		0.0
	} else {
		matched as f64 / larger as f64
	}
}

/// How the children of a moved directory line up
#[derive(Debug, Default, PartialEq)]
pub(crate) struct Pairing {
	/// Carried along by the move, possibly renamed inside it
	pub moved: Vec<MovedChild>,
	/// Paired by position but with different content
	pub changed: Vec<FileInfo>,
	pub new_files: Vec<FileInfo>,
	pub old_files: Vec<FileInfo>,
	pub new_dirs: Vec<FileInfo>,
	pub old_dirs: Vec<FileInfo>,
}

/// Pair the descendants of `old_root` with those of `new_root`: by
/// identical relative path first, then remaining files by signature
pub(crate) fn pair_children(
	old_root: &str,
	old: Vec<FileInfo>,
	new_root: &str,
	new: &[FileInfo],
) -> Pairing {
	let mut pairing = Pairing::default();

	let mut by_relative: HashMap<String, FileInfo> = old
		.into_iter()
		.filter_map(|child| {
			let relative = path::strip_ancestor(&child.path, old_root)?.to_string();
			Some((relative, child))
		})
		.collect();

	let mut unpaired_new = Vec::new();
	for child in new {
		let paired = path::strip_ancestor(&child.path, new_root)
			.filter(|relative| {
				by_relative
					.get(*relative)
					.is_some_and(|old| old.is_directory == child.is_directory)
			})
			.and_then(|relative| by_relative.remove(relative));

		match paired {
			Some(old) => {
				if !child.is_directory && old.content_signature != child.content_signature {
					pairing.changed.push(child.clone());
				}
				pairing.moved.push(MovedChild {
					old_path: old.path,
					new_path: child.path.clone(),
				});
			}
			None => unpaired_new.push(child.clone()),
		}
	}

	let mut leftovers = by_relative.into_values().collect::<Vec<_>>();
	leftovers.sort_by(|a, b| a.path.cmp(&b.path));

	let mut by_signature: HashMap<ContentSignature, VecDeque<FileInfo>> = HashMap::new();
	for old in leftovers {
		if old.is_directory {
			pairing.old_dirs.push(old);
			continue;
		}
		match old.content_signature.clone() {
			Some(signature) => by_signature.entry(signature).or_default().push_back(old),
			None => pairing.old_files.push(old),
		}
	}

	unpaired_new.sort_by(|a, b| a.path.cmp(&b.path));
	for child in unpaired_new {
		if child.is_directory {
			pairing.new_dirs.push(child);
			continue;
		}

		let renamed = child
			.content_signature
			.as_ref()
			.and_then(|signature| by_signature.get_mut(signature))
			.and_then(VecDeque::pop_front);

		match renamed {
			Some(old) => pairing.moved.push(MovedChild {
				old_path: old.path,
				new_path: child.path,
			}),
			None => pairing.new_files.push(child),
		}
	}

	pairing.old_files.extend(by_signature.into_values().flatten());

	pairing.moved.sort_by(|a, b| a.new_path.cmp(&b.new_path));
	pairing.old_files.sort_by(|a, b| a.path.cmp(&b.path));
	pairing.old_dirs.sort_by(|a, b| a.path.cmp(&b.path));
	pairing
}
