//! Root-relative path helpers
//!
//! Every backend speaks `/a/b` paths relative to its root and translates
//! them to its native form at the edge.

use super::error::{StorageError, StorageResult};

pub const ROOT: &str = "/";

/// Canonical `/a/b` form. Rejects `..` so nothing escapes the root.
pub fn normalize(path: &str) -> StorageResult<String> {
	let mut segments = Vec::new();

	for segment in path.split(['/', '\\']) {
		match segment {
			"" | "." => continue,
			".." => return Err(StorageError::InvalidPath(path.to_string())),
			s if s.contains('\0') => return Err(StorageError::InvalidPath(path.to_string())),
			s => segments.push(s),
		}
	}

	if segments.is_empty() {
		Ok(ROOT.to_string())
	} else {
		Ok(format!("/{}", segments.join("/")))
	}
}

/// Normalised path without the leading slash; empty for the root
pub fn relative(path: &str) -> StorageResult<String> {
	let normalized = normalize(path)?;
	Ok(normalized.trim_start_matches('/').to_string())
}

pub fn join(parent: &str, name: &str) -> String {
	if parent == ROOT || parent.is_empty() {
		format!("/{name}")
	} else {
		format!("{}/{name}", parent.trim_end_matches('/'))
	}
}

pub fn parent(path: &str) -> Option<&str> {
	if path == ROOT {
		return None;
	}
	match path.rfind('/') {
		Some(0) => Some(ROOT),
		Some(idx) => Some(&path[..idx]),
		None => None,
	}
}

pub fn file_name(path: &str) -> &str {
	path.rsplit('/').next().unwrap_or(path)
}

/// Number of segments below the root
pub fn depth(path: &str) -> usize {
	path.split('/').filter(|s| !s.is_empty()).count()
}

/// Whether `path` lies strictly below `ancestor`
pub fn is_descendant(path: &str, ancestor: &str) -> bool {
	if ancestor == ROOT {
		return path != ROOT;
	}
	path.len() > ancestor.len()
		&& path.starts_with(ancestor)
		&& path.as_bytes()[ancestor.len()] == b'/'
}

/// `path` relative to `ancestor` (no leading slash), if it lies below it
pub fn strip_ancestor<'a>(path: &'a str, ancestor: &str) -> Option<&'a str> {
	if !is_descendant(path, ancestor) {
		return None;
	}
	if ancestor == ROOT {
		Some(&path[1..])
	} else {
		Some(&path[ancestor.len() + 1..])
	}
}

/// Swap the `from` prefix of `path` for `to`
pub fn rebase(path: &str, from: &str, to: &str) -> Option<String> {
	if path == from {
		return Some(to.to_string());
	}
	strip_ancestor(path, from).map(|rest| join(to, rest))
}
