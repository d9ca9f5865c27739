//! Move correlation through the public tracker API

use pretty_assertions::assert_eq;
use sd_storage_sync::domain::{ContentSignature, FileEvent, FileEventKind, FileInfo};
use sd_storage_sync::service::{RootTracker, TrackerConfig};
use std::time::Duration;
use tokio::time::Instant;

const ROOT: &str = "movies";

fn tracker(move_window: Duration, batch_size: usize) -> RootTracker {
	RootTracker::new(
		ROOT,
		TrackerConfig {
			move_window,
			batch_size,
			directory_match_ratio: 0.8,
		},
	)
}

fn local_tracker() -> RootTracker {
	tracker(Duration::from_secs(2), 1000)
}

fn file(path: &str, content: &[u8]) -> FileInfo {
	FileInfo::file(path, content.len() as u64, None)
		.with_signature(ContentSignature::from_content(content))
}

/// A directory event with its descendants folded in, signed the way change
/// sources sign directories
fn directory(kind: FileEventKind, dir: &str, files: &[(&str, &[u8])]) -> FileEvent {
	let children: Vec<FileInfo> = files
		.iter()
		.map(|(name, content)| file(&format!("{dir}/{name}"), content))
		.collect();

	let pairs: Vec<(String, ContentSignature)> = files
		.iter()
		.map(|(name, content)| (name.to_string(), ContentSignature::from_content(content)))
		.collect();
	let signature = ContentSignature::for_directory(pairs.iter().map(|(n, s)| (n.as_str(), s)));

	let info = FileInfo::directory(dir, None).with_signature(signature);
	let event = match kind {
		FileEventKind::Deleted => FileEvent::deleted(ROOT, info),
		_ => FileEvent::created(ROOT, info),
	};
	event.with_children(children)
}

fn summary(events: &[FileEvent]) -> Vec<(FileEventKind, &str, Option<&str>)> {
	events
		.iter()
		.map(|e| (e.kind, e.path.as_str(), e.old_path.as_deref()))
		.collect()
}

#[test]
fn test_rename_within_window_is_one_move() {
	let t0 = Instant::now();
	let tracker = local_tracker();

	let out = tracker.process_batch(
		vec![FileEvent::deleted(ROOT, file("/a/movie.mp4", b"H1"))],
		t0,
	);
	assert!(out.is_empty());

	let out = tracker.process_batch(
		vec![FileEvent::created(ROOT, file("/a/renamed.mp4", b"H1"))],
		t0 + Duration::from_secs(1),
	);
	assert_eq!(
		summary(&out),
		vec![(FileEventKind::Moved, "/a/renamed.mp4", Some("/a/movie.mp4"))]
	);

	// Consumed: nothing left to expire
	assert_eq!(tracker.pending_len(), 0);
	assert!(tracker.cleanup(t0 + Duration::from_secs(10)).is_empty());
	assert_eq!(tracker.stats().moves_detected, 1);
}

#[test]
fn test_create_at_window_edge_still_matches() {
	let t0 = Instant::now();
	let tracker = local_tracker();

	tracker.process_batch(vec![FileEvent::deleted(ROOT, file("/a", b"x"))], t0);
	let out = tracker.process_batch(
		vec![FileEvent::created(ROOT, file("/b", b"x"))],
		t0 + Duration::from_secs(2),
	);
	assert_eq!(summary(&out), vec![(FileEventKind::Moved, "/b", Some("/a"))]);
}

#[test]
fn test_late_create_is_independent() {
	let t0 = Instant::now();
	let tracker = local_tracker();

	tracker.process_batch(
		vec![FileEvent::deleted(ROOT, file("/a/movie.mp4", b"H1"))],
		t0,
	);
	let out = tracker.process_batch(
		vec![FileEvent::created(ROOT, file("/a/renamed.mp4", b"H1"))],
		t0 + Duration::from_secs(3),
	);

	assert_eq!(
		summary(&out),
		vec![
			(FileEventKind::Deleted, "/a/movie.mp4", None),
			(FileEventKind::Created, "/a/renamed.mp4", None),
		]
	);
	assert_eq!(tracker.stats().expirations, 1);
}

#[test]
fn test_cleanup_flushes_expired_deletes() {
	let t0 = Instant::now();
	let tracker = local_tracker();

	tracker.process_batch(vec![FileEvent::deleted(ROOT, file("/gone", b"g"))], t0);
	assert!(tracker.cleanup(t0 + Duration::from_secs(1)).is_empty());

	let out = tracker.cleanup(t0 + Duration::from_secs(3));
	assert_eq!(summary(&out), vec![(FileEventKind::Deleted, "/gone", None)]);
	assert_eq!(tracker.pending_len(), 0);
}

#[test]
fn test_directory_move_is_one_bulk_event() {
	let t0 = Instant::now();
	let tracker = local_tracker();

	let files: &[(&str, &[u8])] = &[("f1", b"H1"), ("f2", b"H2")];
	tracker.process_batch(vec![directory(FileEventKind::Deleted, "/a/dir", files)], t0);

	let out = tracker.process_batch(
		vec![directory(FileEventKind::Created, "/b/dir", files)],
		t0 + Duration::from_secs(1),
	);

	assert_eq!(
		summary(&out),
		vec![(FileEventKind::Moved, "/b/dir", Some("/a/dir"))]
	);
	let children: Vec<(&str, &str)> = out[0]
		.moved_children
		.iter()
		.map(|c| (c.old_path.as_str(), c.new_path.as_str()))
		.collect();
	assert_eq!(
		children,
		vec![("/a/dir/f1", "/b/dir/f1"), ("/a/dir/f2", "/b/dir/f2")]
	);

	let stats = tracker.stats();
	assert_eq!(stats.directory_moves_detected, 1);
	assert_eq!(stats.pending_directories, 0);
}

#[test]
fn test_partial_directory_match_above_threshold() {
	let t0 = Instant::now();
	let tracker = local_tracker();

	let old: &[(&str, &[u8])] = &[
		("1", b"one"),
		("2", b"two"),
		("3", b"three"),
		("4", b"four"),
		("5", b"five"),
	];
	let new: &[(&str, &[u8])] = &[
		("1", b"one"),
		("2", b"two"),
		("3", b"three"),
		("4", b"four"),
		("6", b"six"),
	];

	tracker.process_batch(vec![directory(FileEventKind::Deleted, "/old", old)], t0);
	let out = tracker.process_batch(
		vec![directory(FileEventKind::Created, "/new", new)],
		t0 + Duration::from_secs(1),
	);

	assert_eq!(
		summary(&out),
		vec![
			(FileEventKind::Moved, "/new", Some("/old")),
			(FileEventKind::Created, "/new/6", None),
		]
	);
	assert_eq!(out[0].moved_children.len(), 4);

	// The file that did not come along waits out the directory's window
	assert_eq!(tracker.stats().pending_files, 1);
	let out = tracker.cleanup(t0 + Duration::from_secs(3));
	assert_eq!(summary(&out), vec![(FileEventKind::Deleted, "/old/5", None)]);
}

#[test]
fn test_directory_below_threshold_is_independent() {
	let t0 = Instant::now();
	let tracker = local_tracker();

	let old: &[(&str, &[u8])] = &[("1", b"one"), ("2", b"two"), ("3", b"three")];
	let new: &[(&str, &[u8])] = &[("1", b"one"), ("9", b"nine"), ("8", b"eight")];

	tracker.process_batch(vec![directory(FileEventKind::Deleted, "/old", old)], t0);
	let out = tracker.process_batch(
		vec![directory(FileEventKind::Created, "/new", new)],
		t0 + Duration::from_secs(1),
	);

	assert_eq!(
		summary(&out),
		vec![
			(FileEventKind::Created, "/new", None),
			(FileEventKind::Created, "/new/1", None),
			(FileEventKind::Created, "/new/8", None),
			(FileEventKind::Created, "/new/9", None),
		]
	);

	let out = tracker.cleanup(t0 + Duration::from_secs(5));
	assert_eq!(
		summary(&out),
		vec![
			(FileEventKind::Deleted, "/old", None),
			(FileEventKind::Deleted, "/old/1", None),
			(FileEventKind::Deleted, "/old/2", None),
			(FileEventKind::Deleted, "/old/3", None),
		]
	);
}

#[test]
fn test_duplicate_content_matches_oldest_delete() {
	let t0 = Instant::now();
	let tracker = local_tracker();

	tracker.process_batch(vec![FileEvent::deleted(ROOT, file("/first", b"dup"))], t0);
	tracker.process_batch(
		vec![FileEvent::deleted(ROOT, file("/second", b"dup"))],
		t0 + Duration::from_millis(500),
	);

	let out = tracker.process_batch(
		vec![FileEvent::created(ROOT, file("/copy", b"dup"))],
		t0 + Duration::from_secs(1),
	);
	assert_eq!(
		summary(&out),
		vec![(FileEventKind::Moved, "/copy", Some("/first"))]
	);
	assert_eq!(tracker.stats().ambiguous_matches, 1);
	assert_eq!(tracker.pending_len(), 1);

	// The other one still expires on its own schedule
	assert!(tracker.cleanup(t0 + Duration::from_secs(2)).is_empty());
	let out = tracker.cleanup(t0 + Duration::from_millis(2600));
	assert_eq!(summary(&out), vec![(FileEventKind::Deleted, "/second", None)]);
}

#[test]
fn test_pending_table_admits_at_most_batch_size_per_cycle() {
	let t0 = Instant::now();
	let batch_size = 10;
	let tracker = tracker(Duration::from_secs(30), batch_size);

	let deletes: Vec<FileEvent> = (0..25)
		.map(|i| FileEvent::deleted(ROOT, file(&format!("/bulk/{i:02}"), format!("c{i}").as_bytes())))
		.collect();

	tracker.process_batch(deletes, t0);
	assert_eq!(tracker.pending_len(), batch_size);
	assert_eq!(tracker.deferred_len(), 15);

	let mut cycles = 1;
	while tracker.deferred_len() > 0 {
		assert!(tracker.cleanup(t0 + Duration::from_secs(cycles)).is_empty());
		cycles += 1;
		assert!(tracker.pending_len() <= batch_size * cycles as usize);
	}
	assert_eq!(tracker.pending_len(), 25);
	assert_eq!(cycles, 3);

	// Nothing was dropped on the way
	let out = tracker.cleanup(t0 + Duration::from_secs(60));
	assert_eq!(out.len(), 25);
	assert!(out.iter().all(|e| e.kind == FileEventKind::Deleted));
}

#[test]
fn test_deferred_deletes_still_match() {
	let t0 = Instant::now();
	let tracker = tracker(Duration::from_secs(10), 1);

	tracker.process_batch(
		vec![
			FileEvent::deleted(ROOT, file("/a", b"a")),
			FileEvent::deleted(ROOT, file("/b", b"b")),
		],
		t0,
	);
	assert_eq!(tracker.deferred_len(), 1);

	let out = tracker.process_batch(vec![FileEvent::created(ROOT, file("/c", b"b"))], t0);
	assert_eq!(summary(&out), vec![(FileEventKind::Moved, "/c", Some("/b"))]);
	assert_eq!(tracker.deferred_len(), 0);
}

#[test]
fn test_modified_and_moved_pass_through() {
	let tracker = local_tracker();
	let events = vec![
		FileEvent::modified(ROOT, file("/m", b"m")),
		FileEvent::moved(ROOT, "/from", file("/to", b"t")),
	];

	let out = tracker.process_batch(events.clone(), Instant::now());
	assert_eq!(out, events);
}

#[test]
fn test_flush_all_releases_everything() {
	let t0 = Instant::now();
	let tracker = local_tracker();

	let files: &[(&str, &[u8])] = &[("x", b"x")];
	tracker.process_batch(
		vec![
			FileEvent::deleted(ROOT, file("/f", b"f")),
			directory(FileEventKind::Deleted, "/d", files),
		],
		t0,
	);

	let out = tracker.flush_all();
	assert_eq!(
		summary(&out),
		vec![
			(FileEventKind::Deleted, "/f", None),
			(FileEventKind::Deleted, "/d", None),
			(FileEventKind::Deleted, "/d/x", None),
		]
	);
	assert_eq!(tracker.pending_len(), 0);
}

#[test]
fn test_file_moved_out_before_parent_deleted() {
	let t0 = Instant::now();
	let tracker = tracker(Duration::from_secs(10), 500);

	let files: &[(&str, &[u8])] = &[("extra.nfo", b"nfo"), ("movie.mp4", b"H1")];
	let out = tracker.process_batch(
		vec![
			directory(FileEventKind::Deleted, "/a/dir", files),
			FileEvent::created(ROOT, file("/c/movie.mp4", b"H1")),
		],
		t0,
	);
	assert_eq!(
		summary(&out),
		vec![(FileEventKind::Moved, "/c/movie.mp4", Some("/a/dir/movie.mp4"))]
	);

	// The moved file is not reported again when the directory expires
	let out = tracker.cleanup(t0 + Duration::from_secs(20));
	assert_eq!(
		summary(&out),
		vec![
			(FileEventKind::Deleted, "/a/dir", None),
			(FileEventKind::Deleted, "/a/dir/extra.nfo", None),
		]
	);
	assert_eq!(tracker.stats().moves_detected, 1);
}
