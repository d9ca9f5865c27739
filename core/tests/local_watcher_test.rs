//! A local root end to end: real filesystem, real watcher

use futures::StreamExt;
use sd_storage_sync::config::{Protocol, StorageRoot, SyncConfig, SyncSettings};
use sd_storage_sync::domain::{FileEvent, FileEventKind};
use sd_storage_sync::service::{RootHealth, ScanOrchestrator};
use std::collections::HashSet;
use std::time::Duration;
use tempfile::TempDir;
use tokio_stream::wrappers::ReceiverStream;

const EVENT_TIMEOUT: Duration = Duration::from_secs(20);

async fn start(dir: &TempDir) -> (ScanOrchestrator, ReceiverStream<FileEvent>) {
	let mut root = StorageRoot::new("local", Protocol::Local);
	root.connection.path = Some(dir.path().to_string_lossy().into_owned());
	root.move_window = Some(Duration::from_secs(1));

	let config = SyncConfig {
		sync: SyncSettings {
			cleanup_interval: Duration::from_millis(200),
			debounce: Duration::from_millis(100),
			..SyncSettings::default()
		},
		roots: vec![root],
		..SyncConfig::default()
	};

	let orchestrator = ScanOrchestrator::start(config).await.unwrap();
	let events = orchestrator.take_event_stream().unwrap();

	// Wait for the watch to be in place before touching the tree
	for _ in 0..100 {
		let status = orchestrator.root_status("local").await.unwrap();
		if status.health == RootHealth::Connected && status.last_scan_at.is_some() {
			break;
		}
		tokio::time::sleep(Duration::from_millis(50)).await;
	}

	(orchestrator, events)
}

/// Read events until one matches, failing after a while
async fn expect_event(
	events: &mut ReceiverStream<FileEvent>,
	matches: impl Fn(&FileEvent) -> bool,
) -> FileEvent {
	tokio::time::timeout(EVENT_TIMEOUT, async {
		while let Some(event) = events.next().await {
			if matches(&event) {
				return event;
			}
		}
		panic!("event stream ended");
	})
	.await
	.expect("timed out waiting for event")
}

#[tokio::test(flavor = "multi_thread")]
async fn test_local_create_rename_delete() {
	let dir = TempDir::new().unwrap();
	let (orchestrator, mut events) = start(&dir).await;

	tokio::fs::write(dir.path().join("a.txt"), b"hello").await.unwrap();
	let created = expect_event(&mut events, |e| e.path == "/a.txt").await;
	assert_eq!(created.kind, FileEventKind::Created);
	assert_eq!(created.root_id, "local");

	// Let trailing modify notifications for the write settle
	tokio::time::sleep(Duration::from_millis(500)).await;

	tokio::fs::rename(dir.path().join("a.txt"), dir.path().join("b.txt"))
		.await
		.unwrap();
	let moved = expect_event(&mut events, |e| e.path == "/b.txt").await;
	assert_eq!(moved.kind, FileEventKind::Moved);
	assert_eq!(moved.old_path.as_deref(), Some("/a.txt"));

	tokio::fs::remove_file(dir.path().join("b.txt")).await.unwrap();
	// Held back for the move window, then released by cleanup
	expect_event(&mut events, |e| {
		e.path == "/b.txt" && e.kind == FileEventKind::Deleted
	})
	.await;

	orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_local_directory_moved_in_brings_children() {
	let dir = TempDir::new().unwrap();
	let outside = TempDir::new().unwrap();
	tokio::fs::create_dir(outside.path().join("album")).await.unwrap();
	tokio::fs::write(outside.path().join("album/track1.flac"), b"one")
		.await
		.unwrap();
	tokio::fs::write(outside.path().join("album/track2.flac"), b"two")
		.await
		.unwrap();

	let (orchestrator, mut events) = start(&dir).await;

	// Cross-device renames are not possible, so copy instead when needed
	if tokio::fs::rename(outside.path().join("album"), dir.path().join("album"))
		.await
		.is_err()
	{
		tokio::fs::create_dir(dir.path().join("album")).await.unwrap();
		tokio::fs::write(dir.path().join("album/track1.flac"), b"one")
			.await
			.unwrap();
		tokio::fs::write(dir.path().join("album/track2.flac"), b"two")
			.await
			.unwrap();
	}

	let album = expect_event(&mut events, |e| e.path == "/album").await;
	assert_eq!(album.kind, FileEventKind::Created);

	let mut tracks = HashSet::new();
	while tracks.len() < 2 {
		let event = expect_event(&mut events, |e| {
			e.path.starts_with("/album/") && e.kind == FileEventKind::Created
		})
		.await;
		tracks.insert(event.path);
	}
	assert!(tracks.contains("/album/track1.flac"));
	assert!(tracks.contains("/album/track2.flac"));

	orchestrator.shutdown().await;
}
