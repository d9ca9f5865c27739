//! Orchestrator behaviour with in-memory remote roots

use futures::StreamExt;
use pretty_assertions::assert_eq;
use sd_storage_sync::config::{Protocol, RetryConfig, StorageRoot, SyncConfig, SyncSettings};
use sd_storage_sync::domain::{FileEvent, FileEventKind};
use sd_storage_sync::service::{
	BackendFactory, BreakerState, OrchestratorError, RootHealth, ScanOrchestrator,
};
use sd_storage_sync::testing::MemoryBackend;
use sd_storage_sync::volume::{StorageBackend, StorageError};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;

fn remote_root(id: &str, protocol: Protocol) -> StorageRoot {
	let mut root = StorageRoot::new(id, protocol);
	root.connection.host = Some("server.local".into());
	root.connection.share = Some("media".into());
	root.poll_interval = Some(Duration::from_secs(1));
	root
}

fn settings() -> SyncSettings {
	SyncSettings {
		retry: RetryConfig {
			max_retries: 0,
			..RetryConfig::default()
		},
		..SyncSettings::default()
	}
}

fn config(roots: Vec<StorageRoot>) -> SyncConfig {
	SyncConfig {
		sync: settings(),
		roots,
		..SyncConfig::default()
	}
}

/// Serve each root from its own in-memory backend
fn factory(backends: &HashMap<String, Arc<MemoryBackend>>) -> BackendFactory {
	let backends = backends.clone();
	Arc::new(move |root: &StorageRoot| {
		backends
			.get(&root.id)
			.map(|backend| backend.clone() as Arc<dyn StorageBackend>)
			.ok_or_else(|| StorageError::NotFound(root.id.clone()))
	})
}

async fn next_event(events: &mut ReceiverStream<FileEvent>) -> FileEvent {
	tokio::time::timeout(Duration::from_secs(300), events.next())
		.await
		.expect("timed out waiting for an event")
		.expect("event stream ended")
}

async fn wait_until<F, Fut>(mut condition: F)
where
	F: FnMut() -> Fut,
	Fut: Future<Output = bool>,
{
	for _ in 0..2000 {
		if condition().await {
			return;
		}
		tokio::time::sleep(Duration::from_millis(50)).await;
	}
	panic!("condition never became true");
}

#[tokio::test(start_paused = true)]
async fn test_remote_root_reports_baseline_then_moves() {
	let nas = Arc::new(MemoryBackend::new(Protocol::Smb));
	nas.add_file("/a/movie.mp4", b"H1");
	let backends = HashMap::from([("nas".to_string(), nas.clone())]);

	let orchestrator = ScanOrchestrator::start_with_factory(
		config(vec![remote_root("nas", Protocol::Smb)]),
		factory(&backends),
	)
	.await
	.unwrap();
	let mut events = orchestrator.take_event_stream().unwrap();
	assert!(orchestrator.take_event_stream().is_none());

	let first = next_event(&mut events).await;
	let second = next_event(&mut events).await;
	assert_eq!(
		(first.kind, first.path.as_str()),
		(FileEventKind::Created, "/a")
	);
	assert_eq!(
		(second.kind, second.path.as_str()),
		(FileEventKind::Created, "/a/movie.mp4")
	);

	nas.rename("/a/movie.mp4", "/a/renamed.mp4");
	wait_until(|| async { orchestrator.trigger_scan("nas").await.unwrap() }).await;

	let moved = next_event(&mut events).await;
	assert_eq!(moved.kind, FileEventKind::Moved);
	assert_eq!(moved.path, "/a/renamed.mp4");
	assert_eq!(moved.old_path.as_deref(), Some("/a/movie.mp4"));

	let status = orchestrator.root_status("nas").await.unwrap();
	assert_eq!(status.health, RootHealth::Connected);
	assert!(status.last_scan_at.is_some());
	assert_eq!(
		orchestrator.tracker_stats("nas").await.unwrap().moves_detected,
		1
	);

	orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failing_root_degrades_alone() {
	let down = Arc::new(MemoryBackend::new(Protocol::Smb));
	let up = Arc::new(MemoryBackend::new(Protocol::Ftp));
	down.add_file("/x", b"x");
	up.add_file("/y", b"y");
	let backends = HashMap::from([
		("down".to_string(), down.clone()),
		("up".to_string(), up.clone()),
	]);

	let mut cfg = config(vec![
		remote_root("down", Protocol::Smb),
		remote_root("up", Protocol::Ftp),
	]);
	cfg.sync.breaker.failure_threshold = 2;

	let orchestrator = ScanOrchestrator::start_with_factory(cfg, factory(&backends))
		.await
		.unwrap();
	let mut events = orchestrator.take_event_stream().unwrap();

	// Both baselines arrive
	let mut seen = vec![next_event(&mut events).await, next_event(&mut events).await];
	seen.sort_by(|a, b| a.root_id.cmp(&b.root_id));
	assert_eq!(seen[0].root_id, "down");
	assert_eq!(seen[1].root_id, "up");

	down.set_failure(Some(StorageError::Connection("host unreachable".into())));
	wait_until(|| async {
		orchestrator.root_status("down").await.unwrap().health == RootHealth::Degraded
	})
	.await;

	let status = orchestrator.root_status("down").await.unwrap();
	assert_eq!(status.breaker.unwrap().state, BreakerState::Open);
	assert!(status.last_error.is_some());

	// The healthy root keeps producing
	up.add_file("/z", b"z");
	let event = next_event(&mut events).await;
	assert_eq!((event.root_id.as_str(), event.path.as_str()), ("up", "/z"));
	assert_eq!(
		orchestrator.root_status("up").await.unwrap().health,
		RootHealth::Connected
	);

	orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_auth_failure_suspends_until_reload() {
	let nas = Arc::new(MemoryBackend::new(Protocol::Smb));
	nas.set_failure(Some(StorageError::Auth("bad password".into())));
	let backends = HashMap::from([("nas".to_string(), nas.clone())]);
	let cfg = config(vec![remote_root("nas", Protocol::Smb)]);

	let orchestrator = ScanOrchestrator::start_with_factory(cfg.clone(), factory(&backends))
		.await
		.unwrap();

	wait_until(|| async { orchestrator.root_status("nas").await.unwrap().suspended }).await;
	let status = orchestrator.root_status("nas").await.unwrap();
	assert_eq!(status.health, RootHealth::Disconnected);
	assert!(status.last_error.unwrap().contains("bad password"));

	// Credentials fixed; reloading restarts the suspended root
	nas.set_failure(None);
	orchestrator.apply_config(cfg).await.unwrap();
	wait_until(|| async {
		orchestrator.root_status("nas").await.unwrap().health == RootHealth::Connected
	})
	.await;
	assert!(!orchestrator.root_status("nas").await.unwrap().suspended);

	orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_removing_root_flushes_pending_deletes() {
	let nas = Arc::new(MemoryBackend::new(Protocol::Smb));
	nas.add_file("/old.mkv", b"bytes");
	let backends = HashMap::from([("nas".to_string(), nas.clone())]);

	let mut root = remote_root("nas", Protocol::Smb);
	root.move_window = Some(Duration::from_secs(3600));
	let mut cfg = config(vec![root]);
	cfg.sync.initial_scan = false;

	let orchestrator = ScanOrchestrator::start_with_factory(cfg, factory(&backends))
		.await
		.unwrap();
	let mut events = orchestrator.take_event_stream().unwrap();

	wait_until(|| async {
		orchestrator
			.root_status("nas")
			.await
			.unwrap()
			.last_scan_at
			.is_some()
	})
	.await;

	nas.remove("/old.mkv");
	wait_until(|| async {
		orchestrator.tracker_stats("nas").await.unwrap().pending_files == 1
	})
	.await;

	orchestrator.remove_root("nas").await.unwrap();
	let event = next_event(&mut events).await;
	assert_eq!(
		(event.kind, event.path.as_str()),
		(FileEventKind::Deleted, "/old.mkv")
	);

	assert!(orchestrator.status().await.is_empty());
	assert!(matches!(
		orchestrator.trigger_scan("nas").await,
		Err(OrchestratorError::UnknownRoot(_))
	));

	orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_apply_config_adds_and_removes_roots() {
	let first = Arc::new(MemoryBackend::new(Protocol::Smb));
	let second = Arc::new(MemoryBackend::new(Protocol::Ftp));
	let backends = HashMap::from([
		("first".to_string(), first),
		("second".to_string(), second),
	]);

	let orchestrator = ScanOrchestrator::start_with_factory(
		config(vec![remote_root("first", Protocol::Smb)]),
		factory(&backends),
	)
	.await
	.unwrap();

	orchestrator
		.apply_config(config(vec![remote_root("second", Protocol::Ftp)]))
		.await
		.unwrap();

	let ids: Vec<String> = orchestrator
		.status()
		.await
		.into_iter()
		.map(|s| s.root_id)
		.collect();
	assert_eq!(ids, vec!["second".to_string()]);

	assert!(matches!(
		orchestrator.add_root(remote_root("second", Protocol::Ftp)).await,
		Err(OrchestratorError::DuplicateRoot(_))
	));

	orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stream_ends_after_shutdown() {
	let nas = Arc::new(MemoryBackend::new(Protocol::Smb));
	let backends = HashMap::from([("nas".to_string(), nas)]);

	let orchestrator = ScanOrchestrator::start_with_factory(
		config(vec![remote_root("nas", Protocol::Smb)]),
		factory(&backends),
	)
	.await
	.unwrap();
	let mut events = orchestrator.take_event_stream().unwrap();

	orchestrator.shutdown().await;
	drop(orchestrator);

	let rest = tokio::time::timeout(Duration::from_secs(30), async {
		let mut count = 0;
		while events.next().await.is_some() {
			count += 1;
		}
		count
	})
	.await
	.expect("stream should close");
	assert_eq!(rest, 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_poll_waits_a_full_interval() {
	let nas = Arc::new(MemoryBackend::new(Protocol::Smb));
	nas.set_delay(Some(Duration::from_secs(15)));
	let backends = HashMap::from([("nas".to_string(), nas.clone())]);

	let mut root = remote_root("nas", Protocol::Smb);
	root.poll_interval = Some(Duration::from_secs(10));

	let orchestrator = ScanOrchestrator::start_with_factory(config(vec![root]), factory(&backends))
		.await
		.unwrap();

	// Connect takes 0s to 15s, the first poll 15s to 30s
	tokio::time::sleep(Duration::from_secs(31)).await;
	assert_eq!(nas.calls(), 2);

	// The tick due at 25s is not run the moment that poll ends
	tokio::time::sleep(Duration::from_secs(8)).await;
	assert_eq!(nas.calls(), 2);

	tokio::time::sleep(Duration::from_secs(2)).await;
	assert_eq!(nas.calls(), 3);

	orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_missing_root_directory_reports_disconnected() {
	let nas = Arc::new(MemoryBackend::new(Protocol::Smb));
	nas.add_file("/show.mkv", b"bytes");
	let backends = HashMap::from([("nas".to_string(), nas.clone())]);

	let orchestrator = ScanOrchestrator::start_with_factory(
		config(vec![remote_root("nas", Protocol::Smb)]),
		factory(&backends),
	)
	.await
	.unwrap();
	let mut events = orchestrator.take_event_stream().unwrap();
	assert_eq!(next_event(&mut events).await.path, "/show.mkv");

	nas.fail_path("/", StorageError::NotFound("/".into()));
	wait_until(|| async {
		orchestrator.root_status("nas").await.unwrap().health == RootHealth::Disconnected
	})
	.await;

	// Still reported after several more failed polls
	tokio::time::sleep(Duration::from_secs(5)).await;
	let status = orchestrator.root_status("nas").await.unwrap();
	assert_eq!(status.health, RootHealth::Disconnected);
	assert!(status.last_error.is_some());

	nas.clear_path_failure("/");
	wait_until(|| async {
		orchestrator.root_status("nas").await.unwrap().health == RootHealth::Connected
	})
	.await;
	assert!(orchestrator.root_status("nas").await.unwrap().last_error.is_none());

	orchestrator.shutdown().await;
}
