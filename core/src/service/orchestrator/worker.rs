//! Per-root workers
//!
//! Remote roots run a poll loop; local roots run a watcher loop. Both feed
//! the root's tracker and push the result into the root's bounded queue, so
//! a slow consumer stalls only that root's worker.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sd_fs_watcher::WatcherConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::metrics::RootWorkerMetrics;
use super::FLUSH_TIMEOUT;
use super::status::{RootHealth, RootStatus};
use crate::config::StorageRoot;
use crate::domain::FileEvent;
use crate::service::breaker::{BreakerState, CircuitBreaker};
use crate::service::source::{LocalChangeSource, SnapshotPoller};
use crate::service::tracker::RootTracker;
use crate::volume::{StorageBackend, StorageError, StorageResult};

/// Wait before re-establishing a lost local watch
const LOCAL_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Everything the orchestrator and a root's worker share
#[derive(Debug)]
pub(crate) struct RootContext {
	pub root: StorageRoot,
	pub backend: Arc<dyn StorageBackend>,
	pub breaker: Option<Arc<CircuitBreaker>>,
	pub tracker: Arc<RootTracker>,
	pub metrics: RootWorkerMetrics,
	pub cancel: CancellationToken,
	queue: mpsc::Sender<FileEvent>,
	scan_requests: mpsc::Sender<()>,
	/// Keeps tracker output and queue order in step between the worker and
	/// the cleanup task
	emit_lock: AsyncMutex<()>,
	suspended: AtomicBool,
	/// The last cycle failed; cleared by the next one that succeeds
	unreachable: AtomicBool,
	cycle_running: AtomicBool,
	last_scan_at: Mutex<Option<DateTime<Utc>>>,
	last_error: Mutex<Option<String>>,
}

impl RootContext {
	pub fn new(
		root: StorageRoot,
		backend: Arc<dyn StorageBackend>,
		breaker: Option<Arc<CircuitBreaker>>,
		tracker: Arc<RootTracker>,
		queue: mpsc::Sender<FileEvent>,
		scan_requests: mpsc::Sender<()>,
		cancel: CancellationToken,
	) -> Self {
		Self {
			root,
			backend,
			breaker,
			tracker,
			metrics: RootWorkerMetrics::new(),
			cancel,
			queue,
			scan_requests,
			emit_lock: AsyncMutex::new(()),
			suspended: AtomicBool::new(false),
			unreachable: AtomicBool::new(false),
			cycle_running: AtomicBool::new(false),
			last_scan_at: Mutex::new(None),
			last_error: Mutex::new(None),
		}
	}

	pub fn root_id(&self) -> &str {
		&self.root.id
	}

	pub fn is_suspended(&self) -> bool {
		self.suspended.load(Ordering::Acquire)
	}

	/// Ask for an immediate cycle. Dropped while one is running or queued.
	pub fn request_scan(&self) -> bool {
		if self.cycle_running.load(Ordering::Acquire) {
			return false;
		}
		self.scan_requests.try_send(()).is_ok()
	}

	/// Correlate a batch and queue the result
	pub async fn emit(&self, events: Vec<FileEvent>) -> bool {
		let _order = self.emit_lock.lock().await;
		let out = self.tracker.process_batch(events, Instant::now());
		self.send_all(out).await
	}

	/// Flush expired pending deletes
	pub async fn expire(&self, now: Instant) {
		let _order = self.emit_lock.lock().await;
		let out = self.tracker.cleanup(now);
		self.send_all(out).await;
	}

	/// Queue everything still pending once the worker is gone
	pub async fn drain(&self) {
		let _order = self.emit_lock.lock().await;
		let out = self.tracker.flush_all();
		if !out.is_empty() {
			debug!(root_id = %self.root.id, "Flushing {} pending deletes", out.len());
		}
		self.flush(out).await;
	}

	/// Queue a batch in order. Returns false once the worker should stop.
	///
	/// The tracker has already moved past these events, so a batch cut short
	/// by cancellation is still flushed rather than lost.
	async fn send_all(&self, events: Vec<FileEvent>) -> bool {
		let mut events = events.into_iter();
		while let Some(event) = events.next() {
			self.metrics.update_queue_depth(self.queue_depth());
			let permit = tokio::select! {
				biased;
				permit = self.queue.reserve() => permit,
				_ = self.cancel.cancelled() => {
					self.flush(std::iter::once(event).chain(events).collect()).await;
					return false;
				}
			};
			match permit {
				Ok(permit) => permit.send(event),
				Err(_) => return false,
			}
			self.metrics.record_emitted(1);
		}
		true
	}

	/// Queue events without regard to cancellation, giving up after
	/// `FLUSH_TIMEOUT` if nobody is reading
	async fn flush(&self, events: Vec<FileEvent>) {
		let count = events.len();
		let sent = timeout(FLUSH_TIMEOUT, async {
			for event in events {
				if self.queue.send(event).await.is_err() {
					break;
				}
				self.metrics.record_emitted(1);
			}
		})
		.await;

		if sent.is_err() {
			warn!(
				root_id = %self.root.id,
				"Timed out flushing {} events, dropping the rest",
				count
			);
		}
	}

	pub fn queue_depth(&self) -> usize {
		self.queue.max_capacity() - self.queue.capacity()
	}

	fn suspend(&self, err: &StorageError) {
		self.suspended.store(true, Ordering::Release);
		*self.last_error.lock() = Some(err.to_string());
		error!(
			root_id = %self.root.id,
			"Root suspended until its configuration changes: {}",
			err
		);
	}

	fn record_error(&self, err: &StorageError) {
		*self.last_error.lock() = Some(err.to_string());
	}

	fn record_scan(&self) {
		self.unreachable.store(false, Ordering::Release);
		*self.last_scan_at.lock() = Some(Utc::now());
		*self.last_error.lock() = None;
	}

	pub fn health(&self) -> RootHealth {
		if self.is_suspended() {
			return RootHealth::Disconnected;
		}
		if let Some(breaker) = &self.breaker {
			if breaker.state() != BreakerState::Closed {
				return RootHealth::Degraded;
			}
		}
		if self.unreachable.load(Ordering::Acquire) {
			return RootHealth::Disconnected;
		}
		if self.backend.is_connected() {
			RootHealth::Connected
		} else {
			RootHealth::Disconnected
		}
	}

	pub fn status(&self) -> RootStatus {
		RootStatus {
			root_id: self.root.id.clone(),
			protocol: self.root.protocol,
			health: self.health(),
			suspended: self.is_suspended(),
			breaker: self.breaker.as_ref().map(|b| b.snapshot()),
			pending_moves: self.tracker.pending_len(),
			deferred_deletes: self.tracker.deferred_len(),
			queue_depth: self.queue_depth(),
			cycle_running: self.cycle_running.load(Ordering::Acquire),
			last_scan_at: *self.last_scan_at.lock(),
			last_error: self.last_error.lock().clone(),
			metrics: self.metrics.snapshot(),
		}
	}

	/// Run one unit of change detection and hand its output downstream
	async fn cycle<F>(&self, detect: F) -> CycleOutcome
	where
		F: std::future::Future<Output = StorageResult<Vec<FileEvent>>>,
	{
		self.cycle_running.store(true, Ordering::Release);
		let started = Instant::now();

		let outcome = match detect.await {
			Ok(events) => {
				self.metrics.record_observed(events.len());
				self.record_scan();
				if self.emit(events).await {
					CycleOutcome::Continue
				} else {
					CycleOutcome::Stop
				}
			}
			Err(e) if e.is_fatal() => {
				self.metrics.record_failed_cycle();
				self.suspend(&e);
				CycleOutcome::Stop
			}
			Err(e) => {
				self.metrics.record_failed_cycle();
				self.record_error(&e);
				self.unreachable.store(true, Ordering::Release);
				warn!(root_id = %self.root.id, "Scan cycle failed: {}", e);
				CycleOutcome::Reconnect
			}
		};

		self.metrics.record_cycle(started.elapsed());
		self.cycle_running.store(false, Ordering::Release);
		outcome
	}

	/// Connect, retrying every `retry_every` until it works, the root is
	/// suspended or the worker is cancelled
	async fn connect(&self, retry_every: Duration) -> bool {
		loop {
			let result = tokio::select! {
				_ = self.cancel.cancelled() => return false,
				result = self.backend.connect() => result,
			};

			match result {
				Ok(()) => {
					info!(
						root_id = %self.root.id,
						protocol = %self.root.protocol,
						"Connected"
					);
					*self.last_error.lock() = None;
					return true;
				}
				Err(e) if e.is_fatal() => {
					self.suspend(&e);
					return false;
				}
				Err(e) => {
					self.record_error(&e);
					warn!(
						root_id = %self.root.id,
						"Connect failed, retrying in {:?}: {}",
						retry_every,
						e
					);
				}
			}

			if !self.wait(retry_every).await {
				return false;
			}
		}
	}

	/// Sleep unless cancelled first
	async fn wait(&self, duration: Duration) -> bool {
		tokio::select! {
			_ = self.cancel.cancelled() => false,
			_ = sleep(duration) => true,
		}
	}

	async fn disconnect(&self) {
		if let Err(e) = self.backend.disconnect().await {
			warn!(root_id = %self.root.id, "Disconnect failed: {}", e);
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleOutcome {
	Continue,
	/// The root became unreachable
	Reconnect,
	Stop,
}

/// Poll loop for a remote root
pub(crate) async fn run_remote(
	ctx: Arc<RootContext>,
	mut poller: SnapshotPoller,
	mut scan_requests: mpsc::Receiver<()>,
	poll_interval: Duration,
) {
	info!(
		root_id = %ctx.root_id(),
		protocol = %ctx.root.protocol,
		"Starting poll worker every {:?}",
		poll_interval
	);

	if ctx.connect(poll_interval).await {
		let mut ticker = interval(poll_interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

		loop {
			tokio::select! {
				biased;
				_ = ctx.cancel.cancelled() => break,
				Some(()) = scan_requests.recv() => {
					debug!(root_id = %ctx.root_id(), "Scan requested");
					ticker.reset();
				}
				_ = ticker.tick() => {}
			}

			if !ctx.backend.is_connected() && !ctx.connect(poll_interval).await {
				break;
			}

			if ctx.cycle(poller.poll()).await == CycleOutcome::Stop {
				break;
			}
			// Ticks that came due while polling are skipped, not run back to back
			ticker.reset();
		}
	}

	ctx.disconnect().await;
	ctx.metrics.log_metrics(ctx.root_id());
	info!(root_id = %ctx.root_id(), "Poll worker stopped");
}

/// Tuning for the watcher loop
#[derive(Debug, Clone)]
pub(crate) struct LocalOptions {
	pub watcher: WatcherConfig,
	/// Quiet time collected into one batch
	pub debounce: Duration,
	pub batch_size: usize,
}

/// Watch loop for a local root
pub(crate) async fn run_local(
	ctx: Arc<RootContext>,
	mut source: LocalChangeSource,
	mut scan_requests: mpsc::Receiver<()>,
	options: LocalOptions,
) {
	info!(root_id = %ctx.root_id(), "Starting watch worker");

	'watch: loop {
		if !ctx.connect(LOCAL_RETRY_INTERVAL).await {
			break;
		}

		let watch_cancel = ctx.cancel.child_token();
		let mut stream = match source
			.watch(options.watcher.clone(), watch_cancel.clone())
			.await
		{
			Ok(stream) => stream,
			Err(e) => {
				warn!(root_id = %ctx.root_id(), "Failed to watch root: {}", e);
				*ctx.last_error.lock() = Some(e.to_string());
				ctx.disconnect().await;
				if !ctx.wait(LOCAL_RETRY_INTERVAL).await {
					break;
				}
				continue;
			}
		};

		// Watch first, then walk: changes during the walk show up as events
		match ctx.cycle(source.reconcile()).await {
			CycleOutcome::Continue => {}
			CycleOutcome::Stop => break,
			CycleOutcome::Reconnect => {
				watch_cancel.cancel();
				ctx.disconnect().await;
				if !ctx.wait(LOCAL_RETRY_INTERVAL).await {
					break;
				}
				continue;
			}
		}

		loop {
			let outcome = tokio::select! {
				biased;
				_ = ctx.cancel.cancelled() => break 'watch,
				Some(()) = scan_requests.recv() => {
					debug!(root_id = %ctx.root_id(), "Rescan requested");
					ctx.cycle(source.reconcile()).await
				}
				first = stream.recv() => match first {
					Some(first) => {
						let mut batch = vec![first];
						let deadline = Instant::now() + options.debounce;
						while let Some(event) = stream.try_recv() {
							batch.push(event);
							if Instant::now() >= deadline || batch.len() >= options.batch_size {
								break;
							}
						}

						debug!(root_id = %ctx.root_id(), "Processing batch of {} events", batch.len());
						ctx.cycle(source.apply(batch)).await
					}
					None => {
						warn!(root_id = %ctx.root_id(), "Watch ended unexpectedly");
						CycleOutcome::Reconnect
					}
				}
			};

			match outcome {
				CycleOutcome::Continue => {}
				CycleOutcome::Stop => break 'watch,
				CycleOutcome::Reconnect => break,
			}
		}

		watch_cancel.cancel();
		drop(stream);
		ctx.disconnect().await;
		if !ctx.wait(LOCAL_RETRY_INTERVAL).await {
			break;
		}
	}

	ctx.disconnect().await;
	ctx.metrics.log_metrics(ctx.root_id());
	info!(root_id = %ctx.root_id(), "Watch worker stopped");
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::Protocol;
	use crate::domain::FileInfo;
	use crate::service::tracker::TrackerConfig;
	use crate::testing::MemoryBackend;

	fn context(queue: mpsc::Sender<FileEvent>, cancel: CancellationToken) -> RootContext {
		let tracker = RootTracker::new(
			"nas",
			TrackerConfig {
				move_window: Duration::from_secs(2),
				batch_size: 100,
				directory_match_ratio: 0.8,
			},
		);
		let (scan_requests, _) = mpsc::channel(1);
		RootContext::new(
			StorageRoot::new("nas", Protocol::Smb),
			Arc::new(MemoryBackend::new(Protocol::Smb)),
			None,
			Arc::new(tracker),
			queue,
			scan_requests,
			cancel,
		)
	}

	#[tokio::test]
	async fn test_batch_interrupted_by_shutdown_is_still_queued() {
		let (queue, mut out) = mpsc::channel(1);
		let cancel = CancellationToken::new();
		let ctx = Arc::new(context(queue, cancel.clone()));

		let batch = (0..3)
			.map(|i| FileEvent::created("nas", FileInfo::file(format!("/{i}.mkv"), 1, None)))
			.collect();
		let emitting = tokio::spawn({
			let ctx = ctx.clone();
			async move { ctx.emit(batch).await }
		});

		// Stop while the worker is blocked on a full queue
		while ctx.queue_depth() < 1 {
			tokio::task::yield_now().await;
		}
		cancel.cancel();

		let mut paths = Vec::new();
		for _ in 0..3 {
			paths.push(out.recv().await.unwrap().path);
		}
		assert_eq!(paths, vec!["/0.mkv", "/1.mkv", "/2.mkv"]);
		assert!(!emitting.await.unwrap());
		assert_eq!(ctx.metrics.snapshot().events_emitted, 3);
	}
}
