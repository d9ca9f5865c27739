//! Scan orchestration across every configured root
//!
//! One worker per root, isolated from the others: its own adapter wrapped in
//! its own circuit breaker, its own tracker and its own bounded queue. Per
//! root queues are forwarded into a single output channel handed out by
//! [`ScanOrchestrator::take_event_stream`]. A shared task flushes expired
//! pending deletes of every root on `cleanup_interval`.

use futures::future::join_all;
use parking_lot::Mutex;
use sd_fs_watcher::WatcherConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, Protocol, StorageRoot, SyncConfig, SyncSettings};
use crate::domain::FileEvent;
use crate::service::breaker::CircuitBreaker;
use crate::service::source::{LocalChangeSource, SnapshotPoller};
use crate::service::tracker::{RootTracker, TrackerConfig, TrackerStats};
use crate::volume::backend::backend_for_root;
use crate::volume::{GuardedBackend, StorageBackend, StorageError, StorageResult};

mod metrics;
mod status;
mod worker;

pub use metrics::{RootWorkerMetrics, WorkerMetricsSnapshot};
pub use status::{RootHealth, RootStatus};

use worker::{LocalOptions, RootContext};

/// How long shutdown waits for pending deletes to reach the output
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Builds the unguarded adapter for a root
pub type BackendFactory =
	Arc<dyn Fn(&StorageRoot) -> StorageResult<Arc<dyn StorageBackend>> + Send + Sync>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
	#[error(transparent)]
	Config(#[from] ConfigError),

	#[error("root {0} is already running")]
	DuplicateRoot(String),

	#[error("unknown root: {0}")]
	UnknownRoot(String),

	#[error("failed to build backend for root {root_id}: {source}")]
	Backend {
		root_id: String,
		#[source]
		source: StorageError,
	},
}

struct RootHandle {
	ctx: Arc<RootContext>,
	worker: JoinHandle<()>,
	forwarder: JoinHandle<()>,
}

type RootMap = Arc<RwLock<HashMap<String, RootHandle>>>;

pub struct ScanOrchestrator {
	settings: Mutex<SyncSettings>,
	factory: BackendFactory,
	roots: RootMap,
	output_tx: mpsc::Sender<FileEvent>,
	output_rx: Mutex<Option<mpsc::Receiver<FileEvent>>>,
	cancel: CancellationToken,
	cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl ScanOrchestrator {
	/// Start a worker for every enabled root, with the built-in adapters
	pub async fn start(config: SyncConfig) -> Result<Self, OrchestratorError> {
		Self::start_with_factory(config, Arc::new(backend_for_root)).await
	}

	pub async fn start_with_factory(
		config: SyncConfig,
		factory: BackendFactory,
	) -> Result<Self, OrchestratorError> {
		config.validate()?;

		let (output_tx, output_rx) = mpsc::channel(config.sync.queue_size);
		let roots: RootMap = Arc::new(RwLock::new(HashMap::new()));
		let cancel = CancellationToken::new();

		let cleanup = tokio::spawn(run_cleanup(
			roots.clone(),
			config.sync.cleanup_interval,
			cancel.clone(),
		));

		let orchestrator = Self {
			settings: Mutex::new(config.sync.clone()),
			factory,
			roots,
			output_tx,
			output_rx: Mutex::new(Some(output_rx)),
			cancel,
			cleanup: Mutex::new(Some(cleanup)),
		};

		for root in config.enabled_roots() {
			orchestrator.add_root(root.clone()).await?;
		}

		info!(
			"Orchestrator started with {} roots",
			orchestrator.roots.read().await.len()
		);
		Ok(orchestrator)
	}

	/// The merged event stream of every root. Can be taken once.
	pub fn take_event_stream(&self) -> Option<ReceiverStream<FileEvent>> {
		self.output_rx.lock().take().map(ReceiverStream::new)
	}

	pub async fn add_root(&self, root: StorageRoot) -> Result<(), OrchestratorError> {
		root.validate()?;

		let mut roots = self.roots.write().await;
		if roots.contains_key(&root.id) {
			return Err(OrchestratorError::DuplicateRoot(root.id));
		}

		let settings = self.settings.lock().clone();
		let id = root.id.clone();
		let handle = self.spawn_root(root, &settings)?;
		roots.insert(id, handle);
		Ok(())
	}

	/// Stop a root's worker. Its pending deletes are emitted as deletes.
	pub async fn remove_root(&self, root_id: &str) -> Result<(), OrchestratorError> {
		let handle = self
			.roots
			.write()
			.await
			.remove(root_id)
			.ok_or_else(|| OrchestratorError::UnknownRoot(root_id.to_string()))?;

		stop_root(handle).await;
		info!(root_id, "Root removed");
		Ok(())
	}

	/// Reconcile running roots with a new configuration.
	///
	/// Roots whose definition changed, and roots suspended after an auth
	/// failure, are restarted; removed roots are stopped; unchanged roots keep
	/// running. A change to the shared settings restarts every root.
	pub async fn apply_config(&self, config: SyncConfig) -> Result<(), OrchestratorError> {
		config.validate()?;

		let settings_changed = {
			let mut settings = self.settings.lock();
			let changed = *settings != config.sync;
			*settings = config.sync.clone();
			changed
		};

		let desired: HashMap<String, StorageRoot> = config
			.enabled_roots()
			.map(|root| (root.id.clone(), root.clone()))
			.collect();

		let mut roots = self.roots.write().await;

		let stale: Vec<String> = roots
			.iter()
			.filter(|(id, handle)| {
				settings_changed
					|| handle.ctx.is_suspended()
					|| desired.get(*id) != Some(&handle.ctx.root)
			})
			.map(|(id, _)| id.clone())
			.collect();

		let stopping: Vec<RootHandle> = stale.iter().filter_map(|id| roots.remove(id)).collect();
		join_all(stopping.into_iter().map(stop_root)).await;

		let mut result = Ok(());
		for (id, root) in desired {
			if roots.contains_key(&id) {
				continue;
			}
			match self.spawn_root(root, &config.sync) {
				Ok(handle) => {
					roots.insert(id, handle);
				}
				Err(e) => {
					error!(root_id = %id, "Failed to start root: {}", e);
					if result.is_ok() {
						result = Err(e);
					}
				}
			}
		}

		info!(
			restarted_or_removed = stale.len(),
			running = roots.len(),
			"Configuration applied"
		);
		result
	}

	/// Request an immediate scan cycle. Returns `false` when one is already
	/// running or queued.
	pub async fn trigger_scan(&self, root_id: &str) -> Result<bool, OrchestratorError> {
		let roots = self.roots.read().await;
		let handle = roots
			.get(root_id)
			.ok_or_else(|| OrchestratorError::UnknownRoot(root_id.to_string()))?;

		let accepted = handle.ctx.request_scan();
		if !accepted {
			debug!(root_id, "Scan request dropped, a cycle is already running or queued");
		}
		Ok(accepted)
	}

	/// Manually close a root's circuit breaker
	pub async fn reset_breaker(&self, root_id: &str) -> Result<(), OrchestratorError> {
		let roots = self.roots.read().await;
		let handle = roots
			.get(root_id)
			.ok_or_else(|| OrchestratorError::UnknownRoot(root_id.to_string()))?;

		if let Some(breaker) = &handle.ctx.breaker {
			breaker.reset();
		}
		Ok(())
	}

	/// Status of every running root, by id
	pub async fn status(&self) -> Vec<RootStatus> {
		let roots = self.roots.read().await;
		let mut statuses: Vec<RootStatus> = roots.values().map(|h| h.ctx.status()).collect();
		statuses.sort_by(|a, b| a.root_id.cmp(&b.root_id));
		statuses
	}

	pub async fn root_status(&self, root_id: &str) -> Option<RootStatus> {
		self.roots
			.read()
			.await
			.get(root_id)
			.map(|h| h.ctx.status())
	}

	pub async fn tracker_stats(&self, root_id: &str) -> Option<TrackerStats> {
		self.roots
			.read()
			.await
			.get(root_id)
			.map(|h| h.ctx.tracker.stats())
	}

	pub async fn log_metrics(&self) {
		for handle in self.roots.read().await.values() {
			handle.ctx.metrics.log_metrics(handle.ctx.root_id());
		}
	}

	/// Stop every worker, emit what is still pending and disconnect
	pub async fn shutdown(&self) {
		info!("Shutting down orchestrator");
		self.cancel.cancel();

		let cleanup = self.cleanup.lock().take();
		if let Some(cleanup) = cleanup {
			if let Err(e) = cleanup.await {
				warn!("Cleanup task failed: {}", e);
			}
		}

		let handles: Vec<RootHandle> = self
			.roots
			.write()
			.await
			.drain()
			.map(|(_, handle)| handle)
			.collect();
		join_all(handles.into_iter().map(stop_root)).await;

		info!("Orchestrator stopped");
	}

	fn spawn_root(
		&self,
		root: StorageRoot,
		settings: &SyncSettings,
	) -> Result<RootHandle, OrchestratorError> {
		let backend = (self.factory)(&root).map_err(|source| OrchestratorError::Backend {
			root_id: root.id.clone(),
			source,
		})?;

		let (backend, breaker): (Arc<dyn StorageBackend>, _) = if root.protocol.is_remote() {
			let breaker = Arc::new(CircuitBreaker::new(&root.id, settings.breaker.clone()));
			let guarded = GuardedBackend::new(backend, breaker.clone(), settings.retry.clone());
			(Arc::new(guarded), Some(breaker))
		} else {
			(backend, None)
		};

		let tracker = Arc::new(RootTracker::new(
			&root.id,
			TrackerConfig::for_root(&root, settings),
		));

		let (queue_tx, queue_rx) = mpsc::channel(settings.queue_size);
		let (scan_tx, scan_rx) = mpsc::channel(1);
		let cancel = self.cancel.child_token();

		let ctx = Arc::new(RootContext::new(
			root.clone(),
			backend.clone(),
			breaker,
			tracker,
			queue_tx,
			scan_tx,
			cancel,
		));

		let worker = match root.protocol {
			Protocol::Local => {
				let path = root.connection.path.clone().ok_or_else(|| {
					OrchestratorError::Backend {
						root_id: root.id.clone(),
						source: StorageError::InvalidPath("local root has no path".into()),
					}
				})?;
				let source = LocalChangeSource::new(
					&root.id,
					path,
					backend,
					settings.hash_threshold,
					root.max_depth,
					settings.initial_scan,
				);
				let options = LocalOptions {
					watcher: WatcherConfig {
						debounce: settings.debounce,
						..WatcherConfig::default()
					},
					debounce: settings.debounce,
					batch_size: root.effective_batch_size(),
				};
				tokio::spawn(worker::run_local(ctx.clone(), source, scan_rx, options))
			}
			_ => {
				let poller = SnapshotPoller::new(
					&root.id,
					backend,
					settings.hash_threshold,
					root.max_depth,
					settings.initial_scan,
				)
				.with_cancel(ctx.cancel.clone());
				let poll_interval = root
					.effective_poll_interval()
					.unwrap_or(Duration::from_secs(60));
				tokio::spawn(worker::run_remote(ctx.clone(), poller, scan_rx, poll_interval))
			}
		};

		let forwarder = tokio::spawn(forward(queue_rx, self.output_tx.clone()));

		info!(
			root_id = %root.id,
			protocol = %root.protocol,
			"Root started"
		);

		Ok(RootHandle {
			ctx,
			worker,
			forwarder,
		})
	}
}

impl Drop for ScanOrchestrator {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}

/// Cancel a root's worker, wait for it, then push out its pending deletes
async fn stop_root(handle: RootHandle) {
	let RootHandle {
		ctx,
		worker,
		forwarder,
	} = handle;

	ctx.cancel.cancel();
	if let Err(e) = worker.await {
		error!(root_id = %ctx.root_id(), "Worker failed: {}", e);
	}

	if timeout(FLUSH_TIMEOUT, ctx.drain()).await.is_err() {
		warn!(root_id = %ctx.root_id(), "Timed out flushing pending deletes");
	}

	let root_id = ctx.root_id().to_string();
	// The forwarder ends once the queue's sender is gone
	drop(ctx);

	let abort = forwarder.abort_handle();
	if timeout(FLUSH_TIMEOUT, forwarder).await.is_err() {
		warn!(root_id = %root_id, "Timed out forwarding events, dropping the rest");
		abort.abort();
	}
}

/// Move one root's queue into the shared output
async fn forward(mut queue: mpsc::Receiver<FileEvent>, output: mpsc::Sender<FileEvent>) {
	while let Some(event) = queue.recv().await {
		if output.send(event).await.is_err() {
			debug!("Event stream dropped, discarding output");
			break;
		}
	}
}

/// Periodically flush expired pending deletes of every root
async fn run_cleanup(roots: RootMap, every: Duration, cancel: CancellationToken) {
	let mut ticker = interval(every);
	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

	loop {
		tokio::select! {
			_ = cancel.cancelled() => break,
			_ = ticker.tick() => {}
		}

		let contexts: Vec<Arc<RootContext>> = roots
			.read()
			.await
			.values()
			.map(|handle| handle.ctx.clone())
			.collect();

		let now = Instant::now();
		join_all(contexts.iter().map(|ctx| ctx.expire(now))).await;
	}

	debug!("Cleanup task stopped");
}
