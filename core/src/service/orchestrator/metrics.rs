//! Counters for one root worker

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

/// Metrics for a single root worker
#[derive(Debug, Default)]
pub struct RootWorkerMetrics {
	/// Raw events produced by the change source
	pub events_observed: AtomicU64,
	/// Events handed downstream after move correlation
	pub events_emitted: AtomicU64,
	/// Completed scan cycles or watcher batches
	pub cycles: AtomicU64,
	pub failed_cycles: AtomicU64,
	/// Deepest the outbound queue has been
	pub max_queue_depth: AtomicU64,
	pub last_cycle_duration: AtomicU64,
	pub max_cycle_duration: AtomicU64,
}

/// Plain copy of [`RootWorkerMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerMetricsSnapshot {
	pub events_observed: u64,
	pub events_emitted: u64,
	pub cycles: u64,
	pub failed_cycles: u64,
	pub max_queue_depth: u64,
	pub last_cycle_ms: u64,
	pub max_cycle_ms: u64,
}

fn store_max(slot: &AtomicU64, value: u64) {
	let mut current_max = slot.load(Ordering::Relaxed);
	while value > current_max {
		match slot.compare_exchange_weak(current_max, value, Ordering::Relaxed, Ordering::Relaxed) {
			Ok(_) => break,
			Err(val) => current_max = val,
		}
	}
}

impl RootWorkerMetrics {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn record_observed(&self, count: usize) {
		self.events_observed
			.fetch_add(count as u64, Ordering::Relaxed);
	}

	pub fn record_emitted(&self, count: usize) {
		self.events_emitted
			.fetch_add(count as u64, Ordering::Relaxed);
	}

	pub fn record_cycle(&self, duration: Duration) {
		self.cycles.fetch_add(1, Ordering::Relaxed);

		let duration_ms = duration.as_millis() as u64;
		self.last_cycle_duration
			.store(duration_ms, Ordering::Relaxed);
		store_max(&self.max_cycle_duration, duration_ms);
	}

	pub fn record_failed_cycle(&self) {
		self.failed_cycles.fetch_add(1, Ordering::Relaxed);
	}

	pub fn update_queue_depth(&self, depth: usize) {
		store_max(&self.max_queue_depth, depth as u64);
	}

	pub fn snapshot(&self) -> WorkerMetricsSnapshot {
		WorkerMetricsSnapshot {
			events_observed: self.events_observed.load(Ordering::Relaxed),
			events_emitted: self.events_emitted.load(Ordering::Relaxed),
			cycles: self.cycles.load(Ordering::Relaxed),
			failed_cycles: self.failed_cycles.load(Ordering::Relaxed),
			max_queue_depth: self.max_queue_depth.load(Ordering::Relaxed),
			last_cycle_ms: self.last_cycle_duration.load(Ordering::Relaxed),
			max_cycle_ms: self.max_cycle_duration.load(Ordering::Relaxed),
		}
	}

	pub fn log_metrics(&self, root_id: &str) {
		let s = self.snapshot();
		info!(
			root_id,
			"Root metrics: observed={}, emitted={}, cycles={}, failed={}, max_queue_depth={}, max_cycle={}ms",
			s.events_observed,
			s.events_emitted,
			s.cycles,
			s.failed_cycles,
			s.max_queue_depth,
			s.max_cycle_ms
		);
	}
}
