//! Per-root circuit breaker
//!
//! ```text
//!   Closed ──(failure_threshold consecutive failures)──> Open
//!   Open ──(reset_timeout elapsed, next call)──> HalfOpen
//!   HalfOpen ──(trial succeeds)──> Closed
//!   HalfOpen ──(trial fails)──> Open
//! ```
//!
//! Only connection failures and timeouts count. A `NotFound` or protocol
//! error proves the server answered and resets the count; auth errors leave
//! it untouched.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::BreakerConfig;
use crate::volume::{StorageError, StorageResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
	Closed,
	Open,
	HalfOpen,
}

/// Point-in-time view for observability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
	pub root_id: String,
	pub state: BreakerState,
	pub consecutive_failures: u32,
	pub opened_at: Option<DateTime<Utc>>,
	/// Times the breaker went from closed to open
	pub trips: u64,
	/// Calls failed fast without touching the backend
	pub rejected_calls: u64,
}

#[derive(Debug)]
struct BreakerInner {
	state: BreakerState,
	consecutive_failures: u32,
	opened_at: Option<Instant>,
	opened_at_wall: Option<DateTime<Utc>>,
	trial_in_flight: bool,
}

impl BreakerInner {
	fn open(&mut self) {
		self.state = BreakerState::Open;
		self.opened_at = Some(Instant::now());
		self.opened_at_wall = Some(Utc::now());
		self.trial_in_flight = false;
	}

	fn close(&mut self) {
		self.state = BreakerState::Closed;
		self.consecutive_failures = 0;
		self.opened_at = None;
		self.opened_at_wall = None;
		self.trial_in_flight = false;
	}
}

#[derive(Debug)]
pub struct CircuitBreaker {
	root_id: String,
	config: BreakerConfig,
	inner: RwLock<BreakerInner>,
	trips: AtomicU64,
	rejected: AtomicU64,
}

/// Admission to make one call. Must be settled with [`BreakerPermit::record`];
/// a dropped permit releases a half-open trial slot without a verdict.
#[must_use]
pub struct BreakerPermit<'a> {
	breaker: &'a CircuitBreaker,
	trial: bool,
	settled: bool,
}

impl BreakerPermit<'_> {
	pub fn is_trial(&self) -> bool {
		self.trial
	}

	pub fn record<T>(mut self, result: &StorageResult<T>) {
		self.settled = true;
		match result {
			Ok(_) => self.breaker.on_success(self.trial),
			Err(e) if e.counts_as_failure() => self.breaker.on_failure(self.trial, e),
			Err(e) if e.proves_reachable() => self.breaker.on_success(self.trial),
			Err(_) => self.breaker.on_neutral(self.trial),
		}
	}
}

impl Drop for BreakerPermit<'_> {
	fn drop(&mut self) {
		if !self.settled {
			self.breaker.on_neutral(self.trial);
		}
	}
}

impl CircuitBreaker {
	pub fn new(root_id: impl Into<String>, config: BreakerConfig) -> Self {
		Self {
			root_id: root_id.into(),
			config,
			inner: RwLock::new(BreakerInner {
				state: BreakerState::Closed,
				consecutive_failures: 0,
				opened_at: None,
				opened_at_wall: None,
				trial_in_flight: false,
			}),
			trips: AtomicU64::new(0),
			rejected: AtomicU64::new(0),
		}
	}

	pub fn root_id(&self) -> &str {
		&self.root_id
	}

	/// Ask to make a call. Fails fast with `CircuitOpen` while open.
	pub fn acquire(&self) -> StorageResult<BreakerPermit<'_>> {
		let mut inner = self.inner.write();
		let state = inner.state;

		let trial = match state {
			BreakerState::Closed => false,
			BreakerState::Open => {
				let elapsed = inner
					.opened_at
					.map(|at| at.elapsed())
					.unwrap_or(self.config.reset_timeout);

				if elapsed < self.config.reset_timeout {
					drop(inner);
					return Err(self.reject());
				}

				inner.state = BreakerState::HalfOpen;
				inner.trial_in_flight = true;
				info!(root_id = %self.root_id, "Circuit half-open, allowing trial call");
				true
			}
			BreakerState::HalfOpen => {
				if inner.trial_in_flight {
					drop(inner);
					return Err(self.reject());
				}
				inner.trial_in_flight = true;
				true
			}
		};

		Ok(BreakerPermit {
			breaker: self,
			trial,
			settled: false,
		})
	}

	/// Run `f` under the breaker
	pub async fn call<T, F, Fut>(&self, f: F) -> StorageResult<T>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = StorageResult<T>>,
	{
		let permit = self.acquire()?;
		let result = f().await;
		permit.record(&result);
		result
	}

	fn reject(&self) -> StorageError {
		self.rejected.fetch_add(1, Ordering::Relaxed);
		debug!(root_id = %self.root_id, "Circuit open, rejecting call");
		StorageError::CircuitOpen(self.root_id.clone())
	}

	fn on_success(&self, trial: bool) {
		let mut inner = self.inner.write();
		let state = inner.state;
		match state {
			BreakerState::Closed => inner.consecutive_failures = 0,
			_ if trial => {
				inner.close();
				info!(root_id = %self.root_id, "Circuit closed after successful trial");
			}
			// A call admitted before the breaker opened says nothing about now
			_ => {}
		}
	}

	fn on_failure(&self, trial: bool, error: &StorageError) {
		let mut inner = self.inner.write();
		inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
		let state = inner.state;
		let failures = inner.consecutive_failures;

		match state {
			BreakerState::HalfOpen if trial => {
				inner.open();
				warn!(
					root_id = %self.root_id,
					"Trial call failed, circuit re-opened: {}", error
				);
			}
			BreakerState::Closed if failures >= self.config.failure_threshold => {
				inner.open();
				self.trips.fetch_add(1, Ordering::Relaxed);
				warn!(
					root_id = %self.root_id,
					failures,
					"Circuit opened: {}", error
				);
			}
			_ => {}
		}
	}

	fn on_neutral(&self, trial: bool) {
		if trial {
			self.inner.write().trial_in_flight = false;
		}
	}

	pub fn state(&self) -> BreakerState {
		self.inner.read().state
	}

	pub fn consecutive_failures(&self) -> u32 {
		self.inner.read().consecutive_failures
	}

	pub fn opened_at(&self) -> Option<DateTime<Utc>> {
		self.inner.read().opened_at_wall
	}

	pub fn snapshot(&self) -> BreakerSnapshot {
		let inner = self.inner.read();
		BreakerSnapshot {
			root_id: self.root_id.clone(),
			state: inner.state,
			consecutive_failures: inner.consecutive_failures,
			opened_at: inner.opened_at_wall,
			trips: self.trips.load(Ordering::Relaxed),
			rejected_calls: self.rejected.load(Ordering::Relaxed),
		}
	}

	/// Operator override back to closed
	pub fn reset(&self) {
		self.inner.write().close();
		info!(root_id = %self.root_id, "Circuit manually reset");
	}
}
