//! Remote adapter wrapper: circuit breaker, bounded retry and per-attempt
//! timeout around every network call

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{Listing, StorageBackend};
use crate::config::{Protocol, RetryConfig};
use crate::domain::FileInfo;
use crate::service::breaker::CircuitBreaker;
use crate::volume::error::{StorageError, StorageResult};

/// Exponential backoff that gives up after a fixed number of retries
struct BoundedBackoff {
	inner: ExponentialBackoff,
	max_retries: u32,
	remaining: u32,
}

impl BoundedBackoff {
	fn new(config: &RetryConfig) -> Self {
		let inner = ExponentialBackoffBuilder::new()
			.with_initial_interval(config.initial_interval)
			.with_max_interval(config.max_interval)
			.with_max_elapsed_time(None)
			.build();

		Self {
			inner,
			max_retries: config.max_retries,
			remaining: config.max_retries,
		}
	}
}

impl Backoff for BoundedBackoff {
	fn next_backoff(&mut self) -> Option<Duration> {
		if self.remaining == 0 {
			return None;
		}
		self.remaining -= 1;
		self.inner.next_backoff()
	}

	fn reset(&mut self) {
		self.inner.reset();
		self.remaining = self.max_retries;
	}
}

/// Breaker → retry → timeout → adapter
#[derive(Debug)]
pub struct GuardedBackend {
	inner: Arc<dyn StorageBackend>,
	breaker: Arc<CircuitBreaker>,
	retry: RetryConfig,
}

impl GuardedBackend {
	pub fn new(
		inner: Arc<dyn StorageBackend>,
		breaker: Arc<CircuitBreaker>,
		retry: RetryConfig,
	) -> Self {
		Self {
			inner,
			breaker,
			retry,
		}
	}

	pub fn breaker(&self) -> &Arc<CircuitBreaker> {
		&self.breaker
	}

	async fn guarded<T, F, Fut>(&self, op: &'static str, f: F) -> StorageResult<T>
	where
		F: Fn() -> Fut,
		Fut: Future<Output = StorageResult<T>>,
	{
		let call_timeout = self.retry.call_timeout;
		let root_id = self.breaker.root_id();

		self.breaker
			.call(|| {
				backoff::future::retry_notify(
					BoundedBackoff::new(&self.retry),
					|| {
						let attempt = f();
						async move {
							match timeout(call_timeout, attempt).await {
								Ok(Ok(value)) => Ok(value),
								Ok(Err(e)) if e.is_transient() => Err(backoff::Error::transient(e)),
								Ok(Err(e)) => Err(backoff::Error::permanent(e)),
								Err(_) => Err(backoff::Error::transient(StorageError::Timeout(
									format!("{op} exceeded {call_timeout:?}"),
								))),
							}
						}
					},
					|e: StorageError, wait: Duration| {
						warn!(root_id, op, "Remote call failed, retrying in {:?}: {}", wait, e);
					},
				)
			})
			.await
			.map_err(|e| {
				debug!(root_id, op, "Remote call gave up: {}", e);
				e
			})
	}
}

#[async_trait]
impl StorageBackend for GuardedBackend {
	async fn connect(&self) -> StorageResult<()> {
		if self.inner.is_connected() {
			return Ok(());
		}
		self.guarded("connect", || self.inner.connect()).await
	}

	async fn disconnect(&self) -> StorageResult<()> {
		self.inner.disconnect().await
	}

	fn is_connected(&self) -> bool {
		self.inner.is_connected()
	}

	async fn test_connection(&self) -> StorageResult<()> {
		self.guarded("test_connection", || self.inner.test_connection())
			.await
	}

	async fn list(&self, path: &str) -> StorageResult<Listing> {
		self.guarded("list", || self.inner.list(path)).await
	}

	async fn read(&self, path: &str) -> StorageResult<Bytes> {
		self.guarded("read", || self.inner.read(path)).await
	}

	async fn write(&self, path: &str, data: Bytes) -> StorageResult<()> {
		self.guarded("write", || self.inner.write(path, data.clone()))
			.await
	}

	async fn delete(&self, path: &str) -> StorageResult<()> {
		self.guarded("delete", || self.inner.delete(path)).await
	}

	async fn stat(&self, path: &str) -> StorageResult<FileInfo> {
		self.guarded("stat", || self.inner.stat(path)).await
	}

	async fn exists(&self, path: &str) -> StorageResult<bool> {
		self.guarded("exists", || self.inner.exists(path)).await
	}

	async fn create_dir(&self, path: &str) -> StorageResult<()> {
		self.guarded("create_dir", || self.inner.create_dir(path))
			.await
	}

	fn protocol(&self) -> Protocol {
		self.inner.protocol()
	}
}
