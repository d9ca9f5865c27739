//! Circuit breaker behaviour, alone and wrapped around a backend

use sd_storage_sync::config::{BreakerConfig, Protocol, RetryConfig};
use sd_storage_sync::service::{BreakerState, CircuitBreaker};
use sd_storage_sync::testing::MemoryBackend;
use sd_storage_sync::volume::{GuardedBackend, StorageBackend, StorageError, StorageResult};
use std::sync::Arc;
use std::time::Duration;

const RESET_TIMEOUT: Duration = Duration::from_secs(60);

fn breaker_config(failure_threshold: u32) -> BreakerConfig {
	BreakerConfig {
		failure_threshold,
		reset_timeout: RESET_TIMEOUT,
	}
}

fn no_retries() -> RetryConfig {
	RetryConfig {
		max_retries: 0,
		initial_interval: Duration::from_millis(10),
		max_interval: Duration::from_millis(10),
		call_timeout: Duration::from_secs(5),
	}
}

fn failing() -> StorageResult<()> {
	Err(StorageError::Connection("connection refused".into()))
}

#[tokio::test(start_paused = true)]
async fn test_breaker_transitions() {
	let breaker = CircuitBreaker::new("nas", breaker_config(3));

	for _ in 0..2 {
		breaker.acquire().unwrap().record(&failing());
	}
	assert_eq!(breaker.state(), BreakerState::Closed);
	assert_eq!(breaker.consecutive_failures(), 2);

	breaker.acquire().unwrap().record(&failing());
	assert_eq!(breaker.state(), BreakerState::Open);
	assert!(breaker.opened_at().is_some());

	// Still open just before the timeout
	tokio::time::advance(RESET_TIMEOUT - Duration::from_secs(1)).await;
	assert!(matches!(breaker.acquire(), Err(StorageError::CircuitOpen(_))));

	tokio::time::advance(Duration::from_secs(1)).await;
	let trial = breaker.acquire().unwrap();
	assert!(trial.is_trial());
	assert_eq!(breaker.state(), BreakerState::HalfOpen);

	// Only one trial at a time
	assert!(matches!(breaker.acquire(), Err(StorageError::CircuitOpen(_))));

	// A failed trial re-opens and restarts the timeout
	trial.record(&failing());
	assert_eq!(breaker.state(), BreakerState::Open);
	tokio::time::advance(RESET_TIMEOUT / 2).await;
	assert!(breaker.acquire().is_err());

	tokio::time::advance(RESET_TIMEOUT).await;
	breaker.acquire().unwrap().record(&Ok(()));
	assert_eq!(breaker.state(), BreakerState::Closed);
	assert_eq!(breaker.consecutive_failures(), 0);

	let snapshot = breaker.snapshot();
	assert_eq!(snapshot.trips, 1);
	assert_eq!(snapshot.rejected_calls, 3);
}

#[tokio::test(start_paused = true)]
async fn test_not_found_resets_failure_count() {
	let breaker = CircuitBreaker::new("nas", breaker_config(3));

	breaker.acquire().unwrap().record(&failing());
	breaker.acquire().unwrap().record(&failing());
	breaker
		.acquire()
		.unwrap()
		.record::<()>(&Err(StorageError::NotFound("/x".into())));

	assert_eq!(breaker.consecutive_failures(), 0);
	assert_eq!(breaker.state(), BreakerState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_fails_fast_without_network() {
	let memory = Arc::new(MemoryBackend::new(Protocol::Smb));
	memory.add_file("/movie.mkv", b"frames");
	memory.connect().await.unwrap();

	let breaker = Arc::new(CircuitBreaker::new("smb-share", breaker_config(5)));
	let backend = GuardedBackend::new(memory.clone(), breaker.clone(), no_retries());

	memory.set_failure(Some(StorageError::Connection("host unreachable".into())));
	for _ in 0..5 {
		assert!(matches!(
			backend.list("/").await,
			Err(StorageError::Connection(_))
		));
	}
	assert_eq!(breaker.state(), BreakerState::Open);

	memory.reset_calls();
	assert!(matches!(
		backend.list("/").await,
		Err(StorageError::CircuitOpen(_))
	));
	assert_eq!(memory.calls(), 0);

	// The share comes back; after the timeout one trial goes through
	memory.set_failure(None);
	tokio::time::advance(RESET_TIMEOUT).await;
	assert_eq!(backend.list("/").await.unwrap().entries.len(), 1);
	assert_eq!(memory.calls(), 1);
	assert_eq!(breaker.state(), BreakerState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_retries_are_bounded_and_count_once() {
	let memory = Arc::new(MemoryBackend::new(Protocol::Ftp));
	memory.connect().await.unwrap();

	let breaker = Arc::new(CircuitBreaker::new("ftp", breaker_config(5)));
	let retry = RetryConfig {
		max_retries: 2,
		..no_retries()
	};
	let backend = GuardedBackend::new(memory.clone(), breaker.clone(), retry);

	memory.set_failure(Some(StorageError::Timeout("slow".into())));
	memory.reset_calls();
	assert!(backend.stat("/").await.is_err());

	// First attempt plus two retries, one breaker failure
	assert_eq!(memory.calls(), 3);
	assert_eq!(breaker.consecutive_failures(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_call_times_out() {
	let memory = Arc::new(MemoryBackend::new(Protocol::Webdav));
	memory.connect().await.unwrap();
	memory.set_delay(Some(Duration::from_secs(30)));

	let breaker = Arc::new(CircuitBreaker::new("dav", breaker_config(5)));
	let retry = RetryConfig {
		call_timeout: Duration::from_secs(1),
		..no_retries()
	};
	let backend = GuardedBackend::new(memory, breaker.clone(), retry);

	assert!(matches!(
		backend.list("/").await,
		Err(StorageError::Timeout(_))
	));
	assert_eq!(breaker.consecutive_failures(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_breakers_are_isolated_per_root() {
	let down = Arc::new(MemoryBackend::new(Protocol::Smb));
	let up = Arc::new(MemoryBackend::new(Protocol::Nfs));
	down.connect().await.unwrap();
	up.connect().await.unwrap();
	down.set_failure(Some(StorageError::Connection("refused".into())));

	let down_breaker = Arc::new(CircuitBreaker::new("down", breaker_config(2)));
	let up_breaker = Arc::new(CircuitBreaker::new("up", breaker_config(2)));
	let down_backend = GuardedBackend::new(down, down_breaker.clone(), no_retries());
	let up_backend = GuardedBackend::new(up, up_breaker.clone(), no_retries());

	for _ in 0..3 {
		let _ = down_backend.list("/").await;
		up_backend.list("/").await.unwrap();
	}

	assert_eq!(down_breaker.state(), BreakerState::Open);
	assert_eq!(up_breaker.state(), BreakerState::Closed);
	assert_eq!(up_breaker.consecutive_failures(), 0);
}
