//! Global tuning knobs shared by every root

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Synchronisation settings (`[sync]`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
	/// Capacity of each root's event queue; a full queue blocks the worker
	pub queue_size: usize,

	/// How often expired pending deletes are flushed
	#[serde(with = "humantime_serde")]
	pub cleanup_interval: Duration,

	/// Files below this size get a content hash, larger ones a metadata key
	pub hash_threshold: u64,

	/// Fraction of child signatures that must match for a directory move
	pub directory_match_ratio: f64,

	/// Emit the first listing of every root as `created` events
	pub initial_scan: bool,

	/// Quiet period before local filesystem events are released
	#[serde(with = "humantime_serde")]
	pub debounce: Duration,

	pub breaker: BreakerConfig,

	pub retry: RetryConfig,
}

impl Default for SyncSettings {
	fn default() -> Self {
		Self {
			queue_size: 1024,
			cleanup_interval: Duration::from_secs(5),
			hash_threshold: 1024 * 1024, // 1MB
			directory_match_ratio: 0.8,
			initial_scan: true,
			debounce: Duration::from_millis(500),
			breaker: BreakerConfig::default(),
			retry: RetryConfig::default(),
		}
	}
}

/// Circuit breaker settings (`[sync.breaker]`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
	/// Consecutive failures before the breaker opens
	pub failure_threshold: u32,

	/// Time spent open before a trial call is let through
	#[serde(with = "humantime_serde")]
	pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
	fn default() -> Self {
		Self {
			failure_threshold: 5,
			reset_timeout: Duration::from_secs(60),
		}
	}
}

/// Retry policy for remote calls (`[sync.retry]`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
	/// Retries after the first attempt; zero disables retrying
	pub max_retries: u32,

	#[serde(with = "humantime_serde")]
	pub initial_interval: Duration,

	#[serde(with = "humantime_serde")]
	pub max_interval: Duration,

	/// Deadline for every single attempt
	#[serde(with = "humantime_serde")]
	pub call_timeout: Duration,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_retries: 3,
			initial_interval: Duration::from_millis(500),
			max_interval: Duration::from_secs(5),
			call_timeout: Duration::from_secs(30),
		}
	}
}

/// Logging settings (`[logging]`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
	/// Filter directive used when `RUST_LOG` is not set
	pub level: String,

	/// Also write daily-rotated log files here
	pub directory: Option<PathBuf>,

	pub file_name: String,
}

impl Default for LoggingConfig {
	fn default() -> Self {
		Self {
			level: "sd_storage_sync=info,sd_fs_watcher=info".to_string(),
			directory: None,
			file_name: "sd-storage-sync.log".to_string(),
		}
	}
}
