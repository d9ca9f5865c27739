//! Configuration loading and validation

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

pub mod settings;
pub mod storage_root;

pub use settings::{BreakerConfig, LoggingConfig, RetryConfig, SyncSettings};
pub use storage_root::{ConnectionParams, Protocol, StorageRoot};

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config {path}: {source}")]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to write config {path}: {source}")]
	Write {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("invalid config syntax: {0}")]
	Parse(#[from] toml::de::Error),

	#[error("failed to serialize config: {0}")]
	Serialize(#[from] toml::ser::Error),

	#[error("duplicate root id: {0}")]
	DuplicateRoot(String),

	#[error("invalid root {id}: {reason}")]
	InvalidRoot { id: String, reason: String },

	#[error("invalid setting {name}: {reason}")]
	InvalidSetting { name: &'static str, reason: String },
}

/// Whole configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
	#[serde(default)]
	pub sync: SyncSettings,

	#[serde(default)]
	pub logging: LoggingConfig,

	#[serde(default)]
	pub roots: Vec<StorageRoot>,
}

impl SyncConfig {
	/// Load and validate a TOML config file
	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		info!("Loading config from {:?}", path);

		let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.to_path_buf(),
			source,
		})?;

		Self::from_toml_str(&text)
	}

	pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
		let config: SyncConfig = toml::from_str(text)?;
		config.validate()?;
		Ok(config)
	}

	pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
		let path = path.as_ref();
		let text = toml::to_string_pretty(self)?;

		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
				path: path.to_path_buf(),
				source,
			})?;
		}

		fs::write(path, text).map_err(|source| ConfigError::Write {
			path: path.to_path_buf(),
			source,
		})?;

		info!("Saved config to {:?}", path);
		Ok(())
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		let s = &self.sync;

		if s.queue_size == 0 {
			return Err(ConfigError::InvalidSetting {
				name: "queue_size",
				reason: "must be positive".into(),
			});
		}
		if !(s.directory_match_ratio > 0.0 && s.directory_match_ratio <= 1.0) {
			return Err(ConfigError::InvalidSetting {
				name: "directory_match_ratio",
				reason: format!("{} is outside (0, 1]", s.directory_match_ratio),
			});
		}
		if s.cleanup_interval.is_zero() {
			return Err(ConfigError::InvalidSetting {
				name: "cleanup_interval",
				reason: "must be positive".into(),
			});
		}
		if s.breaker.failure_threshold == 0 {
			return Err(ConfigError::InvalidSetting {
				name: "breaker.failure_threshold",
				reason: "must be positive".into(),
			});
		}
		if s.retry.call_timeout.is_zero() {
			return Err(ConfigError::InvalidSetting {
				name: "retry.call_timeout",
				reason: "must be positive".into(),
			});
		}

		let mut seen = HashSet::new();
		for root in &self.roots {
			root.validate()?;
			if !seen.insert(root.id.as_str()) {
				return Err(ConfigError::DuplicateRoot(root.id.clone()));
			}
		}

		Ok(())
	}

	/// Roots that should be running
	pub fn enabled_roots(&self) -> impl Iterator<Item = &StorageRoot> {
		self.roots.iter().filter(|root| root.enabled)
	}
}
