//! Per-root configuration

use super::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default recursion limit for listings
pub const DEFAULT_MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
	Local,
	Smb,
	Ftp,
	Nfs,
	Webdav,
}

impl Protocol {
	/// Expected observation latency drives how long deletes wait for a matching create
	pub fn default_move_window(self) -> Duration {
		Duration::from_secs(match self {
			Self::Local => 2,
			Self::Smb => 10,
			Self::Ftp => 30,
			Self::Nfs => 5,
			Self::Webdav => 15,
		})
	}

	pub fn default_batch_size(self) -> usize {
		match self {
			Self::Local => 1000,
			Self::Smb => 500,
			Self::Ftp => 100,
			Self::Nfs => 800,
			Self::Webdav => 200,
		}
	}

	/// `None` for event-driven roots
	pub fn default_poll_interval(self) -> Option<Duration> {
		match self {
			Self::Local => None,
			Self::Smb => Some(Duration::from_secs(30)),
			Self::Ftp => Some(Duration::from_secs(60)),
			Self::Nfs => Some(Duration::from_secs(15)),
			Self::Webdav => Some(Duration::from_secs(60)),
		}
	}

	pub fn is_remote(self) -> bool {
		!matches!(self, Self::Local)
	}
}

impl fmt::Display for Protocol {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Local => "local",
			Self::Smb => "smb",
			Self::Ftp => "ftp",
			Self::Nfs => "nfs",
			Self::Webdav => "webdav",
		})
	}
}

/// How to reach a root. Which fields matter depends on the protocol.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
	/// Local directory, or the sub-path inside a share/server
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub path: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub host: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub port: Option<u16>,
	/// SMB share name
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub share: Option<String>,
	/// NFS export on the server
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub export_path: Option<String>,
	/// Where SMB/NFS shares get mounted
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub mount_point: Option<PathBuf>,
	/// Extra `-o` options passed to mount
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub mount_options: Option<String>,
	/// WebDAV endpoint
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub url: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub username: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub password: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub domain: Option<String>,
}

// Keep credentials out of logs
impl fmt::Debug for ConnectionParams {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ConnectionParams")
			.field("path", &self.path)
			.field("host", &self.host)
			.field("port", &self.port)
			.field("share", &self.share)
			.field("export_path", &self.export_path)
			.field("mount_point", &self.mount_point)
			.field("mount_options", &self.mount_options)
			.field("url", &self.url)
			.field("username", &self.username)
			.field("password", &self.password.as_ref().map(|_| "<redacted>"))
			.field("domain", &self.domain)
			.finish()
	}
}

fn default_max_depth() -> usize {
	DEFAULT_MAX_DEPTH
}

fn default_enabled() -> bool {
	true
}

/// One storage root as configured. Immutable for the lifetime of its worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRoot {
	pub id: String,
	pub protocol: Protocol,

	#[serde(flatten)]
	pub connection: ConnectionParams,

	#[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
	pub move_window: Option<Duration>,

	#[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
	pub poll_interval: Option<Duration>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub batch_size: Option<usize>,

	#[serde(default = "default_max_depth")]
	pub max_depth: usize,

	#[serde(default = "default_enabled")]
	pub enabled: bool,
}

impl StorageRoot {
	pub fn new(id: impl Into<String>, protocol: Protocol) -> Self {
		Self {
			id: id.into(),
			protocol,
			connection: ConnectionParams::default(),
			move_window: None,
			poll_interval: None,
			batch_size: None,
			max_depth: DEFAULT_MAX_DEPTH,
			enabled: true,
		}
	}

	/// Local root at `path`
	pub fn local(id: impl Into<String>, path: impl Into<String>) -> Self {
		let mut root = Self::new(id, Protocol::Local);
		root.connection.path = Some(path.into());
		root
	}

	pub fn effective_move_window(&self) -> Duration {
		self.move_window
			.unwrap_or_else(|| self.protocol.default_move_window())
	}

	pub fn effective_batch_size(&self) -> usize {
		self.batch_size
			.unwrap_or_else(|| self.protocol.default_batch_size())
	}

	pub fn effective_poll_interval(&self) -> Option<Duration> {
		self.poll_interval
			.or_else(|| self.protocol.default_poll_interval())
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		let invalid = |reason: &str| ConfigError::InvalidRoot {
			id: self.id.clone(),
			reason: reason.to_string(),
		};

		if self.id.trim().is_empty() {
			return Err(invalid("id must not be empty"));
		}

		let c = &self.connection;
		match self.protocol {
			Protocol::Local if c.path.is_none() => return Err(invalid("local roots need `path`")),
			Protocol::Smb if c.host.is_none() || c.share.is_none() => {
				return Err(invalid("smb roots need `host` and `share`"))
			}
			Protocol::Ftp if c.host.is_none() => return Err(invalid("ftp roots need `host`")),
			Protocol::Nfs
				if c.host.is_none() || c.export_path.is_none() || c.mount_point.is_none() =>
			{
				return Err(invalid(
					"nfs roots need `host`, `export_path` and `mount_point`",
				))
			}
			Protocol::Webdav if c.url.is_none() => return Err(invalid("webdav roots need `url`")),
			_ => {}
		}

		if self.batch_size == Some(0) {
			return Err(invalid("batch_size must be positive"));
		}
		if self.max_depth == 0 {
			return Err(invalid("max_depth must be positive"));
		}
		if self.move_window == Some(Duration::ZERO) {
			return Err(invalid("move_window must be positive"));
		}
		if self.poll_interval == Some(Duration::ZERO) {
			return Err(invalid("poll_interval must be positive"));
		}

		Ok(())
	}
}
