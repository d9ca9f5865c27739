//! Common error taxonomy for every storage backend

use std::io;
use thiserror::Error;

/// Errors produced by storage backends, normalised across protocols.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
	/// Transient network or transport failure
	#[error("connection error: {0}")]
	Connection(String),

	/// Credentials rejected; fatal until reconfigured
	#[error("authentication failed: {0}")]
	Auth(String),

	#[error("not found: {0}")]
	NotFound(String),

	/// Malformed or unexpected response from the remote side
	#[error("protocol error: {0}")]
	Protocol(String),

	#[error("operation timed out: {0}")]
	Timeout(String),

	/// Rejected by the root's circuit breaker without touching the network
	#[error("circuit open for root {0}")]
	CircuitOpen(String),

	#[error("backend is not connected")]
	NotConnected,

	#[error("invalid path: {0}")]
	InvalidPath(String),

	#[error("unsupported operation: {0}")]
	Unsupported(String),

	#[error("I/O error: {0}")]
	Io(String),
}

impl StorageError {
	/// Worth retrying with backoff
	pub fn is_transient(&self) -> bool {
		matches!(self, Self::Connection(_) | Self::Timeout(_))
	}

	/// Counted toward the circuit breaker's consecutive failures
	pub fn counts_as_failure(&self) -> bool {
		self.is_transient()
	}

	/// Stops the root until its configuration changes
	pub fn is_fatal(&self) -> bool {
		matches!(self, Self::Auth(_))
	}

	/// The remote side answered, so it is reachable even though the call failed
	pub fn proves_reachable(&self) -> bool {
		matches!(self, Self::NotFound(_) | Self::Protocol(_))
	}

	/// The root cannot be talked to right now; a scan cycle must be abandoned
	pub fn is_unavailable(&self) -> bool {
		matches!(
			self,
			Self::Connection(_) | Self::Timeout(_) | Self::CircuitOpen(_) | Self::NotConnected
		)
	}

	/// Map an I/O error raised while operating on `path`
	pub fn from_io(err: io::Error, path: &str) -> Self {
		#[cfg(unix)]
		if let Some(code) = err.raw_os_error() {
			match code {
				libc::ETIMEDOUT => return Self::Timeout(format!("{path}: {err}")),
				libc::ENOTCONN
				| libc::ECONNREFUSED
				| libc::ECONNRESET
				| libc::ECONNABORTED
				| libc::EHOSTDOWN
				| libc::EHOSTUNREACH
				| libc::ENETDOWN
				| libc::ENETUNREACH
				| libc::ESTALE => return Self::Connection(format!("{path}: {err}")),
				_ => {}
			}
		}

		match err.kind() {
			io::ErrorKind::NotFound => Self::NotFound(path.to_string()),
			io::ErrorKind::PermissionDenied => Self::Auth(format!("{path}: {err}")),
			io::ErrorKind::TimedOut => Self::Timeout(format!("{path}: {err}")),
			io::ErrorKind::ConnectionRefused
			| io::ErrorKind::ConnectionReset
			| io::ErrorKind::ConnectionAborted
			| io::ErrorKind::NotConnected
			| io::ErrorKind::BrokenPipe => Self::Connection(format!("{path}: {err}")),
			io::ErrorKind::InvalidData => Self::Protocol(format!("{path}: {err}")),
			_ => Self::Io(format!("{path}: {err}")),
		}
	}
}

pub type StorageResult<T> = Result<T, StorageError>;
