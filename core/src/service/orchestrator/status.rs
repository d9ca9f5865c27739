//! Observability types reported per root

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::metrics::WorkerMetricsSnapshot;
use crate::config::Protocol;
use crate::service::breaker::BreakerSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RootHealth {
	Connected,
	/// Not reachable, or suspended after an authentication failure
	Disconnected,
	/// Circuit breaker open or half-open
	Degraded,
}

impl fmt::Display for RootHealth {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Connected => "connected",
			Self::Disconnected => "disconnected",
			Self::Degraded => "degraded",
		})
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootStatus {
	pub root_id: String,
	pub protocol: Protocol,
	pub health: RootHealth,
	/// Stopped until the configuration is reloaded
	pub suspended: bool,
	/// Absent for local roots
	pub breaker: Option<BreakerSnapshot>,
	pub pending_moves: usize,
	pub deferred_deletes: usize,
	/// Events waiting in the root's outbound queue
	pub queue_depth: usize,
	pub cycle_running: bool,
	pub last_scan_at: Option<DateTime<Utc>>,
	pub last_error: Option<String>,
	pub metrics: WorkerMetricsSnapshot,
}
