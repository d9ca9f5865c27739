//! Runtime services: change detection, move correlation, failure isolation
//! and the orchestrator tying them together per root

pub mod breaker;
pub mod orchestrator;
pub mod source;
pub mod tracker;

pub use breaker::{BreakerPermit, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use orchestrator::{
	BackendFactory, OrchestratorError, RootHealth, RootStatus, ScanOrchestrator,
	WorkerMetricsSnapshot,
};
pub use source::{LocalChangeSource, Signer, Snapshot, SnapshotPoller};
pub use tracker::{PendingDelete, RootTracker, TrackerConfig, TrackerStats};
