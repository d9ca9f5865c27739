//! Storage root synchronisation core
//!
//! Treats local disk, SMB, FTP, NFS and WebDAV roots as one address space
//! and reports their changes as a single stream of file events, inferring
//! moves and renames from independent delete and create observations.
//!
//! ```no_run
//! use futures::StreamExt;
//! use sd_storage_sync::{config::SyncConfig, service::ScanOrchestrator};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = SyncConfig::load("storage-sync.toml")?;
//! let orchestrator = ScanOrchestrator::start(config).await?;
//! let mut events = orchestrator.take_event_stream().expect("taken once");
//! while let Some(event) = events.next().await {
//! 	println!("{} {}", event.kind, event.path);
//! }
//! orchestrator.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod domain;
pub mod logging;
pub mod service;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod volume;
