//! Move detection
//!
//! Deletes are held in a per-root pending table for the root's move window.
//! A create whose content signature matches a pending delete becomes a
//! `moved` event; anything left when the window closes is a real delete.

mod directory;
mod pending;
mod root;

pub use pending::PendingDelete;
pub use root::{RootTracker, TrackerConfig, TrackerStats};
