//! Change sources: where file events come from
//!
//! Local roots are event driven ([`LocalChangeSource`]); every remote
//! protocol is polled and diffed ([`SnapshotPoller`]). Both produce the
//! same [`FileEvent`](crate::domain::FileEvent) stream.

mod local;
mod poller;
mod signer;
mod snapshot;
mod walk;

pub use local::LocalChangeSource;
pub use poller::SnapshotPoller;
pub use signer::Signer;
pub use snapshot::Snapshot;
