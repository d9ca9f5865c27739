//! Domain types shared by every layer
//!
//! Paths carried by these types are always root-relative in `/a/b` form; the
//! storage root itself is `/`.

pub mod event;
pub mod file;
pub mod signature;

pub use event::{FileEvent, FileEventKind, IngestEvent, MovedChild};
pub use file::FileInfo;
pub use signature::ContentSignature;
