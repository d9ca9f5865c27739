//! Event types shared by the watcher and its consumers

use notify::event::{ModifyKind, RenameMode};
use notify::EventKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::SystemTime;

/// Coarse classification of a raw `notify` event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEventKind {
    Create,
    Modify,
    Remove,
    /// Rename with both paths (`RenameMode::Both`) or a lone half of one
    Rename(RenameHalf),
    Other(String),
}

/// Which side of a rename a raw event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameHalf {
    Both,
    From,
    To,
    Unknown,
}

/// A raw event straight from the OS backend, before debouncing
#[derive(Debug, Clone)]
pub struct RawNotifyEvent {
    pub kind: RawEventKind,
    pub paths: Vec<PathBuf>,
    pub timestamp: SystemTime,
}

impl RawNotifyEvent {
    /// Convert a `notify` event into our representation
    pub fn from_notify(event: notify::Event) -> Self {
        let kind = match event.kind {
            EventKind::Create(_) => RawEventKind::Create,
            EventKind::Remove(_) => RawEventKind::Remove,
            EventKind::Modify(ModifyKind::Name(mode)) => RawEventKind::Rename(match mode {
                RenameMode::Both => RenameHalf::Both,
                RenameMode::From => RenameHalf::From,
                RenameMode::To => RenameHalf::To,
                _ => RenameHalf::Unknown,
            }),
            EventKind::Modify(_) => RawEventKind::Modify,
            other => RawEventKind::Other(format!("{other:?}")),
        };

        Self {
            kind,
            paths: event.paths,
            timestamp: SystemTime::now(),
        }
    }

    /// First path carried by the event, if any
    pub fn primary_path(&self) -> Option<&PathBuf> {
        self.paths.first()
    }
}

/// Normalized filesystem change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FsEventKind {
    Create { path: PathBuf },
    Modify { path: PathBuf },
    Remove { path: PathBuf },
    Rename { from: PathBuf, to: PathBuf },
}

impl FsEventKind {
    pub fn is_create(&self) -> bool {
        matches!(self, Self::Create { .. })
    }

    pub fn is_modify(&self) -> bool {
        matches!(self, Self::Modify { .. })
    }

    pub fn is_remove(&self) -> bool {
        matches!(self, Self::Remove { .. })
    }

    pub fn is_rename(&self) -> bool {
        matches!(self, Self::Rename { .. })
    }
}

/// A debounced event as delivered to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsEvent {
    pub kind: FsEventKind,
    pub timestamp: SystemTime,
}

impl FsEvent {
    pub fn create(path: PathBuf) -> Self {
        Self::new(FsEventKind::Create { path })
    }

    pub fn modify(path: PathBuf) -> Self {
        Self::new(FsEventKind::Modify { path })
    }

    pub fn remove(path: PathBuf) -> Self {
        Self::new(FsEventKind::Remove { path })
    }

    pub fn rename(from: PathBuf, to: PathBuf) -> Self {
        Self::new(FsEventKind::Rename { from, to })
    }

    fn new(kind: FsEventKind) -> Self {
        Self {
            kind,
            timestamp: SystemTime::now(),
        }
    }

    /// The path the event is about (the destination for renames)
    pub fn path(&self) -> &PathBuf {
        match &self.kind {
            FsEventKind::Create { path }
            | FsEventKind::Modify { path }
            | FsEventKind::Remove { path } => path,
            FsEventKind::Rename { to, .. } => to,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, RemoveKind};

    #[test]
    fn test_from_notify_maps_kinds() {
        let create = notify::Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/tmp/a"));
        assert_eq!(RawNotifyEvent::from_notify(create).kind, RawEventKind::Create);

        let remove = notify::Event::new(EventKind::Remove(RemoveKind::Any))
            .add_path(PathBuf::from("/tmp/a"));
        assert_eq!(RawNotifyEvent::from_notify(remove).kind, RawEventKind::Remove);

        let rename = notify::Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/tmp/a"))
            .add_path(PathBuf::from("/tmp/b"));
        let raw = RawNotifyEvent::from_notify(rename);
        assert_eq!(raw.kind, RawEventKind::Rename(RenameHalf::Both));
        assert_eq!(raw.paths.len(), 2);
    }

    #[test]
    fn test_rename_path_is_destination() {
        let event = FsEvent::rename(PathBuf::from("/a"), PathBuf::from("/b"));
        assert_eq!(event.path(), &PathBuf::from("/b"));
        assert!(event.kind.is_rename());
    }
}
