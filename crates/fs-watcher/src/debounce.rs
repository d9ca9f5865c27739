//! Per-path debouncing of raw notifications
//!
//! Bursts of events on one path inside the debounce window collapse into a
//! single observation. Entries are released on `tick` once the path has been
//! quiet for the whole window.

use crate::event::{FsEvent, RawEventKind, RawNotifyEvent, RenameHalf};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Observed {
    Create,
    Modify,
    Remove,
}

#[derive(Debug)]
struct Pending {
    first: Observed,
    last: Observed,
    seq: u64,
    last_seen: Instant,
}

impl Pending {
    /// Collapse the first and last observation into the event to emit, if any
    fn resolve(&self) -> Option<Observed> {
        use Observed::*;
        match (self.first, self.last) {
            (Create, Remove) => None,
            (Create, _) => Some(Create),
            (_, Remove) => Some(Remove),
            _ => Some(Modify),
        }
    }
}

/// Buffers raw events per path until they stabilize
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: HashMap<PathBuf, Pending>,
    /// Lone rename halves waiting for their partner
    halves: HashMap<PathBuf, (RenameHalf, u64, Instant)>,
    next_seq: u64,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
            halves: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.halves.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len() + self.halves.len()
    }

    /// Feed one raw event. Returns events that must be emitted right away
    /// (renames and whatever was pending on the renamed paths).
    pub fn push(&mut self, event: RawNotifyEvent, now: Instant) -> Vec<FsEvent> {
        let Some(path) = event.primary_path().cloned() else {
            return vec![];
        };

        match event.kind {
            RawEventKind::Create => {
                self.record(path, Observed::Create, now);
                vec![]
            }
            RawEventKind::Modify => {
                self.record(path, Observed::Modify, now);
                vec![]
            }
            RawEventKind::Remove => {
                self.record(path, Observed::Remove, now);
                vec![]
            }
            RawEventKind::Rename(RenameHalf::Both) if event.paths.len() >= 2 => {
                self.rename(event.paths[0].clone(), event.paths[1].clone(), now)
            }
            RawEventKind::Rename(half @ (RenameHalf::From | RenameHalf::To)) => {
                let seq = self.bump();
                self.halves.insert(path, (half, seq, now));
                vec![]
            }
            RawEventKind::Rename(_) => {
                // Incomplete rename, treat as modify
                self.record(path, Observed::Modify, now);
                vec![]
            }
            RawEventKind::Other(ref kind) => {
                trace!("Ignoring unknown event kind: {}", kind);
                vec![]
            }
        }
    }

    /// Release every path that has been quiet for the debounce window
    pub fn tick(&mut self, now: Instant) -> Vec<FsEvent> {
        // Unpaired rename halves degrade to plain removes/creates
        let stale_halves = self
            .halves
            .iter()
            .filter(|(_, (_, _, seen))| now.duration_since(*seen) >= self.window)
            .map(|(path, _)| path.clone())
            .collect::<Vec<_>>();

        for path in stale_halves {
            if let Some((half, _, seen)) = self.halves.remove(&path) {
                let observed = match half {
                    RenameHalf::From => Observed::Remove,
                    _ => Observed::Create,
                };
                self.record(path, observed, seen);
            }
        }

        let mut ready = self
            .pending
            .iter()
            .filter(|(_, pending)| now.duration_since(pending.last_seen) >= self.window)
            .map(|(path, pending)| (pending.seq, path.clone()))
            .collect::<Vec<_>>();
        ready.sort();

        ready
            .into_iter()
            .filter_map(|(_, path)| self.release(path))
            .collect()
    }

    /// Drain everything regardless of age, in first-seen order
    pub fn flush_all(&mut self) -> Vec<FsEvent> {
        let halves = std::mem::take(&mut self.halves);
        for (path, (half, _, seen)) in halves {
            let observed = match half {
                RenameHalf::From => Observed::Remove,
                _ => Observed::Create,
            };
            self.record(path, observed, seen);
        }

        let mut all = self
            .pending
            .iter()
            .map(|(path, pending)| (pending.seq, path.clone()))
            .collect::<Vec<_>>();
        all.sort();

        all.into_iter()
            .filter_map(|(_, path)| self.release(path))
            .collect()
    }

    fn bump(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn record(&mut self, path: PathBuf, observed: Observed, now: Instant) {
        if let Some(pending) = self.pending.get_mut(&path) {
            pending.last = observed;
            pending.last_seen = now;
            return;
        }

        let seq = self.bump();
        self.pending.insert(
            path,
            Pending {
                first: observed,
                last: observed,
                seq,
                last_seen: now,
            },
        );
    }

    fn release(&mut self, path: PathBuf) -> Option<FsEvent> {
        let pending = self.pending.remove(&path)?;
        let event = match pending.resolve()? {
            Observed::Create => FsEvent::create(path),
            Observed::Modify => FsEvent::modify(path),
            Observed::Remove => FsEvent::remove(path),
        };
        trace!("Releasing debounced event: {:?}", event.kind);
        Some(event)
    }

    fn rename(&mut self, from: PathBuf, to: PathBuf, now: Instant) -> Vec<FsEvent> {
        // The paired halves were already reported separately by some backends
        self.halves.remove(&from);
        self.halves.remove(&to);

        let mut events = Vec::new();

        if let Some(pending) = self.pending.remove(&from) {
            if pending.first == Observed::Create {
                // Created and renamed within the window: only the final name matters
                if let Some(stale) = self.release(to.clone()) {
                    events.push(stale);
                }
                self.pending.insert(
                    to,
                    Pending {
                        first: Observed::Create,
                        last: Observed::Create,
                        seq: pending.seq,
                        last_seen: now,
                    },
                );
                return events;
            }

            self.pending.insert(from.clone(), pending);
            if let Some(flushed) = self.release(from.clone()) {
                events.push(flushed);
            }
        }

        if let Some(flushed) = self.release(to.clone()) {
            events.push(flushed);
        }

        events.push(FsEvent::rename(from, to));
        events
    }
}
