use crate::debounce::Debouncer;
use crate::error::{Result, WatcherError};
use crate::event::{FsEvent, RawEventKind, RawNotifyEvent, RenameHalf};
use futures::Stream;
use notify::{RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Watcher tuning
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Quiet period a path needs before its events are released
    pub debounce: Duration,
    /// How often pending paths are checked
    pub tick: Duration,
    /// Capacity of the raw and output channels
    pub channel_capacity: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            tick: Duration::from_millis(100),
            channel_capacity: 1024,
        }
    }
}

/// Entry point for recursive watches
pub struct FsWatcher;

impl FsWatcher {
    /// Start watching `root` recursively.
    ///
    /// The returned stream ends when `cancel` fires; anything still being
    /// debounced is flushed first.
    pub fn watch(
        root: impl AsRef<Path>,
        config: WatcherConfig,
        cancel: CancellationToken,
    ) -> Result<FsEventStream> {
        let root = root.as_ref().to_path_buf();
        if !root.exists() {
            return Err(WatcherError::PathNotFound(root));
        }
        if !root.is_dir() {
            return Err(WatcherError::NotADirectory(root));
        }

        let (raw_tx, mut raw_rx) = mpsc::channel::<RawNotifyEvent>(config.channel_capacity);

        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    let raw = resolve_rename_half(RawNotifyEvent::from_notify(event));
                    // Runs on the backend's own thread, blocking here is backpressure
                    if raw_tx.blocking_send(raw).is_err() {
                        trace!("Watcher stream closed, dropping raw event");
                    }
                }
                Err(e) => warn!("Notify backend error: {}", e),
            })?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|source| WatcherError::Watch {
                path: root.clone(),
                source,
            })?;

        info!("Watching {}", root.display());

        let (tx, rx) = mpsc::channel(config.channel_capacity);

        let task = tokio::spawn(async move {
            // The watcher must live as long as the task
            let _watcher = watcher;
            let mut debouncer = Debouncer::new(config.debounce);
            let mut ticker = interval(config.tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                let ready = tokio::select! {
                    _ = cancel.cancelled() => break,
                    raw = raw_rx.recv() => match raw {
                        Some(raw) => debouncer.push(raw, Instant::now()),
                        None => {
                            error!("Notify callback channel closed unexpectedly");
                            break;
                        }
                    },
                    _ = ticker.tick() => debouncer.tick(Instant::now()),
                };

                for event in ready {
                    if tx.send(event).await.is_err() {
                        debug!("Event stream receiver dropped, stopping watcher");
                        return;
                    }
                }
            }

            for event in debouncer.flush_all() {
                if tx.send(event).await.is_err() {
                    break;
                }
            }

            debug!("Watcher task finished");
        });

        Ok(FsEventStream {
            root,
            task,
            receiver: rx,
        })
    }
}

/// Some backends report lone rename halves without saying which side they are
fn resolve_rename_half(mut raw: RawNotifyEvent) -> RawNotifyEvent {
    if raw.kind == RawEventKind::Rename(RenameHalf::Unknown) && raw.paths.len() == 1 {
        let half = if raw.paths[0].exists() {
            RenameHalf::To
        } else {
            RenameHalf::From
        };
        raw.kind = RawEventKind::Rename(half);
    }
    raw
}

/// Debounced events of one watched tree.
///
/// Dropping the stream stops the watch.
pub struct FsEventStream {
    root: PathBuf,
    task: JoinHandle<()>,
    receiver: mpsc::Receiver<FsEvent>,
}

impl FsEventStream {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn recv(&mut self) -> Option<FsEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<FsEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for FsEventStream {
    type Item = FsEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for FsEventStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tempfile::TempDir;
    use tokio::time::timeout;
    use tracing_test::traced_test;

    fn fast_config() -> WatcherConfig {
        WatcherConfig {
            debounce: Duration::from_millis(100),
            tick: Duration::from_millis(20),
            channel_capacity: 64,
        }
    }

    #[tokio::test]
    async fn test_missing_root_is_rejected() {
        let result = FsWatcher::watch(
            "/definitely/not/here",
            WatcherConfig::default(),
            CancellationToken::new(),
        );
        assert!(matches!(result, Err(WatcherError::PathNotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[traced_test]
    async fn test_create_is_reported_once() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let cancel = CancellationToken::new();
        let mut stream = FsWatcher::watch(&root, fast_config(), cancel.clone()).unwrap();

        tokio::fs::write(root.join("movie.mp4"), b"frames").await.unwrap();

        let event = timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("no event within timeout")
            .expect("stream ended");

        assert_eq!(event.path().file_name().unwrap(), "movie.mp4");
        assert!(event.kind.is_create());
        assert!(logs_contain("Watching"));

        cancel.cancel();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_ends_stream() {
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        let mut stream = FsWatcher::watch(dir.path(), fast_config(), cancel.clone()).unwrap();

        cancel.cancel();

        let end = timeout(Duration::from_secs(5), async {
            while stream.recv().await.is_some() {}
        })
        .await;
        assert!(end.is_ok());
    }

    #[test]
    fn test_unknown_half_resolves_by_existence() {
        let dir = TempDir::new().unwrap();
        let present = RawNotifyEvent {
            kind: RawEventKind::Rename(RenameHalf::Unknown),
            paths: vec![dir.path().to_path_buf()],
            timestamp: std::time::SystemTime::now(),
        };
        assert_eq!(
            resolve_rename_half(present).kind,
            RawEventKind::Rename(RenameHalf::To)
        );

        let gone = RawNotifyEvent {
            kind: RawEventKind::Rename(RenameHalf::Unknown),
            paths: vec![dir.path().join("gone")],
            timestamp: std::time::SystemTime::now(),
        };
        assert_eq!(
            resolve_rename_half(gone).kind,
            RawEventKind::Rename(RenameHalf::From)
        );
    }
}
