//! File system watcher with debouncing and busy backoff.
//!
//! Platform events from `notify` are coalesced per path inside a debounce
//! window (default 500 ms), reduced to created/modified/removed by checking
//! the path's existence after the window closes (a rename surfaces as the
//! old path vanishing and the new path appearing), and turned into
//! `index_single` / delete calls on the owning container.
//!
//! When the indexer reports `Busy`, the event is requeued with exponential
//! backoff up to a cap (default 8 s) and then dropped; the periodic rescan
//! recovers anything that slipped through.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify_debouncer_mini::{new_debouncer, notify::RecursiveMode};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::engine::Engine;
use crate::error::{FathomError, FathomResult};
use crate::types::FsEvent;

/// Initial delay for the busy-backoff requeue.
const BACKOFF_INITIAL: Duration = Duration::from_millis(500);

/// Handle to a running watcher. Dropping it (or calling `stop`) shuts the
/// loop down; the debouncer thread stops with it.
pub struct Watcher {
    cancel: CancellationToken,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl Watcher {
    /// Watch every root of the named container, driving incremental updates
    /// through the engine.
    pub fn spawn(engine: Arc<Engine>, container: &str) -> FathomResult<Self> {
        let meta = engine.container_meta(Some(container))?;
        if meta.roots.is_empty() {
            return Err(FathomError::BadInput {
                details: format!("container '{}' has no indexed roots to watch", meta.name),
            });
        }

        let debounce = Duration::from_millis(engine.config().watcher.debounce_ms);
        let backoff_cap = Duration::from_millis(engine.config().watcher.backoff_cap_ms);
        let rescan_interval = Duration::from_secs(engine.config().watcher.rescan_interval_secs);

        let (event_tx, event_rx) = mpsc::channel::<Vec<PathBuf>>(256);
        let cancel = CancellationToken::new();

        // The notify debouncer delivers on its own thread through a std
        // channel; bridge batches into the async loop.
        let (std_tx, std_rx) = std::sync::mpsc::channel();
        let mut debouncer = new_debouncer(debounce, std_tx).map_err(|e| {
            FathomError::Internal(format!("failed to create file watcher: {e}"))
        })?;
        for root in &meta.roots {
            debouncer
                .watcher()
                .watch(root, RecursiveMode::Recursive)
                .map_err(|e| FathomError::Internal(format!(
                    "failed to watch {}: {e}",
                    root.display()
                )))?;
        }

        let bridge_cancel = cancel.clone();
        std::thread::spawn(move || {
            // Owning the debouncer here ties its lifetime to the bridge.
            let _debouncer = debouncer;
            while !bridge_cancel.is_cancelled() {
                match std_rx.recv_timeout(Duration::from_millis(200)) {
                    Ok(Ok(events)) => {
                        let paths: Vec<PathBuf> =
                            events.into_iter().map(|e| e.path).collect();
                        if event_tx.blocking_send(paths).is_err() {
                            break;
                        }
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "file watcher error");
                    }
                    Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                    Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        let loop_cancel = cancel.clone();
        let container = meta.name.clone();
        let handle = tokio::spawn(async move {
            event_loop(
                engine,
                container,
                event_rx,
                loop_cancel,
                backoff_cap,
                rescan_interval,
            )
            .await;
        });

        tracing::info!(container = %meta.name, roots = meta.roots.len(), "file watcher started");

        Ok(Self {
            cancel,
            handle: Some(handle),
        })
    }

    /// Stop the watcher and wait for its loop to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Reduce a debounced path to an `FsEvent` by probing the filesystem.
/// Renames arrive as two paths: the old one reduces to `Removed`, the new
/// one to `Created`.
fn reduce(path: PathBuf, known_to_index: bool) -> FsEvent {
    if path.exists() {
        if known_to_index {
            FsEvent::Modified(path)
        } else {
            FsEvent::Created(path)
        }
    } else {
        FsEvent::Removed(path)
    }
}

async fn event_loop(
    engine: Arc<Engine>,
    container: String,
    mut events: mpsc::Receiver<Vec<PathBuf>>,
    cancel: CancellationToken,
    backoff_cap: Duration,
    rescan_interval: Duration,
) {
    let mut rescan = tokio::time::interval(rescan_interval);
    rescan.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    rescan.reset();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = rescan.tick() => {
                // Recovery path for events dropped under backpressure.
                match engine.reindex_delta(Some(container.as_str())).await {
                    Ok(summary) if summary.files_indexed + summary.files_deleted > 0 => {
                        tracing::debug!(
                            indexed = summary.files_indexed,
                            deleted = summary.files_deleted,
                            "periodic rescan applied changes"
                        );
                    }
                    Ok(_) => {}
                    Err(FathomError::Busy { .. }) => {}
                    Err(e) => tracing::warn!(error = %e, "periodic rescan failed"),
                }
            }
            batch = events.recv() => {
                let Some(paths) = batch else { break };
                for path in paths {
                    if cancel.is_cancelled() {
                        return;
                    }
                    handle_path(&engine, &container, path, backoff_cap).await;
                }
            }
        }
    }

    tracing::info!(container = %container, "file watcher stopped");
}

/// Apply one debounced path change, retrying `Busy` with exponential
/// backoff until the cap, then dropping the event.
async fn handle_path(engine: &Arc<Engine>, container: &str, path: PathBuf, backoff_cap: Duration) {
    if !engine.path_under_container_roots(container, &path) {
        return;
    }

    let known = engine.has_file_record(container, &path);
    let event = reduce(path, known);

    let mut delay = BACKOFF_INITIAL;
    loop {
        let result = match &event {
            FsEvent::Created(path) | FsEvent::Modified(path) => {
                engine.index_single(Some(container), path).await.map(|_| ())
            }
            FsEvent::Removed(path) => engine
                .delete_path(Some(container), path)
                .await
                .map(|_| ()),
            FsEvent::Renamed { from, to } => {
                let removed = engine.delete_path(Some(container), from).await.map(|_| ());
                match removed {
                    Ok(()) => engine.index_single(Some(container), to).await.map(|_| ()),
                    Err(e) => Err(e),
                }
            }
        };

        match result {
            Ok(()) => return,
            Err(FathomError::Busy { .. }) => {
                if delay > backoff_cap {
                    tracing::debug!(event = ?event, "dropping event after backoff cap; rescan will recover it");
                    return;
                }
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => {
                tracing::warn!(event = ?event, error = %e, "watcher update failed");
                return;
            }
        }
    }
}
