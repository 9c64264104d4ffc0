//! Debounced translation of filesystem events into mirror operations.
//!
//! Every event for a path records a new pending entry and schedules a
//! one-shot timer. When the timer fires it only acts if its entry is still
//! the latest for that path, so a burst of writes collapses into a single
//! operation against the final state of the file.
//!
//! File removals and paired renames are applied immediately.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use crate::engine::{MirrorEngine, SyncStats};
use crate::error::Result;
use crate::event::{EntryKind, MirrorEvent, MirrorEventKind};

/// Operations the router drives on a mirror.
///
/// [`MirrorEngine`] is the production implementation.
pub trait MirrorSink: Send + Sync + 'static {
    /// Root the incoming event paths are relative to.
    fn source_root(&self) -> &Path;

    /// Full reconciliation of the tree.
    fn sync_all(&self) -> SyncStats;

    /// Mirror a single source file.
    fn sync_file(&self, source_path: &Path) -> Result<bool>;

    /// Mirror every file under a source directory.
    fn sync_directory(&self, source_dir: &Path) -> Result<SyncStats>;

    /// Remove a mirrored path, recursively for directories.
    fn delete_file(&self, relative: &Path) -> Result<bool>;

    /// Rename a mirrored path inside the target tree.
    fn move_path(&self, old_relative: &Path, new_relative: &Path) -> Result<bool>;
}

impl MirrorSink for MirrorEngine {
    fn source_root(&self) -> &Path {
        MirrorEngine::source_root(self)
    }

    fn sync_all(&self) -> SyncStats {
        MirrorEngine::sync_all(self)
    }

    fn sync_file(&self, source_path: &Path) -> Result<bool> {
        MirrorEngine::sync_file(self, source_path)
    }

    fn sync_directory(&self, source_dir: &Path) -> Result<SyncStats> {
        MirrorEngine::sync_directory(self, source_dir)
    }

    fn delete_file(&self, relative: &Path) -> Result<bool> {
        MirrorEngine::delete_file(self, relative)
    }

    fn move_path(&self, old_relative: &Path, new_relative: &Path) -> Result<bool> {
        MirrorEngine::move_path(self, old_relative, new_relative)
    }
}

/// Latest event seen for a path still inside its debounce window.
#[derive(Debug, Clone)]
pub struct PendingEvent {
    /// Path relative to the watched root.
    pub relative_path: PathBuf,

    /// When the event arrived.
    pub observed_at: Instant,

    seq: u64,
}

/// A unit of work applied to the sink on a blocking thread.
#[derive(Debug)]
enum Action {
    /// Bring `relative` in line with whatever is in source now.
    Settle { path: PathBuf, relative: PathBuf },

    /// Remove the mirrored copy.
    Delete { relative: PathBuf },

    /// Paired rename inside the watched root.
    Move { from: PathBuf, to: PathBuf },

    /// Full reconciliation.
    Rescan,
}

/// Routes events for one watched root into a [`MirrorSink`].
pub struct ChangeRouter<S> {
    sink: Arc<S>,
    debounce: Duration,
    /// Canonical form of the root, since some platforms report resolved paths.
    canonical_root: Option<PathBuf>,
    pending: Arc<Mutex<HashMap<PathBuf, PendingEvent>>>,
    next_seq: Arc<AtomicU64>,
}

impl<S> Clone for ChangeRouter<S> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            debounce: self.debounce,
            canonical_root: self.canonical_root.clone(),
            pending: Arc::clone(&self.pending),
            next_seq: Arc::clone(&self.next_seq),
        }
    }
}

impl<S: MirrorSink> ChangeRouter<S> {
    /// Create a router with the given debounce delay.
    pub fn new(sink: Arc<S>, debounce: Duration) -> Self {
        let canonical_root = fs::canonicalize(sink.source_root()).ok();
        Self {
            sink,
            debounce,
            canonical_root,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn sink(&self) -> &Arc<S> {
        &self.sink
    }

    /// Number of paths still waiting out their debounce window.
    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Consume events until the sender side is dropped.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<MirrorEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
        debug!(
            "Event stream closed for {}",
            self.sink.source_root().display()
        );
    }

    /// Route one event.
    pub async fn handle(&self, event: MirrorEvent) {
        match event.kind {
            MirrorEventKind::Rescan => {
                info!(
                    "Rescan requested for {}",
                    self.sink.source_root().display()
                );
                self.dispatch(Action::Rescan).await;
            }
            MirrorEventKind::Moved => {
                let Some(dest) = event.dest else {
                    return;
                };
                match (self.relative(&event.path), self.relative(&dest)) {
                    (Some(from), Some(to)) => self.dispatch(Action::Move { from, to }).await,
                    (Some(from), None) => self.remove(from).await,
                    (None, Some(_)) => self.schedule(&dest).await,
                    (None, None) => {}
                }
            }
            MirrorEventKind::Removed if event.entry != EntryKind::Directory => {
                if let Some(relative) = self.relative(&event.path) {
                    self.remove(relative).await;
                }
            }
            MirrorEventKind::Modified if event.is_directory() => {}
            _ => self.schedule(&event.path).await,
        }
    }

    /// Path relative to the watched root, or `None` if it lies outside.
    fn relative(&self, path: &Path) -> Option<PathBuf> {
        let relative = path
            .strip_prefix(self.sink.source_root())
            .ok()
            .or_else(|| {
                self.canonical_root
                    .as_deref()
                    .and_then(|root| path.strip_prefix(root).ok())
            });
        if relative.is_none() {
            debug!("Ignoring event outside watched root: {}", path.display());
        }
        relative.map(Path::to_path_buf)
    }

    async fn remove(&self, relative: PathBuf) {
        if relative.as_os_str().is_empty() {
            // The root itself went away.
            self.dispatch(Action::Rescan).await;
        } else {
            self.dispatch(Action::Delete { relative }).await;
        }
    }

    async fn schedule(&self, path: &Path) {
        let Some(relative) = self.relative(path) else {
            return;
        };
        if relative.as_os_str().is_empty() {
            return;
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.pending.lock().await.insert(
            relative.clone(),
            PendingEvent {
                relative_path: relative.clone(),
                observed_at: Instant::now(),
                seq,
            },
        );

        let router = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(router.debounce).await;

            let latest = {
                let mut pending = router.pending.lock().await;
                let superseded = pending.get(&relative).is_none_or(|entry| entry.seq != seq);
                if superseded {
                    None
                } else {
                    pending.remove(&relative)
                }
            };
            let Some(entry) = latest else {
                return;
            };

            debug!(
                "Settling {} after {:?}",
                entry.relative_path.display(),
                entry.observed_at.elapsed()
            );
            let path = router.sink.source_root().join(&relative);
            router.dispatch(Action::Settle { path, relative }).await;
        });
    }

    /// Run an action on the blocking pool. Failures are logged, never retried.
    async fn dispatch(&self, action: Action) {
        let sink = Arc::clone(&self.sink);
        let outcome = tokio::task::spawn_blocking(move || {
            let result = apply(sink.as_ref(), &action);
            (action, result)
        })
        .await;

        match outcome {
            Ok((_, Ok(()))) => {}
            Ok((action, Err(e))) => warn!("Failed to apply {action:?}: {e}"),
            Err(e) => warn!("Change task failed: {e}"),
        }
    }
}

fn apply<S: MirrorSink + ?Sized>(sink: &S, action: &Action) -> Result<()> {
    match action {
        Action::Settle { path, relative } => match fs::metadata(path) {
            Ok(metadata) if metadata.is_dir() => {
                let stats = sink.sync_directory(path)?;
                if stats.errors > 0 {
                    warn!(
                        "{} files under {} failed to sync",
                        stats.errors,
                        relative.display()
                    );
                }
            }
            Ok(_) => {
                sink.sync_file(path)?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                sink.delete_file(relative)?;
            }
            Err(e) => return Err(e.into()),
        },
        Action::Delete { relative } => {
            sink.delete_file(relative)?;
        }
        Action::Move { from, to } => {
            let new_path = sink.source_root().join(to);
            match fs::metadata(&new_path) {
                Ok(metadata) => {
                    if let Err(e) = sink.move_path(from, to) {
                        debug!("Could not rename mirrored {}: {e}", from.display());
                    }
                    if metadata.is_dir() {
                        sink.sync_directory(&new_path)?;
                    } else {
                        sink.sync_file(&new_path)?;
                    }
                    sink.delete_file(from)?;
                }
                Err(_) => {
                    sink.delete_file(from)?;
                }
            }
        }
        Action::Rescan => {
            let stats = sink.sync_all();
            info!(
                "Rescan of {} finished (created: {}, updated: {}, deleted: {}, errors: {})",
                sink.source_root().display(),
                stats.created,
                stats.updated,
                stats.deleted,
                stats.errors
            );
        }
    }
    Ok(())
}
