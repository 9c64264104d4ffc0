//! Registry of live watch sessions.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{SyncRule, WatchOptions};
use crate::engine::{MirrorEngine, SyncStats};
use crate::error::{MirrorError, Result};
use crate::event::MirrorEvent;
use crate::router::ChangeRouter;

/// Outcome of a full sync run through a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub stats: SyncStats,
    pub finished_at: DateTime<Utc>,
}

/// Public view of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub record_id: String,
    pub rule: SyncRule,
    pub started_at: DateTime<Utc>,
    pub last_sync: Option<SyncReport>,
}

/// One live binding between a source root and its mirror.
struct WatchSession {
    rule: SyncRule,
    engine: Arc<MirrorEngine>,
    watcher: RecommendedWatcher,
    router_task: JoinHandle<()>,
    started_at: DateTime<Utc>,
    last_sync: Option<SyncReport>,
}

impl WatchSession {
    fn info(&self, record_id: &str) -> SessionInfo {
        SessionInfo {
            record_id: record_id.to_string(),
            rule: self.rule.clone(),
            started_at: self.started_at,
            last_sync: self.last_sync,
        }
    }

    /// Stop the platform watch and wait a bounded time for the router.
    async fn shutdown(self, record_id: &str, timeout: Duration) {
        let Self {
            watcher,
            mut router_task,
            ..
        } = self;

        // Dropping the watcher ends the platform thread, which drops the
        // event sender and lets the router drain and exit.
        drop(watcher);

        match tokio::time::timeout(timeout, &mut router_task).await {
            Ok(Ok(())) => debug!("Watch {record_id} stopped"),
            Ok(Err(e)) => warn!("Router for {record_id} ended abnormally: {e}"),
            Err(_) => {
                warn!("Watch {record_id} did not stop within {timeout:?}");
                router_task.abort();
            }
        }
    }
}

/// Manages watch sessions keyed by record id.
///
/// The registry lock is only held to insert or remove entries. Starting the
/// platform watch, tearing it down and running syncs all happen outside it.
pub struct WatchSupervisor {
    sessions: Mutex<HashMap<String, WatchSession>>,
    options: WatchOptions,
}

impl WatchSupervisor {
    /// Create a supervisor.
    pub fn new(options: WatchOptions) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            options,
        }
    }

    pub fn options(&self) -> &WatchOptions {
        &self.options
    }

    /// Start watching `rule.source_root` for `record_id`.
    pub async fn start(&self, record_id: &str, rule: SyncRule) -> Result<()> {
        rule.validate()?;
        if self.is_active(record_id).await {
            return Err(MirrorError::AlreadyActive(record_id.to_string()));
        }
        if !rule.source_root.is_dir() {
            return Err(MirrorError::SourceMissing(rule.source_root.clone()));
        }

        let engine = Arc::new(MirrorEngine::new(rule.clone()));
        let router = ChangeRouter::new(Arc::clone(&engine), self.options.debounce);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let label = record_id.to_string();
        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    for event in MirrorEvent::from_notify(event) {
                        if event_tx.send(event).is_err() {
                            debug!("Router for {label} is gone, dropping events");
                            return;
                        }
                    }
                }
                Err(e) => error!("Watch error for {label}: {e}"),
            },
        )?;
        watcher.watch(&rule.source_root, RecursiveMode::Recursive)?;
        let router_task = tokio::spawn(router.run(event_rx));

        let session = WatchSession {
            rule,
            engine,
            watcher,
            router_task,
            started_at: Utc::now(),
            last_sync: None,
        };

        let rejected = {
            let mut sessions = self.sessions.lock().await;
            if sessions.contains_key(record_id) {
                Some(session)
            } else {
                sessions.insert(record_id.to_string(), session);
                None
            }
        };

        if let Some(session) = rejected {
            // Lost a race with a concurrent start for the same id.
            session.shutdown(record_id, self.options.stop_timeout).await;
            return Err(MirrorError::AlreadyActive(record_id.to_string()));
        }

        info!("Started watch {record_id}");
        Ok(())
    }

    /// Stop the session for `record_id`.
    pub async fn stop(&self, record_id: &str) -> Result<()> {
        let session = self
            .sessions
            .lock()
            .await
            .remove(record_id)
            .ok_or_else(|| MirrorError::NotActive(record_id.to_string()))?;

        session.shutdown(record_id, self.options.stop_timeout).await;
        info!("Stopped watch {record_id}");
        Ok(())
    }

    /// Stop every session. Returns how many were running.
    pub async fn stop_all(&self) -> usize {
        let drained: Vec<(String, WatchSession)> = self.sessions.lock().await.drain().collect();
        let count = drained.len();

        for (record_id, session) in drained {
            session
                .shutdown(&record_id, self.options.stop_all_timeout)
                .await;
        }

        if count > 0 {
            info!("Stopped {count} watches");
        }
        count
    }

    /// Active record ids, each mapped to `true`.
    pub async fn status(&self) -> BTreeMap<String, bool> {
        self.sessions
            .lock()
            .await
            .keys()
            .map(|id| (id.clone(), true))
            .collect()
    }

    pub async fn is_active(&self, record_id: &str) -> bool {
        self.sessions.lock().await.contains_key(record_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Details for every running session.
    pub async fn sessions(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.lock().await;
        let mut infos: Vec<SessionInfo> = sessions
            .iter()
            .map(|(id, session)| session.info(id))
            .collect();
        infos.sort_by_key(|info| info.record_id.clone());
        infos
    }

    /// Run a full sync through the session's engine while the watch keeps running.
    pub async fn sync_one(&self, record_id: &str) -> Result<SyncStats> {
        let engine = self
            .sessions
            .lock()
            .await
            .get(record_id)
            .map(|session| Arc::clone(&session.engine))
            .ok_or_else(|| MirrorError::NotFound(record_id.to_string()))?;

        let stats = tokio::task::spawn_blocking(move || engine.sync_all()).await?;

        if let Some(session) = self.sessions.lock().await.get_mut(record_id) {
            session.last_sync = Some(SyncReport {
                stats,
                finished_at: Utc::now(),
            });
        }
        Ok(stats)
    }
}

impl Default for WatchSupervisor {
    fn default() -> Self {
        Self::new(WatchOptions::default())
    }
}
