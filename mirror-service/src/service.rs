//! The calling-layer facade over the supervisor and the record store.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use strm_mirror_core::{
    MirrorEngine, MirrorError, SessionInfo, SyncStats, WatchOptions, WatchSupervisor,
};

use crate::config::ServiceConfig;
use crate::error::{Result, ServiceError};
use crate::records::{RecordStore, SyncRecord, YamlRecordStore, validate_records};

/// How many watches a start request brought up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartSummary {
    pub started: usize,
    pub total: usize,
}

impl StartSummary {
    /// Whether every requested watch is now running.
    pub fn is_complete(&self) -> bool {
        self.started == self.total
    }
}

impl fmt::Display for StartSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "started {} of {} watches", self.started, self.total)
    }
}

/// A record written to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedRecord {
    pub record: SyncRecord,

    /// Whether a live watch for the record was stopped to apply the change.
    pub was_watching: bool,
}

/// Mirror service: record lookup, live watches and one-shot syncs.
///
/// Watches are owned by a [`WatchSupervisor`]; one-shot syncs build a fresh
/// [`MirrorEngine`] per record and run it on a blocking thread.
pub struct MirrorService<R: RecordStore> {
    store: R,
    supervisor: WatchSupervisor,
    redirect_extension: String,
}

impl MirrorService<YamlRecordStore> {
    /// Build a service backed by the YAML records file named in `config`.
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(
            YamlRecordStore::new(&config.records_path),
            config.watch_options(),
            &config.redirect_extension,
        ))
    }

    /// Add a record, or replace the one with the same id.
    ///
    /// A running watch for the record is stopped first and not restarted, so
    /// the next start picks up the new folders.
    pub async fn save_record(&self, mut record: SyncRecord) -> Result<SavedRecord> {
        if record.id.is_empty() {
            record.id = Uuid::new_v4().to_string();
        }
        validate_records(std::slice::from_ref(&record))?;

        let was_watching = self.stop_if_watching(&record.id).await?;
        let record = self.store.upsert(record)?;
        info!("Saved record {}", record.id);
        Ok(SavedRecord {
            record,
            was_watching,
        })
    }

    /// Remove a record, stopping its watch first. Mirrored files are kept.
    pub async fn delete_record(&self, record_id: &str) -> Result<()> {
        self.require(record_id)?;
        self.stop_if_watching(record_id).await?;
        self.store.remove(record_id)?;
        info!("Deleted record {record_id}");
        Ok(())
    }
}

impl<R: RecordStore> MirrorService<R> {
    pub fn new(store: R, options: WatchOptions, redirect_extension: &str) -> Self {
        Self {
            store,
            supervisor: WatchSupervisor::new(options),
            redirect_extension: redirect_extension.to_string(),
        }
    }

    pub fn store(&self) -> &R {
        &self.store
    }

    pub fn supervisor(&self) -> &WatchSupervisor {
        &self.supervisor
    }

    /// Start watching one record, or every configured record when `None`.
    ///
    /// Starting all is best-effort: a record that fails to start is logged and
    /// skipped.
    pub async fn start_watch(&self, record_id: Option<&str>) -> Result<StartSummary> {
        match record_id {
            Some(id) => {
                let record = self.require(id)?;
                self.supervisor
                    .start(&record.id, record.to_rule(&self.redirect_extension))
                    .await?;
                Ok(StartSummary {
                    started: 1,
                    total: 1,
                })
            }
            None => {
                let records = self.store.records()?;
                let mut summary = StartSummary {
                    started: 0,
                    total: records.len(),
                };
                for record in records {
                    match self
                        .supervisor
                        .start(&record.id, record.to_rule(&self.redirect_extension))
                        .await
                    {
                        Ok(()) => summary.started += 1,
                        Err(MirrorError::AlreadyActive(_)) => {
                            debug!("Watch {} already running", record.id);
                            summary.started += 1;
                        }
                        Err(e) => warn!("Failed to start watch {}: {e}", record.id),
                    }
                }
                info!("{summary}");
                Ok(summary)
            }
        }
    }

    /// Stop one watch, or all of them when `None`. Returns how many stopped.
    pub async fn stop_watch(&self, record_id: Option<&str>) -> Result<usize> {
        match record_id {
            Some(id) => {
                self.supervisor.stop(id).await?;
                Ok(1)
            }
            None => Ok(self.supervisor.stop_all().await),
        }
    }

    /// Fully reconcile every configured record and sum the results.
    ///
    /// A record with an invalid rule is skipped and counted as one error.
    pub async fn sync_all_records(&self) -> Result<SyncStats> {
        let mut total = SyncStats::default();
        for record in self.store.records()? {
            match self.sync_once(&record).await {
                Ok(stats) => total += stats,
                Err(ServiceError::Mirror(MirrorError::Validation(reason))) => {
                    warn!("Skipping record {}: {reason}", record.id);
                    total.errors += 1;
                }
                Err(e) => return Err(e),
            }
        }
        info!(
            "Synced all records: {} created, {} updated, {} deleted, {} errors",
            total.created, total.updated, total.deleted, total.errors
        );
        Ok(total)
    }

    /// Fully reconcile one record.
    ///
    /// A watched record syncs through its live session; otherwise a one-shot
    /// engine is built from the stored record.
    pub async fn sync_record(&self, record_id: &str) -> Result<SyncStats> {
        if self.supervisor.is_active(record_id).await {
            match self.supervisor.sync_one(record_id).await {
                Ok(stats) => return Ok(stats),
                // Stopped between the check and the sync.
                Err(MirrorError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        let record = self.require(record_id)?;
        self.sync_once(&record).await
    }

    /// Every configured record id, plus any watched id, mapped to whether it
    /// is being watched.
    pub async fn status(&self) -> Result<BTreeMap<String, bool>> {
        let mut status: BTreeMap<String, bool> = self
            .store
            .records()?
            .into_iter()
            .map(|record| (record.id, false))
            .collect();
        status.extend(self.supervisor.status().await);
        Ok(status)
    }

    /// Details for every live watch.
    pub async fn sessions(&self) -> Vec<SessionInfo> {
        self.supervisor.sessions().await
    }

    /// Stop every watch.
    pub async fn shutdown(&self) {
        let stopped = self.supervisor.stop_all().await;
        info!("Mirror service shut down ({stopped} watches stopped)");
    }

    async fn stop_if_watching(&self, record_id: &str) -> Result<bool> {
        match self.supervisor.stop(record_id).await {
            Ok(()) => Ok(true),
            Err(MirrorError::NotActive(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn require(&self, record_id: &str) -> Result<SyncRecord> {
        self.store
            .record(record_id)?
            .ok_or_else(|| MirrorError::NotFound(record_id.to_string()).into())
    }

    async fn sync_once(&self, record: &SyncRecord) -> Result<SyncStats> {
        let rule = record.to_rule(&self.redirect_extension);
        rule.validate()?;
        let engine = MirrorEngine::new(rule);
        let stats = tokio::task::spawn_blocking(move || engine.sync_all())
            .await
            .map_err(MirrorError::from)?;
        debug!("Synced record {}: {stats:?}", record.id);
        Ok(stats)
    }
}
