//! # Mirror Service
//!
//! Runs [`strm_mirror_core`] against a set of configured records:
//!
//! - **Records**: source/target pairs with an optional redirect rewrite,
//!   read from a YAML file
//! - **Service**: start/stop live watches, one-shot syncs, status
//! - **Config**: timing and file locations, read from TOML
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐    ┌──────────────────┐    ┌──────────────────┐
//! │ RecordStore  │───▶│  MirrorService   │───▶│ WatchSupervisor  │
//! │ (YAML file)  │    │  start / stop /  │    │  live sessions   │
//! └──────────────┘    │  sync / status   │    └──────────────────┘
//!                     │                  │    ┌──────────────────┐
//!                     │                  │───▶│  MirrorEngine    │
//!                     └──────────────────┘    │  one-shot syncs  │
//!                                             └──────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use strm_mirror_service::{MirrorService, ServiceConfig};
//!
//! let config = ServiceConfig::load_or_default(&ServiceConfig::default_path())?;
//! let service = MirrorService::from_config(&config)?;
//!
//! let stats = service.sync_all_records().await?;
//! service.start_watch(None).await?;
//! ```

pub mod config;
pub mod error;
pub mod records;
pub mod service;

pub use config::ServiceConfig;
pub use error::{Result, ServiceError};
pub use records::{RecordStore, StaticRecords, SyncRecord, YamlRecordStore, validate_records};
pub use service::{MirrorService, SavedRecord, StartSummary};

// Re-export from the core for convenience
pub use strm_mirror_core::{MirrorError, SessionInfo, SyncStats, WatchOptions};
