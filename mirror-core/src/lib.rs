//! # Mirror Core
//!
//! Mirrors a source directory tree onto a target tree. Redirect files
//! (`.strm` by default) have the first occurrence of a search string
//! replaced; every other file is copied byte for byte.
//!
//! ## Features
//!
//! - **Full Reconciliation**: Diff both trees, create/update/delete files and prune
//!   orphan directories
//! - **Live Watching**: Recursive platform watches per record
//! - **Debouncing**: Bursts of events for a path collapse into one operation
//! - **Session Registry**: Start, stop and query many watches concurrently
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Mirror Core                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  WatchSupervisor ──► notify watch ──► MirrorEvent               │
//! │       │                                   │                     │
//! │       ▼                                   ▼                     │
//! │  MirrorEngine ◄──────────────────── ChangeRouter                │
//! │       │                                                         │
//! │       ▼                                                         │
//! │  rewrite_first                                                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod rewrite;
pub mod router;
pub mod supervisor;

pub use config::{DEFAULT_REDIRECT_EXTENSION, SyncRule, WatchOptions};
pub use engine::{FileOutcome, MirrorEngine, SyncStats};
pub use error::{MirrorError, Result};
pub use event::{EntryKind, MirrorEvent, MirrorEventKind};
pub use rewrite::{rewrite_bytes, rewrite_first};
pub use router::{ChangeRouter, MirrorSink, PendingEvent};
pub use supervisor::{SessionInfo, SyncReport, WatchSupervisor};
