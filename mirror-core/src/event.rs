//! Filesystem events as seen by the change router.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::EventKind;
use serde::{Deserialize, Serialize};

/// A filesystem change under a watched root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorEvent {
    /// The kind of change.
    pub kind: MirrorEventKind,

    /// Affected path. For moves, the old location.
    pub path: PathBuf,

    /// New location, for moves only.
    pub dest: Option<PathBuf>,

    /// What the path refers to, if known.
    pub entry: EntryKind,

    /// When the event was received.
    pub timestamp: DateTime<Utc>,
}

impl MirrorEvent {
    /// Create a new event.
    pub fn new(kind: MirrorEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            dest: None,
            entry: EntryKind::Unknown,
            timestamp: Utc::now(),
        }
    }

    /// A paired rename from `from` to `to`.
    pub fn moved(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        let mut event = Self::new(MirrorEventKind::Moved, from);
        event.dest = Some(to.into());
        event
    }

    /// Set the entry kind.
    pub fn with_entry(mut self, entry: EntryKind) -> Self {
        self.entry = entry;
        self
    }

    /// Check if this event is known to concern a directory.
    pub fn is_directory(&self) -> bool {
        self.entry == EntryKind::Directory
    }

    /// Translate a raw notify event. Access events produce nothing.
    pub fn from_notify(event: notify::Event) -> Vec<Self> {
        let mut out = Vec::new();
        if event.need_rescan() {
            out.push(Self::new(MirrorEventKind::Rescan, PathBuf::new()));
        }

        let kind = match event.kind {
            EventKind::Create(create) => {
                let hint = match create {
                    CreateKind::File => Some(EntryKind::File),
                    CreateKind::Folder => Some(EntryKind::Directory),
                    _ => None,
                };
                return out
                    .into_iter()
                    .chain(event.paths.into_iter().map(|path| {
                        let entry = hint.unwrap_or_else(|| EntryKind::probe(&path));
                        Self::new(MirrorEventKind::Created, path).with_entry(entry)
                    }))
                    .collect();
            }
            EventKind::Remove(remove) => {
                let entry = match remove {
                    RemoveKind::File => EntryKind::File,
                    RemoveKind::Folder => EntryKind::Directory,
                    _ => EntryKind::Unknown,
                };
                return out
                    .into_iter()
                    .chain(event.paths.into_iter().map(|path| {
                        Self::new(MirrorEventKind::Removed, path).with_entry(entry)
                    }))
                    .collect();
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
                let mut paths = event.paths.into_iter();
                if let (Some(from), Some(to)) = (paths.next(), paths.next()) {
                    let entry = EntryKind::probe(&to);
                    out.push(Self::moved(from, to).with_entry(entry));
                }
                return out;
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => MirrorEventKind::RenamedFrom,
            EventKind::Modify(ModifyKind::Name(_)) => MirrorEventKind::RenamedTo,
            EventKind::Modify(_) | EventKind::Any => MirrorEventKind::Modified,
            EventKind::Access(_) | EventKind::Other => return out,
        };

        out.extend(event.paths.into_iter().map(|path| {
            let entry = EntryKind::probe(&path);
            Self::new(kind, path).with_entry(entry)
        }));
        out
    }
}

/// Kind of change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorEventKind {
    /// Path was created.
    Created,

    /// File content or metadata changed.
    Modified,

    /// Path was removed.
    Removed,

    /// Old half of an unpaired rename.
    RenamedFrom,

    /// New half of an unpaired rename, or a rename of unknown direction.
    RenamedTo,

    /// Paired rename; `dest` holds the new path.
    Moved,

    /// The platform dropped events; the tree must be rescanned.
    Rescan,
}

/// What a path refers to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Directory,
    #[default]
    Unknown,
}

impl EntryKind {
    /// Inspect the filesystem. Missing paths are `Unknown`.
    pub fn probe(path: &Path) -> Self {
        match path.metadata() {
            Ok(m) if m.is_dir() => Self::Directory,
            Ok(_) => Self::File,
            Err(_) => Self::Unknown,
        }
    }
}
