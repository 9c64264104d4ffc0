//! Tree reconciliation between a source root and its mirror.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::ops::AddAssign;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::SyncRule;
use crate::error::{MirrorError, Result};
use crate::rewrite::rewrite_bytes;

/// Counters produced by one reconciliation call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Files written where the target had none.
    pub created: usize,

    /// Files rewritten over an existing target file.
    pub updated: usize,

    /// Target files removed.
    pub deleted: usize,

    /// Paths that failed and were skipped.
    pub errors: usize,
}

impl SyncStats {
    /// Total number of mutations applied to the target.
    pub fn changes(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

impl AddAssign for SyncStats {
    fn add_assign(&mut self, other: Self) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.errors += other.errors;
    }
}

/// What mirroring a single file did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Files and directories found under one root, keyed by relative path.
#[derive(Debug, Default)]
struct TreeSnapshot {
    files: BTreeMap<PathBuf, PathBuf>,
    dirs: BTreeSet<PathBuf>,
    /// False if any entry could not be read.
    complete: bool,
}

impl TreeSnapshot {
    fn scan(root: &Path) -> Self {
        let mut snapshot = Self {
            complete: true,
            ..Default::default()
        };
        if !root.is_dir() {
            return snapshot;
        }

        for entry in WalkDir::new(root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Failed to read entry under {}: {e}", root.display());
                    snapshot.complete = false;
                    continue;
                }
            };
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            let relative = relative.to_path_buf();

            if entry.file_type().is_dir() {
                snapshot.dirs.insert(relative);
            } else if entry.path().is_file() {
                snapshot.files.insert(relative, entry.path().to_path_buf());
            }
        }

        snapshot
    }
}

/// Applies one [`SyncRule`] to the filesystem.
///
/// The engine holds no state beyond its rule; every call re-reads both trees.
#[derive(Debug, Clone)]
pub struct MirrorEngine {
    rule: SyncRule,
}

impl MirrorEngine {
    /// Create an engine for a rule.
    pub fn new(rule: SyncRule) -> Self {
        Self { rule }
    }

    /// The rule this engine applies.
    pub fn rule(&self) -> &SyncRule {
        &self.rule
    }

    pub fn source_root(&self) -> &Path {
        &self.rule.source_root
    }

    pub fn target_root(&self) -> &Path {
        &self.rule.target_root
    }

    /// Make the target tree mirror the source tree.
    ///
    /// Per-path failures are counted in `errors` and do not stop the pass.
    /// If the source root is gone the whole target tree is removed.
    pub fn sync_all(&self) -> SyncStats {
        let start = Instant::now();
        let mut stats = SyncStats::default();
        let source_root = self.source_root();
        let target_root = self.target_root();

        if !source_root.exists() {
            if target_root.exists() {
                match remove_tree(target_root) {
                    Ok(removed) => stats.deleted += removed,
                    Err(e) => {
                        warn!("Failed to delete target {}: {e}", target_root.display());
                        stats.errors += 1;
                    }
                }
            }
            info!(
                "Source {} missing, removed {} mirrored files",
                source_root.display(),
                stats.deleted
            );
            return stats;
        }

        let source = TreeSnapshot::scan(source_root);
        let target = TreeSnapshot::scan(target_root);

        if !source.complete {
            // An unreadable subtree would look deleted; leave the target alone.
            stats.errors += 1;
        } else {
            for (relative, path) in &target.files {
                if source.files.contains_key(relative) {
                    continue;
                }
                match fs::remove_file(path) {
                    Ok(()) => stats.deleted += 1,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => {
                        warn!("Failed to delete {}: {e}", path.display());
                        stats.errors += 1;
                    }
                }
            }
        }

        for (relative, path) in &source.files {
            match self.mirror_file(path, &target_root.join(relative)) {
                Ok(FileOutcome::Created) => stats.created += 1,
                Ok(FileOutcome::Updated) => stats.updated += 1,
                Ok(FileOutcome::Unchanged) => {}
                Err(e) => {
                    warn!("Failed to sync {}: {e}", path.display());
                    stats.errors += 1;
                }
            }
        }

        if source.complete {
            self.prune_orphan_dirs(&source.dirs, &target.dirs, &mut stats);
        }

        info!(
            "Synced {} -> {} in {:?} (created: {}, updated: {}, deleted: {}, errors: {})",
            source_root.display(),
            target_root.display(),
            start.elapsed(),
            stats.created,
            stats.updated,
            stats.deleted,
            stats.errors
        );
        stats
    }

    /// Remove target directories with no counterpart in source, deepest first.
    fn prune_orphan_dirs(
        &self,
        source_dirs: &BTreeSet<PathBuf>,
        target_dirs: &BTreeSet<PathBuf>,
        stats: &mut SyncStats,
    ) {
        let mut orphans: Vec<&PathBuf> = target_dirs
            .iter()
            .filter(|dir| !dir.as_os_str().is_empty() && !source_dirs.contains(*dir))
            .collect();
        orphans.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));

        for relative in orphans {
            let path = self.target_root().join(relative);
            if !path.is_dir() {
                continue;
            }
            match remove_tree(&path) {
                Ok(removed) => {
                    debug!("Pruned orphan directory {}", path.display());
                    stats.deleted += removed;
                }
                Err(e) => {
                    warn!("Failed to prune {}: {e}", path.display());
                    stats.errors += 1;
                }
            }
        }
    }

    /// Mirror one source file.
    ///
    /// Accepts a path relative to the source root or an absolute path inside
    /// it. Returns `Ok(false)` for paths outside the source root and for
    /// directories.
    pub fn sync_file(&self, source_path: &Path) -> Result<bool> {
        let source_path = self.absolute_source(source_path);
        let Ok(relative) = source_path.strip_prefix(self.source_root()) else {
            return Ok(false);
        };
        if !is_contained(relative) || source_path.is_dir() {
            return Ok(false);
        }

        let outcome = self.mirror_file(&source_path, &self.target_root().join(relative))?;
        debug!("Synced {} ({outcome:?})", relative.display());
        Ok(true)
    }

    /// Mirror every file beneath a source directory.
    pub fn sync_directory(&self, source_dir: &Path) -> Result<SyncStats> {
        let source_dir = self.absolute_source(source_dir);
        let relative = source_dir
            .strip_prefix(self.source_root())
            .map_err(|_| {
                MirrorError::Validation(format!(
                    "{} is outside {}",
                    source_dir.display(),
                    self.source_root().display()
                ))
            })?
            .to_path_buf();
        if !stays_inside(&relative) {
            return Err(MirrorError::Validation(format!(
                "{} escapes {}",
                source_dir.display(),
                self.source_root().display()
            )));
        }

        let mut stats = SyncStats::default();
        for (inner, path) in TreeSnapshot::scan(&source_dir).files {
            let dest = self.target_root().join(&relative).join(&inner);
            match self.mirror_file(&path, &dest) {
                Ok(FileOutcome::Created) => stats.created += 1,
                Ok(FileOutcome::Updated) => stats.updated += 1,
                Ok(FileOutcome::Unchanged) => {}
                Err(e) => {
                    warn!("Failed to sync {}: {e}", path.display());
                    stats.errors += 1;
                }
            }
        }
        Ok(stats)
    }

    /// Delete one mirrored path, recursively if it is a directory.
    ///
    /// Returns `Ok(true)` once nothing is left at the path, including when it
    /// was already absent. Returns `Ok(false)` if the path would escape the
    /// target root.
    pub fn delete_file(&self, relative: &Path) -> Result<bool> {
        if !is_contained(relative) {
            debug!("Refusing to delete {}", relative.display());
            return Ok(false);
        }
        let path = self.target_root().join(relative);
        let metadata = match fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        };

        if metadata.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        debug!("Deleted {}", path.display());
        Ok(true)
    }

    /// Rename a mirrored path inside the target tree.
    ///
    /// Empty parent directories left behind are removed up to the target
    /// root. Returns `Ok(false)` if there was nothing to move.
    pub fn move_path(&self, old_relative: &Path, new_relative: &Path) -> Result<bool> {
        if !is_contained(old_relative) || !is_contained(new_relative) {
            return Ok(false);
        }
        let old_path = self.target_root().join(old_relative);
        let new_path = self.target_root().join(new_relative);
        if fs::symlink_metadata(&old_path).is_err() {
            return Ok(false);
        }

        if let Some(parent) = new_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&old_path, &new_path)?;
        if let Some(parent) = old_path.parent() {
            self.remove_empty_ancestors(parent);
        }
        debug!(
            "Moved {} -> {}",
            old_relative.display(),
            new_relative.display()
        );
        Ok(true)
    }

    fn remove_empty_ancestors(&self, mut dir: &Path) {
        while dir != self.target_root() && dir.starts_with(self.target_root()) {
            // Fails on non-empty directories, which ends the walk.
            if fs::remove_dir(dir).is_err() {
                break;
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
    }

    fn absolute_source(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.source_root().join(path)
        }
    }

    /// Write `dest` from `source`, rewriting redirect files.
    fn mirror_file(&self, source: &Path, dest: &Path) -> Result<FileOutcome> {
        let existing = fs::symlink_metadata(dest).ok();
        if existing.as_ref().is_some_and(fs::Metadata::is_dir) {
            fs::remove_dir_all(dest)?;
        }
        let existed = existing.as_ref().is_some_and(|m| !m.is_dir());

        if self.rule.is_redirect(source) {
            let bytes = fs::read(source)?;
            let content = rewrite_bytes(&bytes, &self.rule.search, &self.rule.replace, source)?;
            if existed && fs::read(dest).is_ok_and(|current| current == content) {
                return Ok(FileOutcome::Unchanged);
            }
            prepare_parent(dest)?;
            write_atomic(dest, &content)?;
        } else {
            let metadata = fs::metadata(source)?;
            if existed && same_size_and_mtime(&metadata, dest) {
                return Ok(FileOutcome::Unchanged);
            }
            prepare_parent(dest)?;
            copy_atomic(source, dest, &metadata)?;
        }

        Ok(if existed {
            FileOutcome::Updated
        } else {
            FileOutcome::Created
        })
    }
}

/// Whether `relative` names an entry strictly inside the root it is joined to.
fn is_contained(relative: &Path) -> bool {
    !relative.as_os_str().is_empty() && stays_inside(relative)
}

/// Whether joining `relative` onto a root can never leave that root.
fn stays_inside(relative: &Path) -> bool {
    relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Remove a directory tree and return how many files it held.
fn remove_tree(path: &Path) -> Result<usize> {
    let files = WalkDir::new(path)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| !e.file_type().is_dir())
        .count();
    fs::remove_dir_all(path)?;
    Ok(files)
}

fn prepare_parent(dest: &Path) -> io::Result<()> {
    let Some(parent) = dest.parent() else {
        return Ok(());
    };
    if parent.is_file() {
        fs::remove_file(parent)?;
    }
    fs::create_dir_all(parent)
}

fn temp_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{name}.mirror-tmp"))
}

/// Write to a sibling temp file, then rename it over `dest`.
///
/// The temp file is removed if any step fails.
fn write_atomic(dest: &Path, content: &[u8]) -> io::Result<()> {
    let temp = temp_path(dest);
    fs::write(&temp, content)
        .and_then(|()| fs::rename(&temp, dest))
        .inspect_err(|_| discard_temp(&temp))
}

fn copy_atomic(source: &Path, dest: &Path, metadata: &fs::Metadata) -> io::Result<()> {
    let temp = temp_path(dest);
    fs::copy(source, &temp)
        .and_then(|_| {
            if let Ok(modified) = metadata.modified() {
                preserve_mtime(&temp, modified);
            }
            fs::rename(&temp, dest)
        })
        .inspect_err(|_| discard_temp(&temp))
}

fn discard_temp(temp: &Path) {
    let is_file = fs::symlink_metadata(temp)
        .as_ref()
        .is_ok_and(fs::Metadata::is_file);
    if is_file {
        let _ = fs::remove_file(temp);
    }
}

fn preserve_mtime(path: &Path, modified: std::time::SystemTime) {
    let file = fs::File::options()
        .write(true)
        .open(path)
        .or_else(|_| fs::File::open(path));
    if let Err(e) = file.and_then(|f| f.set_modified(modified)) {
        debug!("Could not preserve mtime on {}: {e}", path.display());
    }
}

fn same_size_and_mtime(source: &fs::Metadata, dest: &Path) -> bool {
    let Ok(target) = fs::metadata(dest) else {
        return false;
    };
    source.len() == target.len()
        && matches!((source.modified(), target.modified()), (Ok(a), Ok(b)) if a == b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn setup() -> (TempDir, MirrorEngine) {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("source");
        let target = temp_dir.path().join("target");
        fs::create_dir_all(&source).unwrap();
        let rule = SyncRule::new(&source, &target).with_rewrite("/mnt/media", "http://nas/media");
        (temp_dir, MirrorEngine::new(rule))
    }

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_sync_all_rewrites_redirects_and_copies_others() {
        let (_temp, engine) = setup();
        let src = engine.source_root().to_path_buf();
        write(&src.join("movies/a.strm"), "/mnt/media/a.mkv");
        write(&src.join("movies/a.nfo"), "<movie>/mnt/media</movie>");

        let stats = engine.sync_all();
        assert_eq!(stats.created, 2);
        assert_eq!(stats.errors, 0);

        let dst = engine.target_root();
        assert_eq!(
            fs::read_to_string(dst.join("movies/a.strm")).unwrap(),
            "http://nas/media/a.mkv"
        );
        assert_eq!(
            fs::read_to_string(dst.join("movies/a.nfo")).unwrap(),
            "<movie>/mnt/media</movie>"
        );
    }

    #[test]
    fn test_sync_all_is_idempotent() {
        let (_temp, engine) = setup();
        let src = engine.source_root().to_path_buf();
        write(&src.join("a.strm"), "/mnt/media/a.mkv");
        write(&src.join("sub/b.jpg"), "binary-ish");

        let first = engine.sync_all();
        assert_eq!(first.created, 2);

        let second = engine.sync_all();
        assert_eq!(second, SyncStats::default());
    }

    #[test]
    fn test_changed_source_counts_as_updated() {
        let (_temp, engine) = setup();
        let src = engine.source_root().to_path_buf();
        write(&src.join("a.strm"), "/mnt/media/a.mkv");
        engine.sync_all();

        write(&src.join("a.strm"), "/mnt/media/b.mkv");
        let stats = engine.sync_all();
        assert_eq!(stats.updated, 1);
        assert_eq!(
            fs::read_to_string(engine.target_root().join("a.strm")).unwrap(),
            "http://nas/media/b.mkv"
        );
    }

    #[test]
    fn test_orphan_directories_are_pruned() {
        let (_temp, engine) = setup();
        let src = engine.source_root().to_path_buf();
        write(&src.join("show/s1/e1.strm"), "/mnt/media/e1");
        write(&src.join("show/s1/e2.strm"), "/mnt/media/e2");
        write(&src.join("keep.txt"), "k");
        engine.sync_all();

        fs::remove_dir_all(src.join("show")).unwrap();
        let stats = engine.sync_all();

        assert_eq!(stats.deleted, 2);
        assert!(!engine.target_root().join("show").exists());
        assert!(engine.target_root().join("keep.txt").exists());
    }

    #[test]
    fn test_empty_orphan_directory_is_removed() {
        let (_temp, engine) = setup();
        fs::create_dir_all(engine.target_root().join("stale/deeper")).unwrap();

        let stats = engine.sync_all();
        assert_eq!(stats.deleted, 0);
        assert!(!engine.target_root().join("stale").exists());
        assert!(engine.target_root().exists());
    }

    #[test]
    fn test_missing_source_deletes_target() {
        let (temp, engine) = setup();
        write(&engine.target_root().join("a.strm"), "x");
        write(&engine.target_root().join("d/b.txt"), "y");
        write(&engine.target_root().join("d/e/c.txt"), "z");
        fs::remove_dir_all(temp.path().join("source")).unwrap();

        let stats = engine.sync_all();
        assert_eq!(stats.deleted, 3);
        assert!(!engine.target_root().exists());
    }

    #[test]
    fn test_invalid_utf8_redirect_counts_error_and_continues() {
        let (_temp, engine) = setup();
        let src = engine.source_root().to_path_buf();
        fs::write(src.join("bad.strm"), [0xff, 0xfe]).unwrap();
        write(&src.join("good.strm"), "/mnt/media/ok");

        let stats = engine.sync_all();
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.created, 1);
        assert!(!engine.target_root().join("bad.strm").exists());
    }

    #[test]
    fn test_empty_search_mirrors_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("s");
        write(&source.join("a.strm"), "/mnt/media/a.mkv\r\n");
        let engine = MirrorEngine::new(SyncRule::new(&source, temp_dir.path().join("t")));

        engine.sync_all();
        assert_eq!(
            fs::read(temp_dir.path().join("t/a.strm")).unwrap(),
            b"/mnt/media/a.mkv\r\n"
        );
    }

    #[test]
    fn test_sync_file_rejects_outside_and_directories() {
        let (temp, engine) = setup();
        let outside = temp.path().join("outside.strm");
        write(&outside, "x");
        fs::create_dir_all(engine.source_root().join("dir")).unwrap();

        assert!(!engine.sync_file(&outside).unwrap());
        assert!(!engine.sync_file(&engine.source_root().join("dir")).unwrap());
    }

    #[test]
    fn test_sync_file_rejects_parent_components() {
        let (temp, engine) = setup();
        let outside = temp.path().join("outside/x.strm");
        write(&outside, "/mnt/media/x");

        assert!(!engine.sync_file(Path::new("../outside/x.strm")).unwrap());
        assert!(
            !engine
                .sync_file(&engine.source_root().join("../outside/x.strm"))
                .unwrap()
        );
        assert_eq!(fs::read_to_string(&outside).unwrap(), "/mnt/media/x");
        assert!(!engine.target_root().exists());
    }

    #[test]
    fn test_sync_directory_rejects_parent_components() {
        let (temp, engine) = setup();
        write(&temp.path().join("outside/y.strm"), "/mnt/media/y");

        let err = engine
            .sync_directory(&engine.source_root().join("../outside"))
            .unwrap_err();
        assert!(matches!(err, MirrorError::Validation(_)));
        assert!(engine.sync_directory(Path::new("../outside")).is_err());
        assert_eq!(
            fs::read_to_string(temp.path().join("outside/y.strm")).unwrap(),
            "/mnt/media/y"
        );
    }

    #[test]
    fn test_failed_atomic_write_leaves_no_temp_file() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("a.txt");
        write(&src, "a");
        // A non-empty directory at the destination makes the rename fail.
        let dest = temp_dir.path().join("dest");
        write(&dest.join("keep.txt"), "keep");

        assert!(write_atomic(&dest, b"content").is_err());
        assert!(!temp_path(&dest).exists());

        let metadata = fs::metadata(&src).unwrap();
        assert!(copy_atomic(&src, &dest, &metadata).is_err());
        assert!(!temp_path(&dest).exists());
        assert!(dest.join("keep.txt").exists());
    }

    #[test]
    fn test_sync_file_accepts_relative_path() {
        let (_temp, engine) = setup();
        write(&engine.source_root().join("x/y.strm"), "/mnt/media/y");

        assert!(engine.sync_file(Path::new("x/y.strm")).unwrap());
        assert_eq!(
            fs::read_to_string(engine.target_root().join("x/y.strm")).unwrap(),
            "http://nas/media/y"
        );
    }

    #[test]
    fn test_delete_file_handles_files_dirs_and_escapes() {
        let (_temp, engine) = setup();
        write(&engine.target_root().join("a.txt"), "a");
        write(&engine.target_root().join("d/b.txt"), "b");

        assert!(engine.delete_file(Path::new("a.txt")).unwrap());
        assert!(engine.delete_file(Path::new("d")).unwrap());
        assert!(!engine.target_root().join("d").exists());
        // Already absent counts as deleted.
        assert!(engine.delete_file(Path::new("missing")).unwrap());
        assert!(!engine.delete_file(Path::new("../source")).unwrap());
        assert!(!engine.delete_file(Path::new("")).unwrap());
        assert!(engine.source_root().exists());
    }

    #[test]
    fn test_move_path_prunes_empty_parents() {
        let (_temp, engine) = setup();
        write(&engine.target_root().join("old/inner/a.txt"), "a");

        assert!(
            engine
                .move_path(Path::new("old/inner/a.txt"), Path::new("new/a.txt"))
                .unwrap()
        );
        assert!(engine.target_root().join("new/a.txt").exists());
        assert!(!engine.target_root().join("old").exists());
        assert!(!engine.move_path(Path::new("nope"), Path::new("x")).unwrap());
    }

    #[test]
    fn test_sync_directory_mirrors_subtree() {
        let (_temp, engine) = setup();
        let src = engine.source_root().to_path_buf();
        write(&src.join("season/e1.strm"), "/mnt/media/e1");
        write(&src.join("season/extra/e2.txt"), "e2");

        let stats = engine.sync_directory(&src.join("season")).unwrap();
        assert_eq!(stats.created, 2);
        assert!(engine.target_root().join("season/extra/e2.txt").exists());
    }

    #[test]
    fn test_directory_replaced_by_file() {
        let (_temp, engine) = setup();
        write(&engine.target_root().join("thing/inner.txt"), "old");
        write(&engine.source_root().join("thing"), "now a file");

        let stats = engine.sync_all();
        assert_eq!(stats.errors, 0);
        assert_eq!(
            fs::read_to_string(engine.target_root().join("thing")).unwrap(),
            "now a file"
        );
    }
}
