//! Timestamp-ordered snapshot store for the monitored file.
//!
//! Every snapshot is an immutable, whole-file copy stored under
//! `{prefix}_{YYYYMMDD_HHMMSS}` in the store directory. Names are fixed width
//! and zero padded, so sorting the catalog by name sorts it by creation time.
//! Two snapshots taken within the same second get a two-digit `_NN` suffix,
//! which keeps that property.
//!
//! Restore is a pure read of what is on disk: nothing about the catalog lives
//! in memory, so a process restart between backup and restore is harmless.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::atomic;
use crate::hasher::{self, Digest};

pub const SNAPSHOT_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const TIMESTAMP_WIDTH: usize = 15;
const MAX_SAME_SECOND: u32 = 99;

// ── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum BackupStoreError {
    #[error("invalid snapshot prefix {0:?}")]
    InvalidPrefix(String),
    #[error("cannot read source {path}: {source}")]
    SourceUnreadable {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("too many snapshots share timestamp {0}")]
    NamesExhausted(String),
    #[error("restored file {0} could not be re-read for confirmation")]
    ConfirmationFailed(String),
}

// ── Data Models ─────────────────────────────────────────────────────────────

/// Name of a snapshot entry. Orders chronologically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotId(String);

impl SnapshotId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub path: PathBuf,
    pub taken_at: NaiveDateTime,
    /// Same-second disambiguator, 0 for the first snapshot of a second.
    pub sequence: u32,
    pub size: u64,
}

/// Result of [`BackupStore::restore_latest`]. An empty catalog is an
/// expected outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored { snapshot: SnapshotId, digest: Digest },
    NoBackups,
    Failed { error: String },
}

// ── Store ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
    prefix: String,
}

impl BackupStore {
    /// Describe a store. Nothing is touched on disk until
    /// [`ensure_store_exists`](Self::ensure_store_exists) or a snapshot call.
    pub fn new(root: impl Into<PathBuf>, prefix: &str) -> Result<Self, BackupStoreError> {
        if prefix.is_empty()
            || prefix.contains(|c: char| c == '/' || c == '\\')
            || prefix.starts_with('.')
        {
            return Err(BackupStoreError::InvalidPrefix(prefix.to_string()));
        }
        Ok(Self {
            root: root.into(),
            prefix: prefix.to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Idempotently create the store directory and sweep staging leftovers.
    /// Only a directory created here is restricted to the owner; an existing
    /// one keeps its permissions.
    pub fn ensure_store_exists(&self) -> Result<()> {
        if !self.root.is_dir() {
            fs::create_dir_all(&self.root)
                .with_context(|| format!("create backup dir {}", self.root.display()))?;
            Self::restrict_dir_permissions(&self.root);
        }
        atomic::cleanup_staging(&self.root);
        Ok(())
    }

    // ── Catalog ─────────────────────────────────────────────────────────────

    /// All snapshots, oldest first. A missing store reads as empty.
    pub fn catalog(&self) -> Result<Vec<Snapshot>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("list {}", self.root.display()));
            }
        };

        let mut snapshots = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some((taken_at, sequence)) = self.parse_name(&name) else {
                continue;
            };
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            snapshots.push(Snapshot {
                id: SnapshotId(name),
                path: entry.path(),
                taken_at,
                sequence,
                size: meta.len(),
            });
        }
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(snapshots)
    }

    pub fn latest(&self) -> Result<Option<Snapshot>> {
        Ok(self.catalog()?.pop())
    }

    // ── Ingest ──────────────────────────────────────────────────────────────

    /// Copy the current bytes of `source` into a new snapshot.
    pub fn create_snapshot(&self, source: &Path) -> Result<SnapshotId> {
        self.create_snapshot_at(source, Utc::now())
    }

    /// Same as [`create_snapshot`](Self::create_snapshot) with an explicit
    /// creation time.
    pub fn create_snapshot_at(&self, source: &Path, at: DateTime<Utc>) -> Result<SnapshotId> {
        let data = fs::read(source).map_err(|e| BackupStoreError::SourceUnreadable {
            path: source.display().to_string(),
            source: e,
        })?;
        self.ensure_store_exists()?;

        let id = self.next_id(at)?;
        atomic::write_atomic(&self.root.join(id.as_str()), &data)
            .with_context(|| format!("write snapshot {id}"))?;
        info!(
            snapshot = %id,
            bytes = data.len(),
            "snapshot created"
        );
        Ok(id)
    }

    // ── Retrieval ───────────────────────────────────────────────────────────

    pub fn read_snapshot(&self, id: &SnapshotId) -> Result<Vec<u8>> {
        let path = self.root.join(id.as_str());
        fs::read(&path).with_context(|| format!("read snapshot {}", path.display()))
    }

    /// Overwrite `dest` with the most recent snapshot and confirm the result
    /// by hashing `dest` again. `dest` is untouched when the catalog is empty.
    pub fn restore_latest(&self, dest: &Path) -> RestoreOutcome {
        let latest = match self.latest() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                warn!(store = %self.root.display(), "no backups available to restore");
                return RestoreOutcome::NoBackups;
            }
            Err(e) => {
                error!(error = %format!("{e:#}"), "cannot read backup catalog");
                return RestoreOutcome::Failed {
                    error: format!("{e:#}"),
                };
            }
        };

        match self.restore_snapshot(&latest, dest) {
            Ok(digest) => {
                info!(
                    from = %latest.path.display(),
                    to = %dest.display(),
                    hash = %digest,
                    "restored from snapshot"
                );
                RestoreOutcome::Restored {
                    snapshot: latest.id,
                    digest,
                }
            }
            Err(e) => {
                error!(
                    snapshot = %latest.id,
                    error = %format!("{e:#}"),
                    "restore failed"
                );
                RestoreOutcome::Failed {
                    error: format!("{e:#}"),
                }
            }
        }
    }

    // ── Retention ───────────────────────────────────────────────────────────

    /// Delete the oldest snapshots until at most `keep` remain. The most
    /// recent snapshot always survives, whatever `keep` says.
    pub fn prune(&self, keep: usize) -> Result<Vec<SnapshotId>> {
        let keep = keep.max(1);
        let catalog = self.catalog()?;
        if catalog.len() <= keep {
            return Ok(Vec::new());
        }
        let excess = catalog.len() - keep;
        let mut removed = Vec::with_capacity(excess);
        for snapshot in catalog.into_iter().take(excess) {
            match fs::remove_file(&snapshot.path) {
                Ok(()) => {
                    debug!(snapshot = %snapshot.id, "pruned snapshot");
                    removed.push(snapshot.id);
                }
                Err(e) => {
                    warn!(snapshot = %snapshot.id, error = %e, "cannot prune snapshot");
                }
            }
        }
        Ok(removed)
    }

    // ── Private helpers ─────────────────────────────────────────────────────

    fn restore_snapshot(&self, snapshot: &Snapshot, dest: &Path) -> Result<Digest> {
        let data = fs::read(&snapshot.path)
            .with_context(|| format!("read snapshot {}", snapshot.path.display()))?;
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            atomic::cleanup_staging(parent);
        }
        atomic::write_atomic(dest, &data)?;
        let digest = hasher::digest_file(dest)
            .ok_or_else(|| BackupStoreError::ConfirmationFailed(dest.display().to_string()))?;
        Ok(digest)
    }

    fn next_id(&self, at: DateTime<Utc>) -> Result<SnapshotId> {
        let stamp = at.format(SNAPSHOT_TIMESTAMP_FORMAT).to_string();
        let base = format!("{}_{}", self.prefix, stamp);
        let taken_at = at.naive_utc().with_nanosecond(0).unwrap_or(at.naive_utc());

        let used = self
            .catalog()?
            .into_iter()
            .filter(|s| s.taken_at == taken_at)
            .map(|s| s.sequence)
            .max();
        let id = match used {
            None => base,
            Some(n) if n < MAX_SAME_SECOND => format!("{}_{:02}", base, n + 1),
            Some(_) => return Err(BackupStoreError::NamesExhausted(stamp).into()),
        };
        Ok(SnapshotId(id))
    }

    /// Parse `{prefix}_{YYYYMMDD_HHMMSS}[_NN]`.
    fn parse_name(&self, name: &str) -> Option<(NaiveDateTime, u32)> {
        let rest = name.strip_prefix(&self.prefix)?.strip_prefix('_')?;
        if rest.len() < TIMESTAMP_WIDTH || !rest.is_char_boundary(TIMESTAMP_WIDTH) {
            return None;
        }
        let (stamp, tail) = rest.split_at(TIMESTAMP_WIDTH);
        let taken_at = NaiveDateTime::parse_from_str(stamp, SNAPSHOT_TIMESTAMP_FORMAT).ok()?;
        let sequence = match tail {
            "" => 0,
            t => {
                let digits = t.strip_prefix('_')?;
                if digits.len() != 2 || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                digits.parse().ok()?
            }
        };
        Some((taken_at, sequence))
    }

    fn restrict_dir_permissions(path: &Path) {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o700)) {
                warn!("cannot restrict permissions on {}: {}", path.display(), e);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = path;
        }
    }
}
