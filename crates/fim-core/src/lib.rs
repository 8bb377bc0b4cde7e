//! Building blocks of the file-integrity monitor: content digests, the
//! snapshot store, whole-file atomic replacement, the security event log and
//! configuration.

pub mod atomic;
pub mod backup_store;
pub mod event_log;
pub mod hasher;
pub mod paths;
pub mod settings;

pub use backup_store::{BackupStore, BackupStoreError, RestoreOutcome, Snapshot, SnapshotId};
pub use hasher::{digest_bytes, digest_file, Digest};
