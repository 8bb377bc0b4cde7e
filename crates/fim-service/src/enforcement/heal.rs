//! Self-heal: put the latest snapshot back over a tampered or deleted target.
//!
//! The restore itself (staging file, atomic rename, re-hash) lives in the
//! backup store. This layer adds the cosmetic pre-restore delay and judges
//! the confirmed digest against the session baseline.

use fim_core::backup_store::{BackupStore, RestoreOutcome, SnapshotId};
use fim_core::hasher::Digest;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealFailure {
    NoBackups,
    Restore(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealOutcome {
    /// Restored, and the target hashes to the baseline again.
    Healed {
        snapshot: SnapshotId,
        confirmed: Digest,
    },
    /// The restore went through mechanically but the snapshot did not match
    /// the baseline, so the target is still not trusted content.
    Unverified {
        snapshot: SnapshotId,
        baseline: Digest,
        confirmed: Digest,
    },
    Failed(HealFailure),
}

impl HealOutcome {
    pub fn is_healed(&self) -> bool {
        matches!(self, HealOutcome::Healed { .. })
    }
}

pub struct Healer {
    store: BackupStore,
    delay: Duration,
}

impl Healer {
    pub fn new(store: BackupStore, delay: Duration) -> Self {
        Self { store, delay }
    }

    pub fn store(&self) -> &BackupStore {
        &self.store
    }

    pub fn heal(&self, target: &Path, baseline: &Digest) -> HealOutcome {
        info!(path = %target.display(), "auto-heal triggered: restoring backup");
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        match self.store.restore_latest(target) {
            RestoreOutcome::Restored { snapshot, digest } if digest == *baseline => {
                HealOutcome::Healed {
                    snapshot,
                    confirmed: digest,
                }
            }
            RestoreOutcome::Restored { snapshot, digest } => {
                warn!(
                    snapshot = %snapshot,
                    baseline = %baseline,
                    confirmed = %digest,
                    "restored content does not match baseline"
                );
                HealOutcome::Unverified {
                    snapshot,
                    baseline: *baseline,
                    confirmed: digest,
                }
            }
            RestoreOutcome::NoBackups => HealOutcome::Failed(HealFailure::NoBackups),
            RestoreOutcome::Failed { error } => {
                error!(path = %target.display(), error = %error, "heal failed");
                HealOutcome::Failed(HealFailure::Restore(error))
            }
        }
    }
}
