//! Baseline comparison and the self-heal decision.
//!
//! The engine owns the session baseline. It is captured once when monitoring
//! starts and is never replaced, not even after a heal: the initial content is
//! ground truth for the whole session, so a later legitimate edit is reported
//! as tampering too.

use fim_core::hasher::{self, Digest};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::enforcement::heal::{HealOutcome, Healer};

/// What the target looked like on a poll tick, before any heal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    Clean,
    Missing,
    Tampered { baseline: Digest, current: Digest },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    pub detection: Detection,
    /// `None` when the target was clean or self-heal is disabled.
    pub heal: Option<HealOutcome>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.detection == Detection::Clean
    }
}

pub struct IntegrityEngine {
    target: PathBuf,
    baseline: Digest,
    healer: Healer,
    self_heal: bool,
    poll_interval: Duration,
    last_check: Duration,
}

impl IntegrityEngine {
    pub fn new(target: PathBuf, baseline: Digest, healer: Healer, poll_interval: Duration) -> Self {
        Self {
            target,
            baseline,
            healer,
            self_heal: true,
            poll_interval,
            last_check: Duration::ZERO,
        }
    }

    pub fn with_self_heal(mut self, enabled: bool) -> Self {
        self.self_heal = enabled;
        self
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn baseline(&self) -> Digest {
        self.baseline
    }

    pub fn self_heal(&self) -> bool {
        self.self_heal
    }

    pub fn healer(&self) -> &Healer {
        &self.healer
    }

    pub fn last_check(&self) -> Duration {
        self.last_check
    }

    pub fn is_due(&self, now: Duration) -> bool {
        now.saturating_sub(self.last_check) >= self.poll_interval
    }

    /// Run [`check`](Self::check) if a full poll interval has elapsed since
    /// the previous one. `now` is time since the session clock started.
    pub fn check_due(&mut self, now: Duration) -> Option<CheckReport> {
        if !self.is_due(now) {
            return None;
        }
        let report = self.check();
        self.last_check = now;
        Some(report)
    }

    /// Hash the target, classify it, and heal when it is missing or altered.
    pub fn check(&self) -> CheckReport {
        let detection = self.detect();
        let heal = match &detection {
            Detection::Clean => None,
            _ if !self.self_heal => None,
            Detection::Missing | Detection::Tampered { .. } => {
                Some(self.healer.heal(&self.target, &self.baseline))
            }
        };
        CheckReport { detection, heal }
    }

    pub fn detect(&self) -> Detection {
        match hasher::digest_file(&self.target) {
            None => {
                error!(path = %self.target.display(), "target file missing");
                Detection::Missing
            }
            Some(current) if current == self.baseline => {
                debug!(path = %self.target.display(), "integrity ok");
                Detection::Clean
            }
            Some(current) => {
                warn!(
                    path = %self.target.display(),
                    baseline = %self.baseline,
                    current = %current,
                    "tamper detected"
                );
                Detection::Tampered {
                    baseline: self.baseline,
                    current,
                }
            }
        }
    }
}
