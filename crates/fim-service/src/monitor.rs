//! Session start-up: write the initial content, take the first snapshot,
//! capture the baseline, and assemble the engine.
//!
//! Only the initial write (and reading it back for the baseline) is fatal.
//! Backup problems are logged and monitoring goes ahead without them.

use anyhow::{anyhow, Context, Result};
use fim_core::backup_store::BackupStore;
use fim_core::event_log::EventSeverity;
use fim_core::hasher;
use fim_core::settings::MonitorSettings;
use serde_json::json;
use std::fs;
use tracing::warn;

use crate::alerts::AlertSink;
use crate::enforcement::heal::Healer;
use crate::integrity::engine::IntegrityEngine;

pub fn establish_baseline(
    settings: &MonitorSettings,
    content: &[u8],
    alerts: &AlertSink,
) -> Result<IntegrityEngine> {
    let target = &settings.target_path;
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(target, content)
        .with_context(|| format!("cannot write initial content to {}", target.display()))?;
    alerts.record(
        "CONTENT_SAVED",
        EventSeverity::Info,
        "User content saved.",
        json!({ "path": target.display().to_string(), "bytes": content.len() }),
    );

    let store = BackupStore::new(&settings.backup_dir, &settings.snapshot_prefix)?;
    if let Err(e) = store.ensure_store_exists() {
        warn!(error = %format!("{e:#}"), "backup store unavailable; restore will not work");
    }
    match store.create_snapshot(target) {
        Ok(id) => {
            alerts.record(
                "BACKUP_CREATED",
                EventSeverity::Info,
                &format!("Backup created: {}", store.root().join(id.as_str()).display()),
                json!({ "snapshot": id.as_str() }),
            );
            if let Err(e) = store.prune(settings.keep_backups) {
                warn!(error = %format!("{e:#}"), "snapshot pruning failed");
            }
        }
        Err(e) => alerts.record(
            "BACKUP_FAILED",
            EventSeverity::Error,
            &format!("Backup FAILED: {e:#}"),
            serde_json::Value::Null,
        ),
    }

    let baseline = hasher::digest_file(target)
        .ok_or_else(|| anyhow!("cannot establish baseline: {} unreadable", target.display()))?;
    alerts.record(
        "BASELINE",
        EventSeverity::Info,
        &format!("Baseline hash: {baseline}"),
        json!({ "baseline": baseline }),
    );
    alerts.record(
        "SELF_HEAL",
        EventSeverity::Info,
        if settings.self_heal {
            "Self-heal: ENABLED"
        } else {
            "Self-heal: DISABLED"
        },
        serde_json::Value::Null,
    );

    let healer = Healer::new(store, settings.heal_delay());
    Ok(
        IntegrityEngine::new(target.clone(), baseline, healer, settings.poll_interval())
            .with_self_heal(settings.self_heal),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use fim_core::hasher::digest_bytes;
    use tempfile::tempdir;

    #[test]
    fn unwritable_target_is_fatal() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"").unwrap();
        let settings = MonitorSettings {
            target_path: blocker.join("secret.txt"),
            ..MonitorSettings::default()
        }
        .resolve(dir.path());
        let err = establish_baseline(&settings, b"x", &AlertSink::new(None));
        assert!(err.is_err());
    }

    #[test]
    fn baseline_and_first_snapshot() {
        let dir = tempdir().unwrap();
        let settings = MonitorSettings::default().resolve(dir.path());
        let engine =
            establish_baseline(&settings, b"My Super Secret Data", &AlertSink::new(None)).unwrap();
        assert_eq!(engine.baseline(), digest_bytes(b"My Super Secret Data"));
        let catalog = engine.healer().store().catalog().unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(engine.check().is_clean());
    }

    #[test]
    fn backup_failure_is_not_fatal() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("backups");
        fs::write(&blocker, b"not a directory").unwrap();
        let settings = MonitorSettings::default().resolve(dir.path());
        let engine = establish_baseline(&settings, b"data", &AlertSink::new(None)).unwrap();
        assert_eq!(engine.baseline(), digest_bytes(b"data"));
    }
}
