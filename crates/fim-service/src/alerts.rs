//! Human-readable alerts for every non-clean outcome.
//!
//! Alerts go to `tracing` and, best-effort, to the persistent event log. A
//! failed log write is reported once through `tracing` and never reaches the
//! caller. Clean checks stay at `debug` so a tight poll interval does not
//! flood either sink.

use fim_core::event_log::{EventLog, EventSeverity};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::enforcement::heal::{HealFailure, HealOutcome};
use crate::integrity::engine::{CheckReport, Detection};
use crate::integrity::scheduler::TickEvent;

pub struct AlertSink {
    log: Option<EventLog>,
}

impl AlertSink {
    pub fn new(log: Option<EventLog>) -> Self {
        Self { log }
    }

    pub fn event_log(&self) -> Option<&EventLog> {
        self.log.as_ref()
    }

    /// Emit one alert. Never fails.
    pub fn record(
        &self,
        event_type: &str,
        severity: EventSeverity,
        message: &str,
        data: serde_json::Value,
    ) {
        match severity {
            EventSeverity::Info => info!(event = event_type, "{message}"),
            EventSeverity::Warn => warn!(event = event_type, "{message}"),
            EventSeverity::Error | EventSeverity::Critical => {
                error!(event = event_type, "{message}")
            }
        }
        if let Some(log) = &self.log {
            if let Err(e) = log.append(event_type, severity, message, data) {
                warn!(path = %log.path().display(), error = %e, "event log write failed");
            }
        }
    }

    pub fn tick_event(&self, event: &TickEvent) {
        match event {
            TickEvent::TamperInjected => self.record(
                "SIMULATED_TAMPER",
                EventSeverity::Warn,
                "SIMULATION: file hacked",
                serde_json::Value::Null,
            ),
            TickEvent::TamperFailed { error } => self.record(
                "SIMULATED_TAMPER_FAILED",
                EventSeverity::Warn,
                &format!("SIMULATION: attack failed: {error}"),
                serde_json::Value::Null,
            ),
            TickEvent::Checked(report) => self.report(report),
        }
    }

    pub fn report(&self, report: &CheckReport) {
        match &report.detection {
            Detection::Clean => {
                debug!("integrity check clean");
                return;
            }
            Detection::Missing => self.record(
                "FILE_MISSING",
                EventSeverity::Critical,
                "ALERT: file missing!",
                serde_json::Value::Null,
            ),
            Detection::Tampered { baseline, current } => self.record(
                "TAMPER_DETECTED",
                EventSeverity::Critical,
                &format!("ALERT! TAMPER DETECTED | Baseline: {baseline} | Current: {current}"),
                json!({ "baseline": baseline, "current": current }),
            ),
        }

        match &report.heal {
            None => {}
            Some(HealOutcome::Healed {
                snapshot,
                confirmed,
            }) => self.record(
                "HEALED",
                EventSeverity::Info,
                &format!("SUCCESS: system healed from {snapshot} | Hash: {confirmed}"),
                json!({ "snapshot": snapshot.as_str(), "confirmed": confirmed }),
            ),
            Some(HealOutcome::Unverified {
                snapshot,
                baseline,
                confirmed,
            }) => self.record(
                "HEAL_UNVERIFIED",
                EventSeverity::Error,
                &format!(
                    "restored from {snapshot} but hash {confirmed} does not match baseline {baseline}"
                ),
                json!({
                    "snapshot": snapshot.as_str(),
                    "baseline": baseline,
                    "confirmed": confirmed,
                }),
            ),
            Some(HealOutcome::Failed(HealFailure::NoBackups)) => self.record(
                "HEAL_FAILED",
                EventSeverity::Error,
                "FAIL: no backups available to restore",
                json!({ "reason": "no_backups" }),
            ),
            Some(HealOutcome::Failed(HealFailure::Restore(error))) => self.record(
                "HEAL_FAILED",
                EventSeverity::Error,
                &format!("FAIL: restore failed: {error}"),
                json!({ "reason": "restore", "error": error }),
            ),
        }
    }
}
