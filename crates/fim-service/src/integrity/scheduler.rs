//! Poll scheduling.
//!
//! [`Scheduler::tick`] evaluates two timers against one session clock: a
//! one-shot external write (the tamper drill) and the repeating integrity
//! check. It is synchronous, so tests feed it synthetic times. [`run`] is the
//! production driver: it ticks on a fixed cadence until shutdown.

use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::integrity::clock::Clock;
use crate::integrity::engine::{CheckReport, IntegrityEngine};

/// How often the driver wakes up to look at its timers.
pub const DEFAULT_CADENCE: Duration = Duration::from_millis(100);

/// Anything that writes the target from outside the engine.
pub trait ExternalWriter: Send {
    fn write(&mut self, path: &Path, contents: &[u8]) -> io::Result<()>;
}

/// Plain filesystem overwrite, the same primitive any other process uses.
pub struct FsWriter;

impl ExternalWriter for FsWriter {
    fn write(&mut self, path: &Path, contents: &[u8]) -> io::Result<()> {
        fs::write(path, contents)
    }
}

/// A single overwrite of the target once `at` has elapsed.
pub struct TamperInjection {
    at: Duration,
    payload: Vec<u8>,
    writer: Box<dyn ExternalWriter>,
    fired: bool,
}

impl TamperInjection {
    pub fn new(at: Duration, payload: impl Into<Vec<u8>>, writer: Box<dyn ExternalWriter>) -> Self {
        Self {
            at,
            payload: payload.into(),
            writer,
            fired: false,
        }
    }

    pub fn fired(&self) -> bool {
        self.fired
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickEvent {
    TamperInjected,
    TamperFailed { error: String },
    Checked(CheckReport),
}

pub struct Scheduler {
    engine: IntegrityEngine,
    tamper: Option<TamperInjection>,
}

impl Scheduler {
    pub fn new(engine: IntegrityEngine) -> Self {
        Self {
            engine,
            tamper: None,
        }
    }

    pub fn with_tamper(mut self, tamper: TamperInjection) -> Self {
        self.tamper = Some(tamper);
        self
    }

    pub fn engine(&self) -> &IntegrityEngine {
        &self.engine
    }

    pub fn tamper(&self) -> Option<&TamperInjection> {
        self.tamper.as_ref()
    }

    /// Evaluate both timers at session time `now`.
    pub fn tick(&mut self, now: Duration) -> Vec<TickEvent> {
        let mut events = Vec::new();

        if let Some(tamper) = self.tamper.as_mut().filter(|t| !t.fired && now >= t.at) {
            // One shot, even when the write fails.
            tamper.fired = true;
            let target = self.engine.target();
            match tamper.writer.write(target, &tamper.payload) {
                Ok(()) => {
                    warn!(path = %target.display(), "simulation: target overwritten");
                    events.push(TickEvent::TamperInjected);
                }
                Err(e) => {
                    warn!(path = %target.display(), error = %e, "simulation: write failed");
                    events.push(TickEvent::TamperFailed {
                        error: e.to_string(),
                    });
                }
            }
        }

        if let Some(report) = self.engine.check_due(now) {
            events.push(TickEvent::Checked(report));
        }
        events
    }
}

/// Tick `scheduler` every `cadence` until `shutdown` turns `true` or its
/// sender is dropped. Each batch of events goes to `on_event` in order.
///
/// Ticks hash the target and may sleep through the heal delay, so they run on
/// the blocking pool and never stall a runtime worker. A shutdown that arrives
/// mid-tick is honored once that tick finishes.
pub async fn run<C, F>(
    mut scheduler: Scheduler,
    clock: C,
    cadence: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut on_event: F,
) -> Result<Scheduler>
where
    C: Clock,
    F: FnMut(&TickEvent),
{
    info!(
        poll_ms = cadence.as_millis() as u64,
        path = %scheduler.engine().target().display(),
        "monitoring started"
    );
    let mut ticker = tokio::time::interval(cadence);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {
                let now = clock.elapsed();
                let (returned, events) = task::spawn_blocking(move || {
                    let events = scheduler.tick(now);
                    (scheduler, events)
                })
                .await
                .context("integrity tick panicked")?;
                scheduler = returned;
                for event in &events {
                    on_event(event);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    debug!("shutdown sender dropped");
                    break;
                }
            }
        }
    }

    info!("monitoring stopped");
    Ok(scheduler)
}
