//! Append-only security event log.
//!
//! One JSON object per line. Sequence numbers stay monotonic across
//! rotations. Writing is best-effort from the monitor's point of view:
//! `append` reports failures, and the monitor logs them and moves on.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const MAX_ROTATIONS: usize = 5;
pub const DEFAULT_MAX_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSeverity {
    Info,
    Warn,
    Error,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub severity: EventSeverity,
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

pub struct EventLog {
    path: PathBuf,
    last_seq: Mutex<u64>,
    max_bytes: u64,
}

impl EventLog {
    pub fn new<P: AsRef<Path>>(path: P, max_bytes: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let last_seq = Self::load_last_seq(&path)?;
        Ok(Self {
            path,
            last_seq: Mutex::new(last_seq),
            max_bytes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_last_seq(path: &Path) -> Result<u64> {
        let last_seq = Self::read_entries(path)?
            .iter()
            .map(|entry| entry.seq)
            .max()
            .unwrap_or(0);
        Ok(last_seq)
    }

    /// Every parseable entry in file order. Lines torn by a crash, including
    /// ones cut inside a multi-byte character, are skipped.
    fn read_entries(path: &Path) -> Result<Vec<EventEntry>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("open {}", path.display())),
        };
        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Ok(entry) = serde_json::from_str::<EventEntry>(line) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    pub fn append(
        &self,
        event_type: &str,
        severity: EventSeverity,
        message: impl Into<String>,
        data: serde_json::Value,
    ) -> Result<EventEntry> {
        let mut last_seq = self.last_seq.lock();
        self.rotate_if_needed()?;
        let entry = EventEntry {
            seq: *last_seq + 1,
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            severity,
            message: message.into(),
            data,
        };
        self.write_entry(&entry)?;
        *last_seq = entry.seq;
        Ok(entry)
    }

    fn write_entry(&self, entry: &EventEntry) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open {}", self.path.display()))?;
        // Terminate a line left unfinished by a crash so this entry starts
        // on its own line.
        if file.metadata()?.len() > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::End(-1))?;
            file.read_exact(&mut last)?;
            if last[0] != b'\n' {
                file.write_all(b"\n")?;
            }
        }
        let line = serde_json::to_string(entry)?;
        writeln!(file, "{}", line)?;
        file.flush()?;
        Ok(())
    }

    fn rotate_if_needed(&self) -> Result<()> {
        match fs::metadata(&self.path) {
            Ok(metadata) if metadata.len() >= self.max_bytes => {}
            _ => return Ok(()),
        }
        for i in (1..=MAX_ROTATIONS).rev() {
            let rotated = self.path_with_suffix(i);
            if rotated.exists() {
                if i == MAX_ROTATIONS {
                    fs::remove_file(&rotated)?;
                } else {
                    fs::rename(&rotated, self.path_with_suffix(i + 1))?;
                }
            }
        }
        fs::rename(&self.path, self.path_with_suffix(1))?;
        Ok(())
    }

    /// Read events from the current file, most recent first. `since` keeps
    /// only entries at or after that instant.
    pub fn read_recent(
        &self,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<EventEntry>> {
        let mut entries: Vec<EventEntry> = Self::read_entries(&self.path)?
            .into_iter()
            .filter(|entry| since.map_or(true, |ts| entry.timestamp >= ts))
            .collect();
        entries.reverse();
        if let Some(lim) = limit {
            entries.truncate(lim);
        }
        Ok(entries)
    }

    fn path_with_suffix(&self, index: usize) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(format!(".{}", index));
        self.path.with_file_name(name)
    }
}
