//! JSONL logger: append-only line-delimited JSON activity records.
//!
//! Each line is a self-contained JSON object. Lines are assembled in memory and
//! written via a single `write_all` so a tailing reader never sees a partial
//! line.
//!
//! Entries go to the first working [`Sink`]: the activity file, an optional
//! fallback file, stderr (prefixed `[NDH-JSONL]`), then nowhere.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::config::LoggingConfig;
use crate::core::errors::{Result, TelemetryError};

/// Severity level for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Activity kinds recorded by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ServerStart,
    ServerStop,
    EventStored,
    EventRejected,
    DocumentRecovered,
    ExportComplete,
    Error,
}

/// A single JSONL log entry; all fields optional except `ts`, `event`, `severity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 UTC timestamp.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    /// Payload `type` of the ingested event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
    /// Wire rejection reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Raw-log length after the write.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_events: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// NDH error code if the action failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Freeform details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            event_type: None,
            dataset: None,
            reason: None,
            total_events: None,
            duration_ms: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }
}

/// Where entries currently land, in degradation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Sink {
    Primary,
    Fallback,
    Stderr,
    Discard,
}

/// Configuration for the JSONL writer.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    /// Used when `path` cannot be opened or written.
    pub fallback_path: Option<PathBuf>,
    /// Size at which the current file is rolled to `<file>.1`.
    pub max_size_bytes: u64,
    /// Rolled generations kept; 0 truncates instead of rolling.
    pub max_rotated_files: u32,
}

impl From<&LoggingConfig> for JsonlConfig {
    fn from(config: &LoggingConfig) -> Self {
        Self {
            path: config.activity_log.clone(),
            fallback_path: config.fallback_log.clone(),
            max_size_bytes: config.max_log_bytes,
            max_rotated_files: config.max_rotated_files,
        }
    }
}

#[derive(Debug)]
struct OpenLog {
    path: PathBuf,
    out: BufWriter<File>,
    len: u64,
}

impl OpenLog {
    fn append(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| TelemetryError::io(parent, source))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| TelemetryError::io(&path, source))?;
        let len = file.metadata().map_or(0, |m| m.len());
        Ok(Self {
            path,
            out: BufWriter::new(file),
            len,
        })
    }
}

/// Append-only activity log writer. Never fails its caller: a broken file
/// sink steps down to the next one in [`Sink`] order.
#[derive(Debug)]
pub struct JsonlWriter {
    config: JsonlConfig,
    sink: Sink,
    log: Option<OpenLog>,
}

impl JsonlWriter {
    pub fn open(config: JsonlConfig) -> Self {
        let mut writer = Self {
            config,
            sink: Sink::Primary,
            log: None,
        };
        writer.attach(Sink::Primary);
        writer
    }

    pub const fn sink(&self) -> Sink {
        self.sink
    }

    /// Append `entry` as one line.
    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_vec(entry) {
            Ok(mut line) => {
                line.push(b'\n');
                self.emit(&line);
            }
            Err(e) => {
                let _ = writeln!(io::stderr(), "[NDH-JSONL] serialize error: {e}");
            }
        }
    }

    pub fn flush(&mut self) {
        if self.log.as_mut().is_some_and(|log| log.out.flush().is_err()) {
            self.step_down();
        }
    }

    /// Flush and `fdatasync` the open file.
    pub fn sync(&mut self) {
        if let Some(log) = self.log.as_mut() {
            let _ = log.out.flush();
            let _ = log.out.get_ref().sync_data();
        }
    }

    // ──────────────────────── sinks ────────────────────────

    fn emit(&mut self, line: &[u8]) {
        let len = line.len() as u64;
        loop {
            match self.sink {
                Sink::Primary | Sink::Fallback => {
                    let max = self.config.max_size_bytes;
                    if self.log.as_ref().is_some_and(|log| log.len > 0 && log.len + len > max) {
                        self.roll();
                    }
                    if let Some(log) = self.log.as_mut()
                        && log.out.write_all(line).is_ok()
                    {
                        log.len += len;
                        return;
                    }
                    self.step_down();
                }
                Sink::Stderr => {
                    let mut err = io::stderr().lock();
                    let _ = err.write_all(b"[NDH-JSONL] ");
                    let _ = err.write_all(line);
                    return;
                }
                Sink::Discard => return,
            }
        }
    }

    /// Settle on the first file sink at or after `from` that opens; stderr
    /// otherwise.
    fn attach(&mut self, from: Sink) {
        let candidates = [
            (Sink::Primary, Some(self.config.path.clone())),
            (Sink::Fallback, self.config.fallback_path.clone()),
        ];
        for (sink, path) in candidates {
            let Some(path) = path.filter(|_| sink >= from) else {
                continue;
            };
            if let Ok(log) = OpenLog::append(path) {
                if sink == Sink::Fallback {
                    let _ = writeln!(
                        io::stderr(),
                        "[NDH-JSONL] activity log unavailable, using fallback {}",
                        log.path.display()
                    );
                }
                self.sink = sink;
                self.log = Some(log);
                return;
            }
        }

        let _ = writeln!(io::stderr(), "[NDH-JSONL] no writable log file, using stderr");
        self.sink = Sink::Stderr;
        self.log = None;
    }

    fn step_down(&mut self) {
        self.log = None;
        match self.sink {
            Sink::Primary => self.attach(Sink::Fallback),
            Sink::Fallback => self.attach(Sink::Stderr),
            Sink::Stderr | Sink::Discard => self.sink = Sink::Discard,
        }
    }

    fn roll(&mut self) {
        let Some(mut log) = self.log.take() else {
            return;
        };
        let _ = log.out.flush();
        let path = log.path;
        shift_generations(&path, self.config.max_rotated_files);
        match OpenLog::append(path) {
            Ok(fresh) => self.log = Some(fresh),
            Err(_) => self.step_down(),
        }
    }
}

/// `<file>.{keep-1}` → `<file>.{keep}` … `<file>` → `<file>.1`; the oldest
/// generation is overwritten.
fn shift_generations(path: &Path, keep: u32) {
    if keep == 0 {
        let _ = fs::remove_file(path);
        return;
    }
    for n in (1..keep).rev() {
        let _ = fs::rename(generation(path, n), generation(path, n + 1));
    }
    let _ = fs::rename(path, generation(path, 1));
}

fn generation(path: &Path, n: u32) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{n}"));
    PathBuf::from(name)
}

fn format_utc_now() -> String {
    crate::model::document::format_timestamp(chrono::Utc::now())
}

// ──────────────────────── tests ────────────────────────
