//! Shared activity log handle used by the ingest service, server, and CLI.
//!
//! Writes are synchronous under a mutex and flushed per entry; the service's
//! event rate is bounded by admission control, so no background thread is
//! needed.

#![allow(missing_docs)]

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::config::LoggingConfig;
use crate::core::errors::TelemetryError;
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

// ──────────────────── public event type ────────────────────

/// Activity the service reports.
#[derive(Debug, Clone)]
pub enum ActivityEvent {
    ServerStarted {
        bind_addr: String,
        config_hash: String,
    },
    ServerStopped {
        uptime_secs: u64,
    },
    EventStored {
        event_type: String,
        dataset: Option<String>,
        total_events: usize,
        duration_ms: u64,
    },
    EventRejected {
        reason: String,
        details: String,
    },
    DocumentRecovered {
        details: String,
    },
    ExportCompleted {
        events_written: usize,
        summary_rows: usize,
        duration_ms: u64,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ActivityEvent {
    /// Error event carrying the stable code of `error`.
    #[must_use]
    pub fn from_error(error: &TelemetryError) -> Self {
        Self::Error {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }

    fn into_entry(self) -> LogEntry {
        match self {
            Self::ServerStarted {
                bind_addr,
                config_hash,
            } => {
                let mut e = LogEntry::new(EventType::ServerStart, Severity::Info);
                e.details = Some(format!(
                    "version={} bind={bind_addr} config_hash={config_hash}",
                    env!("CARGO_PKG_VERSION")
                ));
                e
            }
            Self::ServerStopped { uptime_secs } => {
                let mut e = LogEntry::new(EventType::ServerStop, Severity::Info);
                e.details = Some(format!("uptime_secs={uptime_secs}"));
                e
            }
            Self::EventStored {
                event_type,
                dataset,
                total_events,
                duration_ms,
            } => {
                let mut e = LogEntry::new(EventType::EventStored, Severity::Info);
                e.event_type = Some(event_type);
                e.dataset = dataset;
                e.total_events = Some(total_events);
                e.duration_ms = Some(duration_ms);
                e
            }
            Self::EventRejected { reason, details } => {
                let mut e = LogEntry::new(EventType::EventRejected, Severity::Warning);
                e.reason = Some(reason);
                e.details = Some(details);
                e
            }
            Self::DocumentRecovered { details } => {
                let mut e = LogEntry::new(EventType::DocumentRecovered, Severity::Warning);
                e.details = Some(details);
                e
            }
            Self::ExportCompleted {
                events_written,
                summary_rows,
                duration_ms,
            } => {
                let mut e = LogEntry::new(EventType::ExportComplete, Severity::Info);
                e.total_events = Some(events_written);
                e.duration_ms = Some(duration_ms);
                e.details = Some(format!("summary_rows={summary_rows}"));
                e
            }
            Self::Error { code, message } => {
                let mut e = LogEntry::new(EventType::Error, Severity::Critical);
                e.error_code = Some(code);
                e.error_message = Some(message);
                e
            }
        }
    }
}

// ──────────────────── handle ────────────────────

/// Cheaply-cloneable handle to one JSONL writer; a disabled handle drops everything.
#[derive(Debug, Clone, Default)]
pub struct ActivityLog {
    writer: Option<Arc<Mutex<JsonlWriter>>>,
}

impl ActivityLog {
    /// Open the writer described by `config`. Never fails: an unusable path
    /// degrades to the fallback, then stderr.
    #[must_use]
    pub fn open(config: &LoggingConfig) -> Self {
        Self::with_writer(JsonlWriter::open(JsonlConfig::from(config)))
    }

    #[must_use]
    pub fn with_writer(writer: JsonlWriter) -> Self {
        Self {
            writer: Some(Arc::new(Mutex::new(writer))),
        }
    }

    /// Handle that discards every event.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { writer: None }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.writer.is_some()
    }

    /// Record one event as a single flushed line.
    pub fn record(&self, event: ActivityEvent) {
        let Some(writer) = &self.writer else {
            return;
        };
        let entry = event.into_entry();
        let mut writer = writer.lock();
        writer.write_entry(&entry);
        writer.flush();
    }

    /// Flush and fsync; called on shutdown.
    pub fn sync(&self) {
        if let Some(writer) = &self.writer {
            writer.lock().sync();
        }
    }
}
