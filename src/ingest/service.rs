//! Ingest and summary orchestration, independent of any transport.
//!
//! Write path: admission check → validation → write guard →
//! {load → aggregate → save} → admission record. Read path: lock-free load
//! and projection. The HTTP server and the CLI both drive this type, so the
//! response bodies it produces are the wire contract.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Serialize, Serializer};
use serde_json::{Value, json};
use thiserror::Error;

use crate::core::config::Config;
use crate::core::errors::TelemetryError;
use crate::ingest::aggregate;
use crate::ingest::guard::WriteGuard;
use crate::ingest::rate_limit::{Admission, AdmissionControl, SlidingWindowLimiter, Unlimited};
use crate::ingest::validate::{ValidatedEvent, validate_body};
use crate::logger::activity::{ActivityEvent, ActivityLog};
use crate::model::document::AggregateCounts;
use crate::model::event::EventKind;
use crate::store::document::{DocumentStore, LoadSource};

/// `last_updated` rendering for a document no write has touched.
pub const NOT_AVAILABLE: &str = "N/A";

const GENERIC_INTERNAL_MESSAGE: &str = "internal error while storing event";

// ──────────────────── errors ────────────────────

/// Request-level failure, one variant per distinguishable wire reason.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed request body: {details}")]
    MalformedBody { details: String },

    #[error("unrecognized event type: {found}")]
    InvalidType { found: String },

    #[error(
        "rate limit exceeded: {in_window}/{limit} events in window, retry in {}s",
        .retry_after.as_secs()
    )]
    RateLimited {
        in_window: usize,
        limit: usize,
        retry_after: Duration,
    },

    #[error("document busy: write guard not acquired within {}ms", .waited.as_millis())]
    Busy { waited: Duration },

    #[error("internal error: {0}")]
    Internal(#[from] TelemetryError),
}

impl IngestError {
    /// Stable reason string carried in the response body.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::MalformedBody { .. } => "malformed_body",
            Self::InvalidType { .. } => "invalid_type",
            Self::RateLimited { .. } => "rate_limited",
            Self::Busy { .. } => "busy",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Whether the same request may succeed later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Busy { .. })
    }

    /// Advisory HTTP status; callers branch on the body, not on this.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::MalformedBody { .. } | Self::InvalidType { .. } => 400,
            Self::RateLimited { .. } => 429,
            Self::Busy { .. } => 503,
            Self::Internal(_) => 500,
        }
    }

    /// Caller-facing message; internal failures are not described on the wire.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => GENERIC_INTERNAL_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }

    /// `{status:"error", reason, message}` response body.
    #[must_use]
    pub fn to_body(&self) -> Value {
        json!({
            "status": "error",
            "reason": self.reason(),
            "message": self.public_message(),
        })
    }
}

// ──────────────────── responses ────────────────────

/// Result of a stored event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReceipt {
    pub event_type: EventKind,
    /// Raw-log length after the write.
    pub total_events: usize,
}

impl IngestReceipt {
    /// `{status:"ok", stored:true, total_events}` response body.
    #[must_use]
    pub fn to_body(&self) -> Value {
        json!({
            "status": "ok",
            "stored": true,
            "total_events": self.total_events,
        })
    }
}

/// Read-path projection. Raw events are never exposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub status: &'static str,
    pub counts: AggregateCounts,
    pub total_events: usize,
    #[serde(serialize_with = "serialize_last_updated")]
    pub last_updated: Option<String>,
}

impl Summary {
    #[must_use]
    pub fn last_updated_display(&self) -> &str {
        self.last_updated.as_deref().unwrap_or(NOT_AVAILABLE)
    }
}

fn serialize_last_updated<S: Serializer>(
    value: &Option<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(value.as_deref().unwrap_or(NOT_AVAILABLE))
}

// ──────────────────── service ────────────────────

/// Owns every collaborator of the write and read paths.
#[derive(Debug)]
pub struct IngestService {
    store: DocumentStore,
    guard: WriteGuard,
    admission: Arc<dyn AdmissionControl>,
    activity: ActivityLog,
    max_retained_events: usize,
}

impl IngestService {
    #[must_use]
    pub fn new(
        store: DocumentStore,
        guard: WriteGuard,
        admission: Arc<dyn AdmissionControl>,
        activity: ActivityLog,
        max_retained_events: usize,
    ) -> Self {
        Self {
            store,
            guard,
            admission,
            activity,
            max_retained_events,
        }
    }

    /// Service wired from configuration; constructed once per process.
    #[must_use]
    pub fn from_config(config: &Config, activity: ActivityLog) -> Self {
        let admission: Arc<dyn AdmissionControl> = if config.ingest.rate_limit_enabled {
            Arc::new(SlidingWindowLimiter::from_config(&config.ingest))
        } else {
            Arc::new(Unlimited)
        };
        Self::new(
            DocumentStore::new(&config.store.document_path),
            WriteGuard::for_document(&config.store.document_path, config.ingest.lock_timeout()),
            admission,
            activity,
            config.store.max_retained_events,
        )
    }

    #[must_use]
    pub const fn store(&self) -> &DocumentStore {
        &self.store
    }

    #[must_use]
    pub const fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    /// Run one request body through the write path.
    pub fn ingest(&self, body: &[u8]) -> Result<IngestReceipt, IngestError> {
        let started = Instant::now();

        if let Admission::Limited {
            in_window,
            limit,
            retry_after,
        } = self.admission.check()
        {
            return Err(self.rejected(IngestError::RateLimited {
                in_window,
                limit,
                retry_after,
            }));
        }

        let ValidatedEvent { event, raw } = validate_body(body).map_err(|e| self.rejected(e))?;

        let total_events = {
            let _lease = self.guard.acquire().map_err(|e| match e {
                IngestError::Internal(error) => self.failed(error),
                other => self.rejected(other),
            })?;

            let loaded = self.store.load_with_source();
            if let LoadSource::Recovered { details } = loaded.source {
                self.activity.record(ActivityEvent::DocumentRecovered {
                    details: format!("{}: {details}", self.store.path().display()),
                });
            }

            let mut document = loaded.document;
            aggregate::apply(&mut document, &event, raw, self.max_retained_events);
            self.store.save(&document).map_err(|e| self.failed(e))?;
            document.total_events()
        };

        self.admission.record();

        let receipt = IngestReceipt {
            event_type: event.kind(),
            total_events,
        };
        self.activity.record(ActivityEvent::EventStored {
            event_type: receipt.event_type.to_string(),
            dataset: event.dataset().map(str::to_string),
            total_events,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        });
        Ok(receipt)
    }

    /// Current counters without taking the write guard.
    #[must_use]
    pub fn summary(&self) -> Summary {
        let document = self.store.load();
        Summary {
            status: "ok",
            total_events: document.total_events(),
            last_updated: document.last_updated,
            counts: document.counts,
        }
    }

    fn rejected(&self, error: IngestError) -> IngestError {
        self.activity.record(ActivityEvent::EventRejected {
            reason: error.reason().to_string(),
            details: error.to_string(),
        });
        error
    }

    fn failed(&self, error: TelemetryError) -> IngestError {
        self.activity.record(ActivityEvent::from_error(&error));
        IngestError::Internal(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::document::TelemetryDocument;
    use std::fs;

    fn service_in(dir: &tempfile::TempDir, max_events: usize) -> IngestService {
        IngestService::new(
            DocumentStore::new(dir.path().join("telemetry.json")),
            WriteGuard::new(Duration::from_millis(200)),
            Arc::new(SlidingWindowLimiter::new(Duration::from_secs(60), max_events)),
            ActivityLog::disabled(),
            100,
        )
    }

    #[test]
    fn stored_event_returns_new_total() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = service_in(&dir, 100);
        let receipt = service
            .ingest(br#"{"type":"download","dataset":"HBN","succeeded":true}"#)
            .expect("ingest");
        assert_eq!(receipt.total_events, 1);
        assert_eq!(receipt.event_type, EventKind::Download);
        assert_eq!(receipt.to_body(), json!({"status": "ok", "stored": true, "total_events": 1}));
    }

    #[test]
    fn rejected_requests_do_not_touch_the_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = service_in(&dir, 100);
        let err = service.ingest(br#"{"type":"heartbeat"}"#).expect_err("invalid type");
        assert_eq!(err.reason(), "invalid_type");
        assert_eq!(err.status_code(), 400);
        assert!(!service.store().path().exists());
    }

    #[test]
    fn rejected_requests_do_not_consume_rate_limit_capacity() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = service_in(&dir, 1);
        for _ in 0..5 {
            assert!(service.ingest(b"not json").is_err());
        }
        service
            .ingest(br#"{"type":"feedback","feedback_rating":"Good"}"#)
            .expect("first valid event admitted");
        let err = service
            .ingest(br#"{"type":"feedback"}"#)
            .expect_err("second event limited");
        assert_eq!(err.reason(), "rate_limited");
        assert_eq!(err.status_code(), 429);
        assert!(err.is_retryable());
        assert_eq!(service.summary().total_events, 1);
    }

    #[test]
    fn save_failure_is_internal_and_generic_on_the_wire() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "file").expect("write blocker");
        let service = IngestService::new(
            DocumentStore::new(blocker.join("telemetry.json")),
            WriteGuard::new(Duration::from_millis(200)),
            Arc::new(Unlimited),
            ActivityLog::disabled(),
            100,
        );
        let err = service
            .ingest(br#"{"type":"download"}"#)
            .expect_err("save must fail");
        assert_eq!(err.reason(), "internal_error");
        assert!(!err.is_retryable());
        let body = err.to_body();
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], GENERIC_INTERNAL_MESSAGE);
        assert!(!body.to_string().contains("blocker"));
    }

    #[test]
    fn busy_when_guard_is_held() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = service_in(&dir, 100);
        let _lease = service.guard.acquire().expect("hold guard");
        let err = service
            .ingest(br#"{"type":"download"}"#)
            .expect_err("guard held");
        assert_eq!(err.reason(), "busy");
        assert_eq!(err.status_code(), 503);
    }

    #[test]
    fn summary_of_fresh_store_reports_na() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = service_in(&dir, 100);
        let summary = service.summary();
        assert_eq!(summary.total_events, 0);
        assert_eq!(summary.last_updated_display(), NOT_AVAILABLE);
        let body = serde_json::to_value(&summary).expect("serialize summary");
        assert_eq!(body["status"], "ok");
        assert_eq!(body["last_updated"], "N/A");
        assert!(body.get("events").is_none());
    }

    #[test]
    fn corrupt_document_is_replaced_by_next_write() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = service_in(&dir, 100);
        fs::write(service.store().path(), "{{{{").expect("corrupt doc");

        let receipt = service
            .ingest(br#"{"type":"download","dataset":"HBN","succeeded":false}"#)
            .expect("ingest over corrupt doc");
        assert_eq!(receipt.total_events, 1);

        let raw = fs::read_to_string(service.store().path()).expect("read doc");
        let doc: TelemetryDocument = serde_json::from_str(&raw).expect("well-formed doc");
        assert_eq!(doc.counts.total_failed_runs, 1);
    }
}
