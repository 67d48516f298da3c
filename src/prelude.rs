//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use neurodatahub_telemetry::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{Result, TelemetryError};

// Model
pub use crate::model::document::{AggregateCounts, DatasetCounts, FeedbackCounts, TelemetryDocument};
pub use crate::model::event::{Event, EventKind, FeedbackLevel};

// Store
pub use crate::store::document::DocumentStore;

// Ingest
pub use crate::ingest::guard::WriteGuard;
pub use crate::ingest::rate_limit::{AdmissionControl, SlidingWindowLimiter};
pub use crate::ingest::{IngestError, IngestReceipt, IngestService, Summary};

// Logging
pub use crate::logger::activity::{ActivityEvent, ActivityLog};

// Export
#[cfg(feature = "sqlite")]
pub use crate::export::{ExportReport, Exporter};
