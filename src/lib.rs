#![forbid(unsafe_code)]

//! NeuroDataHub telemetry backend: receives anonymized usage and feedback
//! events from CLI clients and maintains one durable aggregate document.
//!
//! Write path: sliding-window admission control, validation, then a guarded
//! load → aggregate → atomic save. Read path: lock-free projection of the
//! counters. An offline exporter flattens the document into SQLite tables.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use neurodatahub_telemetry::prelude::*;
//!
//! let config = Config::load(None)?;
//! let service = IngestService::from_config(&config, ActivityLog::disabled());
//! let receipt = service.ingest(br#"{"type":"download","dataset":"HBN","succeeded":true}"#);
//! # Ok::<(), TelemetryError>(())
//! ```

pub mod prelude;

pub mod core;
#[cfg(feature = "sqlite")]
pub mod export;
pub mod ingest;
pub mod logger;
pub mod model;
#[cfg(feature = "server")]
pub mod server;
pub mod store;
