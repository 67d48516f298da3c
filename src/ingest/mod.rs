//! Write and read paths: admission control, validation, aggregation, and the
//! guarded persist sequence.

pub mod aggregate;
pub mod guard;
pub mod rate_limit;
pub mod service;
pub mod validate;

pub use service::{IngestError, IngestReceipt, IngestService, Summary};
