//! Operator-triggered offline projection of the aggregate document.

pub mod sqlite;

pub use sqlite::{ExportReport, Exporter, run_export};
