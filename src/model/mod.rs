//! Data model: event payloads and the aggregate document.

pub mod document;
pub mod event;
