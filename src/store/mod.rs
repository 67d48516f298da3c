//! Durable storage for the aggregate document.

pub mod document;
