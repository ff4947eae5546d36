//! Logging and diagnostic deduplication for request data access.
//!
//! This crate provides:
//! - `StructuredLogger` - Structured logging with request context
//! - `LogBuilder` - Fluent log entries with typed fields
//! - `CallsiteDedup` - Once-per-process suppression of repeated warnings

mod dedup;
mod logging;

pub use dedup::*;
pub use logging::*;

// Re-export RequestId from edge-core for convenience
pub use edge_core::RequestId;
