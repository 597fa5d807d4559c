//! Observability for the ingestion services.
//!
//! # Features
//! - Structured JSON or pretty logging selected by `LOG_FORMAT`
//! - Run events with a consistent schema for every connector run

pub mod init;
pub mod run_events;

pub use init::*;
pub use run_events::*;

// Re-export tracing for convenience
pub use tracing::{debug, error, info, instrument, warn, Instrument, Level};
