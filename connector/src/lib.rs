//! Connector execution engine.
//!
//! Runs data-source connectors on demand, stores the content they find and
//! hands changed documents to the chunking stage.

pub mod connectors;
pub mod services;
