//! The dump import pipeline: remote retrieval, archive extraction, database
//! loading, status tracking and the orchestrator that ties them together.

pub mod cache;
pub mod checkpoint;
pub mod extractor;
pub mod loader;
pub mod orchestrator;
pub mod remote;
pub mod staging;
pub mod tracker;

pub use orchestrator::{ImportOrchestrator, RunOutcome};
pub use tracker::StatusTracker;
