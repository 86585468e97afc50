//! Domain types and pure logic for the dump import pipeline.
//!
//! Nothing in this crate performs network or database I/O. The pipeline
//! crate wires these building blocks to the remote host, the filesystem and
//! the target databases.

pub mod config;
pub mod error;
pub mod files;
pub mod freshness;
pub mod hashing;
pub mod patterns;
pub mod retry;
pub mod schedule;
pub mod status;
pub mod types;
