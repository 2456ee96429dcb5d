//! # Tessera
//!
//! Library half of the `tessera` binary: CLI definitions, configuration
//! loading and report rendering, exposed for integration tests.

pub mod cli;
pub mod config;
pub mod report;
