//! Vizcast Common Utilities
//!
//! Shared infrastructure for all Vizcast crates:
//! - Error types and result aliases
//! - Recording clock, presentation timestamps, and output naming
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
