//! Harvest Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling, logging, and environment-driven configuration for
//! the Harvest workspace members.
//!
//! # Example
//!
//! ```no_run
//! use harvest_common::{env, Result};
//!
//! fn worker_count() -> Result<usize> {
//!     env::load_env_file("run.env")?;
//!     env::parse_or("NUM_PROCESSES", 1)
//! }
//! ```

pub mod env;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{HarvestError, Result};
