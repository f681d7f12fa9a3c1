//! Sales Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared plumbing for the sales pipeline workspace members.
//!
//! - **Error Handling**: [`CommonError`] and the [`Result`] alias
//! - **Environment**: typed lookups of environment-style configuration
//! - **Logging**: tracing subscriber setup shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use sales_common::env;
//!
//! fn port() -> sales_common::Result<u16> {
//!     env::parse_or("PG_PORT", 5432)
//! }
//! ```

pub mod env;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{CommonError, Result};
