#![deny(unsafe_code)]

//! Shared test utilities for the handyd workspace.
//!
//! Provides config builders, temp-dir fixtures, a daemon harness, and
//! tracing helpers so that individual crate tests stay concise.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! handyd-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod daemon;
pub mod http;
pub mod tracing_setup;
