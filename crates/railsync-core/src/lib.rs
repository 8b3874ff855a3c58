// Public fallible APIs in this crate share one concrete error contract (`RailError`).
// Repeating per-function `# Errors` boilerplate obscures behavior more than it clarifies.
#![allow(
    clippy::missing_errors_doc,
    reason = "crate-wide fallible API uses one explicit error type; per-item boilerplate would duplicate contract"
)]

pub mod artifacts;
pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod normalize;
pub mod plan;
pub mod report;
pub mod status;
pub mod sweeper;
pub mod upload;

pub use client::RailClient;
pub use config::RailConfig;
pub use error::{RailError, Result};
