//! Engine configuration and the [`Extractor`](handler::Extractor) entry
//! point.
//!
//! ## Structure
//!
//! - [`config`] - Concurrency, processing, failure and connection settings.
//! - [`handler`] - Splits a period, runs the workers and merges their
//!   outcomes.

pub mod config;
pub mod handler;
