//! Concurrent block-range streaming engine.
//!
//! A run flows through the submodules in this order:
//!
//! - [`streaming`] - Period splitting, request building and the per-stream
//!   loop.
//! - [`pool`] - One stream worker per sub-range, joined at a single barrier.
//! - [`aggregator`] - Merges worker outcomes in worker order.
//! - [`service`] - Configuration and the [`Extractor`] that drives a run.

pub mod aggregator;
pub mod pool;
pub mod service;
pub mod streaming;

pub use aggregator::{Aggregated, Outcome, RunResult};
pub use pool::worker::Connections;
pub use service::{
    config::{
        ConnectionMode, EngineConfig, FailurePolicy, ProcessingMode, ProcessorErrorPolicy,
    },
    handler::Extractor,
};
