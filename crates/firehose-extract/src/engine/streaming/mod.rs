//! Per-range streaming logic.
//!
//! ## Submodules
//!
//! - [`coordinator`] - Splits the requested period into contiguous sub-ranges,
//!   one per stream worker.
//! - [`request`] - Builds the `BlocksRequestV2` sent for each sub-range.
//! - [`processor`] - Drives one response stream, numbering blocks and handing
//!   them to the configured block processor.

pub mod coordinator;
pub mod processor;
pub mod request;
