//! Concurrent stream workers.
//!
//! ## Submodules
//!
//! - [`worker`] - One sub-range: open the call, drive the stream, process
//!   blocks.
//! - [`manager`] - Spawns one worker per sub-range, joins them all and
//!   handles shutdown.

pub mod manager;
pub mod worker;
