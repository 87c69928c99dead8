//! Block processors: built-in implementations and lookup by name.
//!
//! - [`eos`] - `transfers`, `actions` and `headers` for EOSIO chains.
//! - [`registry`] - [`ProcessorRegistry`], resolving `--custom-processor`
//!   names and checking block type compatibility.

pub mod eos;
pub mod registry;

pub use registry::{DEFAULT_PROCESSOR, ProcessorRegistry};
