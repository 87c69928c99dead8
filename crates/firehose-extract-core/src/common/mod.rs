pub mod error;
pub mod processor;
pub mod types;

pub use error::{Error, FailureCause, ProcessorError, Result, StreamFailure};
pub use processor::{BlockProcessor, Records};
pub use types::{BlockRange, Chain, FilterExpression, RawBlock, Record, Scalar};
