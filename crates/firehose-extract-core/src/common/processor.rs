//! The block processor contract.
//!
//! A [`BlockProcessor`] turns one [`RawBlock`] into zero or more [`Record`]s.
//! It is the only extension point of the engine: stream workers call it once
//! per received block, synchronously, and drain the returned iterator before
//! asking the server for the next block.
//!
//! Processors must be pure with respect to the block: calling `process` twice
//! on the same block yields the same records, and no state is carried from one
//! block to the next. The block is only ever borrowed.
//!
//! ## Declared block type
//!
//! [`BlockProcessor::block_type`] lets a processor declare the protobuf type
//! URL it decodes. The processor registry compares it with the chain's block
//! type before any connection is opened; a processor that declares nothing is
//! accepted with a warning.

use crate::{ProcessorError, RawBlock, Record};

/// Lazily produced records for one block.
pub type Records<'a> = Box<dyn Iterator<Item = Result<Record, ProcessorError>> + Send + 'a>;

pub trait BlockProcessor: Send + Sync {
    /// Registry key and log label.
    fn name(&self) -> &str;

    /// Type URL of the block message this processor decodes, if declared.
    fn block_type(&self) -> Option<&str> {
        None
    }

    /// Extracts records from `block`.
    ///
    /// An `Err` here, or from any item of the iterator, is attributed to
    /// `block.block_num()` by the caller.
    fn process<'a>(&'a self, block: &'a RawBlock) -> Result<Records<'a>, ProcessorError>;
}
