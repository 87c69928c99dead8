//! Error types for block extraction.
//!
//! This module defines the central [`Error`] enum for everything that can stop
//! a run, plus the two failure types that are attributed to a precise location
//! in the requested block range:
//!
//! - [`StreamFailure`]: a sub-range stopped at a known block number. It carries
//!   enough context (range bounds and the awaited block) to resume by
//!   re-running only that sub-range.
//! - [`ProcessorError`]: a block processor rejected one block. The engine
//!   wraps it into a [`StreamFailure`] so the failing block is recorded.
//!
//! ## Error Cases
//! - `InvalidRange`: the block range ends before it starts.
//! - `Configuration`: invalid settings or an incompatible block processor.
//! - `Authentication`: no bearer token could be obtained.
//! - `Channel`: the gRPC channel could not be built or connected.
//! - `Stream`: a sub-range failed and the run was configured to fail fast.
//! - `Cancelled`: the run was cancelled before it completed.
//! - `Sink`: records could not be written out.

use crate::BlockRange;
use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for an extraction run.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// The requested block range ends before it starts.
    #[error("Invalid block range: end ({end}) is before start ({start})")]
    InvalidRange { start: u64, end: u64 },

    /// Settings or block processor are unusable. Raised before any network
    /// activity.
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    /// The authenticator could not produce a bearer token.
    #[error("Authentication error: {reason}")]
    Authentication { reason: String },

    /// The gRPC channel could not be built or connected.
    #[error("Channel error: {context}")]
    Channel { context: String },

    /// A sub-range failed while streaming.
    #[error(transparent)]
    Stream(#[from] StreamFailure),

    /// The run was cancelled.
    #[error("Run cancelled")]
    Cancelled,

    /// Records could not be written to the output.
    #[error("Sink error: {context}")]
    Sink { context: String },
}

impl Error {
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }
}

/// A sub-range that stopped before its last block.
///
/// `failed_block_num` is the block the worker was waiting for (or processing)
/// when it stopped: `range.start` plus the number of blocks fully handled.
/// The records of `[range.start, failed_block_num)` are kept by the run, so
/// re-running `[failed_block_num, range.end)` completes the sub-range
/// without gaps or duplicates.
#[derive(Clone, thiserror::Error, Debug)]
#[error("Stream for {range} failed at block #{failed_block_num}: {cause}")]
pub struct StreamFailure {
    pub range: BlockRange,
    pub failed_block_num: u64,
    pub cause: FailureCause,
}

impl StreamFailure {
    pub fn new(range: BlockRange, failed_block_num: u64, cause: impl Into<FailureCause>) -> Self {
        Self {
            range,
            failed_block_num,
            cause: cause.into(),
        }
    }

    /// The part of the sub-range that still has to be streamed.
    pub fn remaining(&self) -> BlockRange {
        BlockRange::new(self.failed_block_num.min(self.range.end()), self.range.end())
            .unwrap_or(self.range)
    }
}

/// Why a sub-range stopped.
#[derive(Clone, thiserror::Error, Debug)]
pub enum FailureCause {
    /// The remote call failed (transport error, deadline, server abort).
    #[error("rpc error: {}", .0.message())]
    Rpc(#[from] Status),

    /// The block processor rejected the block.
    #[error("processor error: {0}")]
    Processor(#[from] ProcessorError),

    /// The run was cancelled while the worker was waiting on the stream.
    #[error("cancelled")]
    Cancelled,

    /// The server closed the stream before the last block of the range.
    #[error("stream ended after {received} of {expected} blocks")]
    Truncated { received: u64, expected: u64 },

    /// No request could be built for the range.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The worker task ended abnormally (panic or runtime shutdown).
    #[error("worker aborted: {0}")]
    Aborted(String),
}

/// Error raised by a [`BlockProcessor`](crate::BlockProcessor) for one block.
#[derive(Clone, thiserror::Error, Debug)]
pub enum ProcessorError {
    /// The payload is not the protobuf message the processor expects.
    #[error("unexpected block type `{found}` (expected `{expected}`)")]
    UnexpectedType { expected: String, found: String },

    /// The payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// The block decoded but some of its content is unusable.
    #[error("malformed block content: {reason}")]
    Malformed { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_starts_at_failed_block() {
        let range = BlockRange::new(1000, 1100).unwrap();
        let failure = StreamFailure::new(range, 1050, Status::unavailable("gone"));
        assert_eq!(failure.remaining(), BlockRange::new(1050, 1100).unwrap());
    }

    #[test]
    fn display_names_range_and_block() {
        let range = BlockRange::new(1000, 1100).unwrap();
        let failure = StreamFailure::new(range, 1050, Status::deadline_exceeded("slow"));
        let msg = failure.to_string();
        assert!(msg.contains("[1000, 1100)"), "{msg}");
        assert!(msg.contains("#1050"), "{msg}");
        assert!(msg.contains("slow"), "{msg}");
    }
}
