//! Generated Protobuf bindings for the Firehose block stream.
//!
//! ## Service
//!
//! - [`bstream::block_stream_v2_client::BlockStreamV2Client`] - client for the
//!   server-streaming `Blocks` call.
//! - [`bstream::block_stream_v2_server`] - server trait, used by in-process
//!   test doubles.
//!
//! ## Message Format
//!
//! - [`bstream::BlocksRequestV2`] - block range, fork steps and the
//!   include/exclude filter expressions evaluated server-side.
//! - [`bstream::BlockResponseV2`] - envelope carrying one block as a
//!   `google.protobuf.Any`. The engine never decodes it; block processors do.
//!
//! The wire `stop_block_num` is inclusive, and `0` means "never stop". Use
//! [`crate::BlockRange`] to build requests rather than filling the numbers by
//! hand.
//!
//! See `proto/` for the full schemas.

/// `dfuse.bstream.v1`: the `BlockStreamV2` service and its envelopes.
pub mod bstream {
    tonic::include_proto!("dfuse.bstream.v1");
}

/// `dfuse.eosio.codec.v1`: EOSIO block model (trimmed to what the built-in
/// processors read).
pub mod codec {
    tonic::include_proto!("dfuse.eosio.codec.v1");
}

/// Type URL of an EOSIO block packed in a `google.protobuf.Any`.
pub const EOSIO_BLOCK_TYPE_URL: &str = "type.googleapis.com/dfuse.eosio.codec.v1.Block";
