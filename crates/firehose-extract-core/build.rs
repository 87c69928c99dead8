/// Builds the gRPC client and server code for the Firehose protocol definitions
/// using `tonic-prost-build`.
///
/// Two packages are compiled from `proto/`:
///
/// - `dfuse.bstream.v1` - the `BlockStreamV2` streaming service and its
///   request/response envelopes.
/// - `dfuse.eosio.codec.v1` - the subset of the EOSIO block model read by the
///   built-in block processors.
///
/// # Byte Field Optimization
///
/// `Action.raw_data` is marked with `.bytes(...)` so it decodes into `Bytes`
/// instead of `Vec<u8>`. Raw action payloads are never inspected by the
/// built-in processors, so sharing the decode buffer avoids a copy per action.
///
/// # Output
///
/// Generated code is exposed through `firehose_extract_core::proto`:
///
/// ```rust
/// pub mod bstream {
///     tonic::include_proto!("dfuse.bstream.v1");
/// }
/// ```
///
/// The server half of `BlockStreamV2` is generated as well; it is what the
/// in-process mock Firehose used by the integration tests implements.
fn main() {
    let mut config = tonic_prost_build::Config::new();

    // Ensure raw action payloads are treated as `Bytes`, not `Vec<u8>`
    config.bytes([".dfuse.eosio.codec.v1.Action.raw_data"]);

    tonic_prost_build::configure()
        .compile_with_config(
            config,
            &[
                "proto/dfuse/bstream/v1/bstream.proto",
                "proto/dfuse/eosio/codec/v1/codec.proto",
            ],
            &["proto"],
        )
        .unwrap();
}
