use crate::engine::service::config::ProcessorErrorPolicy;
use crate::telemetry::{increment_blocks_streamed, increment_records_emitted};
use firehose_extract_core::{
    BlockProcessor, BlockRange, FailureCause, ProcessorError, RawBlock, Record, StreamFailure,
    proto::bstream::BlockResponseV2,
};
use futures::Stream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tonic::Status;

/// Consumes one `Blocks` response stream for `range`, handing every block to
/// `on_block` in delivery order.
///
/// Blocks are numbered with a local counter that starts at `range.start()`
/// and advances once per received response. The counter is what failures
/// report: on an RPC error it names the block that was being awaited; when
/// `on_block` fails it names the block being handled.
///
/// # Behavior
///
/// - Stops after `range.len()` blocks even if the server keeps sending. This
///   matters for `[0, 1)`, whose inclusive wire stop block is `0`, which the
///   protocol reads as "never stop".
/// - A stream the server closes before the last block is a
///   [`FailureCause::Truncated`] failure at the first block not received.
/// - Every wait on the stream races `cancel`. Cancellation returns a
///   [`FailureCause::Cancelled`] failure at the awaited block; dropping the
///   stream closes the call.
/// - Responses without a payload are counted and skipped.
///
/// Returns the number of blocks received.
pub async fn drive_stream<S, F>(
    worker_id: usize,
    range: BlockRange,
    responses: S,
    cancel: &CancellationToken,
    mut on_block: F,
) -> Result<u64, StreamFailure>
where
    S: Stream<Item = Result<BlockResponseV2, Status>>,
    F: FnMut(RawBlock) -> Result<(), ProcessorError>,
{
    tokio::pin!(responses);
    let mut current_block_number = range.start();

    while current_block_number < range.end() {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!(worker_id, "Cancelled while awaiting block #{current_block_number}");
                return Err(StreamFailure::new(range, current_block_number, FailureCause::Cancelled));
            }
            next = responses.next() => next,
        };

        let response = match next {
            Some(Ok(response)) => response,
            Some(Err(status)) => {
                tracing::error!(
                    worker_id,
                    "Failed to process block number #{current_block_number}: {}",
                    status.message()
                );
                return Err(StreamFailure::new(range, current_block_number, status));
            }
            None => break,
        };

        let block_num = current_block_number;
        current_block_number += 1;
        increment_blocks_streamed(1);

        tracing::debug!(
            worker_id,
            "Getting block number #{block_num} ({} blocks remaining)...",
            range.end() - current_block_number
        );

        let Some(payload) = response.block else {
            tracing::warn!(worker_id, "Block #{block_num} arrived without a payload");
            continue;
        };

        on_block(RawBlock::new(block_num, payload))
            .map_err(|e| StreamFailure::new(range, block_num, e))?;
    }

    let received = current_block_number - range.start();
    if received < range.len() {
        tracing::error!(
            worker_id,
            "Stream for {range} closed after {received} of {} blocks",
            range.len()
        );
        return Err(StreamFailure::new(
            range,
            current_block_number,
            FailureCause::Truncated {
                received,
                expected: range.len(),
            },
        ));
    }
    Ok(received)
}

/// Runs `processor` on one block and drains its records into `out`.
///
/// Under [`ProcessorErrorPolicy::Skip`] a failing block contributes no
/// records and the error is only logged. Under
/// [`ProcessorErrorPolicy::Abort`] the error is returned for the caller to
/// attribute to the block.
pub fn apply_processor(
    processor: &dyn BlockProcessor,
    block: &RawBlock,
    policy: ProcessorErrorPolicy,
    out: &mut Vec<Record>,
) -> Result<(), ProcessorError> {
    let before = out.len();
    let result = processor.process(block).and_then(|records| {
        for record in records {
            out.push(record?);
        }
        Ok(())
    });

    match result {
        Ok(()) => {
            increment_records_emitted((out.len() - before) as u64);
            Ok(())
        }
        Err(e) => {
            out.truncate(before);
            match policy {
                ProcessorErrorPolicy::Abort => Err(e),
                ProcessorErrorPolicy::Skip => {
                    tracing::warn!(
                        "Skipping block #{} after `{}` failed: {e}",
                        block.block_num(),
                        processor.name()
                    );
                    Ok(())
                }
            }
        }
    }
}

/// Runs `processor` over blocks that were buffered while streaming `range`,
/// appending to `out`.
///
/// Used in deferred mode. On failure `out` holds the records of every block
/// before the failing one, and the failure keeps its sub-range and block
/// number.
pub fn process_blocks(
    range: BlockRange,
    blocks: &[RawBlock],
    processor: &dyn BlockProcessor,
    policy: ProcessorErrorPolicy,
    out: &mut Vec<Record>,
) -> Result<(), StreamFailure> {
    for block in blocks {
        apply_processor(processor, block, policy, out)
            .map_err(|e| StreamFailure::new(range, block.block_num(), e))?;
    }

    tracing::debug!(
        "Finished processing {range}, parsed {} rows of data",
        out.len()
    );
    Ok(())
}
