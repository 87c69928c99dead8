use crate::{
    channel::{ChannelFactory, FirehoseClient},
    engine::{
        aggregator::Outcome,
        service::config::{ProcessingMode, ProcessorErrorPolicy},
        streaming::{
            processor::{apply_processor, drive_stream, process_blocks},
            request::RequestTemplate,
        },
    },
    telemetry::{
        decrement_workers_inflight, increment_stream_failures, increment_workers_inflight,
        record_worker_duration,
    },
};
use firehose_extract_core::{
    BlockProcessor, BlockRange, FailureCause, ProcessorError, RawBlock, Record, StreamFailure,
    proto::bstream::{BlockResponseV2, BlocksRequestV2},
};
use portable_atomic::{AtomicU64, Ordering};
use std::{sync::Arc, time::Instant};
use tokio_util::sync::CancellationToken;
use tonic::{Status, codec::Streaming};

/// Where a worker gets its RPC client from.
#[derive(Clone)]
pub enum Connections {
    /// Every worker clones one client and multiplexes over its connection.
    Shared(FirehoseClient),
    /// Every worker opens its own connection.
    PerWorker(Arc<ChannelFactory>),
}

impl Connections {
    async fn client(&self) -> Result<FirehoseClient, FailureCause> {
        match self {
            Connections::Shared(client) => Ok(client.clone()),
            Connections::PerWorker(factory) => factory
                .connect_client()
                .await
                .map_err(|e| Status::unavailable(e.to_string()).into()),
        }
    }
}

/// Settings a worker needs to turn blocks into records.
#[derive(Clone)]
pub struct ProcessorSetup {
    pub processor: Arc<dyn BlockProcessor>,
    pub mode: ProcessingMode,
    pub errors: ProcessorErrorPolicy,
}

/// Streams one sub-range and processes its blocks.
///
/// A worker owns its range and its record accumulator; the only state shared
/// with other workers is the run-wide block counter and the cancellation
/// token.
pub struct StreamWorker {
    id: usize,
    range: BlockRange,
    template: Arc<RequestTemplate>,
    cancel: CancellationToken,
    progress: Arc<AtomicU64>,
}

impl StreamWorker {
    pub const fn new(
        id: usize,
        range: BlockRange,
        template: Arc<RequestTemplate>,
        cancel: CancellationToken,
        progress: Arc<AtomicU64>,
    ) -> Self {
        Self {
            id,
            range,
            template,
            cancel,
            progress,
        }
    }

    /// Streams the whole sub-range and returns its records in block order.
    ///
    /// The outcome carries a [`StreamFailure`] located at the awaited (or
    /// processed) block when the call cannot be opened, fails mid-stream, is
    /// cancelled, or when the processor rejects a block under
    /// [`ProcessorErrorPolicy::Abort`]. Its records then cover the blocks
    /// before that one.
    #[tracing::instrument(
        name = "stream_worker",
        skip_all,
        fields(worker_id = self.id, range = %self.range)
    )]
    pub async fn run(self, connections: Connections, setup: ProcessorSetup) -> Outcome<Record> {
        let started = Instant::now();
        increment_workers_inflight();
        tracing::info!("Worker {} streaming {} blocks", self.id, self.range.len());

        let outcome = match setup.mode {
            ProcessingMode::Inline => self.run_inline(&connections, &setup).await,
            ProcessingMode::Deferred => self.run_deferred(&connections, &setup).await,
        };

        decrement_workers_inflight();
        record_worker_duration(started.elapsed().as_millis() as f64);

        match &outcome.failure {
            None => tracing::info!(
                "Worker {} finished {} in {:?}, parsed {} rows of data",
                self.id,
                self.range,
                started.elapsed(),
                outcome.items.len()
            ),
            Some(failure) => {
                increment_stream_failures();
                tracing::error!(
                    "Worker {} failed: {failure} (kept {} rows of data)",
                    self.id,
                    outcome.items.len()
                );
            }
        }
        outcome
    }

    async fn run_inline(&self, connections: &Connections, setup: &ProcessorSetup) -> Outcome<Record> {
        let mut records = Vec::new();
        let streamed = self
            .stream(connections, |block| {
                apply_processor(setup.processor.as_ref(), &block, setup.errors, &mut records)
            })
            .await;

        Outcome {
            items: records,
            failure: streamed.err(),
        }
    }

    async fn run_deferred(&self, connections: &Connections, setup: &ProcessorSetup) -> Outcome<Record> {
        let mut blocks = Vec::new();
        let streamed = self
            .stream(connections, |block| {
                blocks.push(block);
                Ok(())
            })
            .await;

        tracing::debug!(
            "Worker {} buffered {} blocks, processing",
            self.id,
            blocks.len()
        );
        let mut records = Vec::new();
        let processed = process_blocks(
            self.range,
            &blocks,
            setup.processor.as_ref(),
            setup.errors,
            &mut records,
        );

        // Buffered blocks all precede a stream failure, so a processor
        // failure is always the earlier one.
        Outcome {
            items: records,
            failure: processed.err().or(streamed.err()),
        }
    }

    async fn stream<F>(&self, connections: &Connections, mut on_block: F) -> Result<u64, StreamFailure>
    where
        F: FnMut(RawBlock) -> Result<(), ProcessorError>,
    {
        let request = match self.template.build(self.range) {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(0),
            Err(e) => {
                return Err(StreamFailure::new(
                    self.range,
                    self.range.start(),
                    FailureCause::InvalidRequest(e.to_string()),
                ));
            }
        };

        let opened = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(FailureCause::Cancelled),
            opened = open(connections, request) => opened,
        };
        let responses = opened.map_err(|cause| {
            tracing::error!("Worker {} could not open stream: {cause}", self.id);
            StreamFailure::new(self.range, self.range.start(), cause)
        })?;

        let progress = Arc::clone(&self.progress);
        drive_stream(self.id, self.range, responses, &self.cancel, move |block| {
            progress.fetch_add(1, Ordering::Relaxed);
            on_block(block)
        })
        .await
    }
}

async fn open(
    connections: &Connections,
    request: BlocksRequestV2,
) -> Result<Streaming<BlockResponseV2>, FailureCause> {
    let mut client = connections.client().await?;
    let response = client.blocks(request).await?;
    Ok(response.into_inner())
}
