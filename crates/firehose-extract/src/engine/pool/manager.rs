//! Fan-out of stream workers over the sub-ranges of a run.
//!
//! [`WorkerPool`] spawns one Tokio task per sub-range and waits for all of
//! them before returning. Outcomes come back in sub-range order regardless of
//! completion order, which is what makes aggregation deterministic.

use crate::engine::{
    aggregator::Outcome,
    pool::worker::{Connections, ProcessorSetup, StreamWorker},
    streaming::request::RequestTemplate,
};
use core::time::Duration;
use firehose_extract_core::{BlockRange, FailureCause, Record, StreamFailure};
use portable_atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Records of one worker, and where and why it stopped if it did.
pub type WorkerOutcome = Outcome<Record>;

pub struct WorkerPool {
    connections: Connections,
    template: Arc<RequestTemplate>,
    shutdown_token: CancellationToken,
    shutdown_timeout: Duration,
    progress: Arc<AtomicU64>,
}

impl WorkerPool {
    pub fn new(
        connections: Connections,
        template: RequestTemplate,
        shutdown_token: CancellationToken,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            connections,
            template: Arc::new(template),
            shutdown_token,
            shutdown_timeout,
            progress: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn template(&self) -> &RequestTemplate {
        &self.template
    }

    /// Blocks received by all workers since the pool was created.
    pub fn blocks_streamed(&self) -> u64 {
        self.progress.load(Ordering::Relaxed)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Cancels every in-flight worker. Each one drops its stream and reports
    /// a cancelled failure at the block it was awaiting.
    pub fn shutdown(&self) {
        tracing::info!("Cancelling in-flight streams");
        self.shutdown_token.cancel();
    }

    /// Streams every range concurrently and returns one outcome per range,
    /// in range order.
    ///
    /// This is the run's only join point. Once the pool is shut down, workers
    /// get `shutdown_timeout` to return before their tasks are aborted; an
    /// aborted or panicked task is reported as [`FailureCause::Aborted`] at
    /// the start of its range, and the records it had produced are lost.
    pub async fn run(&self, ranges: &[BlockRange], setup: &ProcessorSetup) -> Vec<WorkerOutcome> {
        let handles: Vec<_> = ranges
            .iter()
            .enumerate()
            .map(|(worker_id, range)| {
                let worker = StreamWorker::new(
                    worker_id,
                    *range,
                    Arc::clone(&self.template),
                    self.shutdown_token.child_token(),
                    Arc::clone(&self.progress),
                );
                tokio::spawn(worker.run(self.connections.clone(), setup.clone()))
            })
            .collect();

        let abort_handles: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        let joined = futures::future::join_all(handles);
        tokio::pin!(joined);

        let drain_deadline = async {
            self.shutdown_token.cancelled().await;
            sleep(self.shutdown_timeout).await;
        };

        let results = tokio::select! {
            results = &mut joined => results,
            () = drain_deadline => {
                tracing::warn!(
                    "Workers did not stop within {:?} of shutdown, aborting",
                    self.shutdown_timeout
                );
                for handle in &abort_handles {
                    handle.abort();
                }
                joined.await
            }
        };

        results
            .into_iter()
            .zip(ranges)
            .map(|(result, range)| {
                result.unwrap_or_else(|e| {
                    tracing::error!("Worker for {range} did not complete: {e}");
                    Outcome::failed(
                        Vec::new(),
                        StreamFailure::new(
                            *range,
                            range.start(),
                            FailureCause::Aborted(e.to_string()),
                        ),
                    )
                })
            })
            .collect()
    }
}
