//! Entry point of the extraction engine.
//!
//! [`Extractor`] ties the pieces of a run together: it splits the requested
//! period, hands the sub-ranges to the [`WorkerPool`], waits for every worker
//! and merges their outcomes according to the configured
//! [`FailurePolicy`](crate::engine::service::config::FailurePolicy).
//!
//! ## Responsibilities
//!
//! - Reject invalid periods and settings before any stream is opened.
//! - Fan out one stream per sub-range and fan the results back in.
//! - Expose a cancellation token so callers can stop a run from outside.

use crate::engine::{
    aggregator::{RunResult, aggregate},
    pool::{
        manager::WorkerPool,
        worker::{Connections, ProcessorSetup},
    },
    service::config::EngineConfig,
    streaming::{coordinator::split, request::RequestTemplate},
};
use firehose_extract_core::{BlockProcessor, Error, Result};
use std::{sync::Arc, time::Instant};
use tokio_util::sync::CancellationToken;

/// Runs extractions over a block period with a fixed processor.
pub struct Extractor {
    config: EngineConfig,
    pool: WorkerPool,
    setup: ProcessorSetup,
}

impl Extractor {
    pub fn new(
        config: EngineConfig,
        connections: Connections,
        template: RequestTemplate,
        processor: Arc<dyn BlockProcessor>,
    ) -> Self {
        let pool = WorkerPool::new(
            connections,
            template,
            CancellationToken::new(),
            config.shutdown_timeout,
        );
        let setup = ProcessorSetup {
            processor,
            mode: config.processing_mode,
            errors: config.processor_errors,
        };

        Self {
            config,
            pool,
            setup,
        }
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Cancels any run in progress and every later one.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    /// Blocks received by all workers so far.
    pub fn blocks_streamed(&self) -> u64 {
        self.pool.blocks_streamed()
    }

    /// Extracts records for `[period_start, period_end)`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRange`] or [`Error::Configuration`] when the period
    ///   or `max_tasks` is unusable, or when a sub-range cannot be expressed
    ///   as a request. Nothing is streamed in that case.
    /// - [`Error::Cancelled`] when the extractor was shut down before the run
    ///   started.
    /// - [`Error::Stream`] with the first failure in worker order under
    ///   fail-fast.
    ///
    /// Under the partial policy failed sub-ranges are reported in
    /// [`RunResult::failures`] and the call itself succeeds. The records a
    /// failed worker produced before stopping are kept.
    #[tracing::instrument(name = "extract", skip(self))]
    pub async fn run(&self, period_start: u64, period_end: u64) -> Result<RunResult> {
        let ranges = split(period_start, period_end, self.config.max_tasks)?;

        if self.pool.is_shutdown() {
            return Err(Error::Cancelled);
        }
        for range in &ranges {
            self.pool.template().build(*range)?;
        }

        tracing::info!(
            "Streaming {} blocks with {} tasks using `{}`",
            period_end - period_start,
            ranges.len(),
            self.setup.processor.name()
        );

        let started = Instant::now();
        let outcomes = self.pool.run(&ranges, &self.setup).await;
        let result = aggregate(outcomes, self.config.failure_policy)?;

        tracing::info!(
            "Streamed {} blocks in {:?}: {} records, {} failed ranges",
            self.pool.blocks_streamed(),
            started.elapsed(),
            result.items.len(),
            result.failures.len()
        );

        Ok(result)
    }
}
