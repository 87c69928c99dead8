use core::time::Duration;

/// Default number of concurrent stream workers.
pub const DEFAULT_MAX_TASKS: usize = 20;

/// How long shutdown waits for cancelled workers to return.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Engine tuning for one extraction run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound on sub-ranges, and therefore on concurrent streams.
    pub max_tasks: usize,
    pub processing_mode: ProcessingMode,
    pub failure_policy: FailurePolicy,
    pub processor_errors: ProcessorErrorPolicy,
    pub connection_mode: ConnectionMode,
    pub shutdown_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_tasks: DEFAULT_MAX_TASKS,
            processing_mode: ProcessingMode::default(),
            failure_policy: FailurePolicy::default(),
            processor_errors: ProcessorErrorPolicy::default(),
            connection_mode: ConnectionMode::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

/// When the block processor runs relative to the stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProcessingMode {
    /// Each block is processed before the next one is requested.
    #[default]
    Inline,
    /// Blocks are buffered and processed once the sub-range has streamed.
    Deferred,
}

/// What the aggregator does when some sub-ranges failed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Keep records from successful workers and report the failed ranges.
    #[default]
    Partial,
    /// Report the first failure in worker order and discard every record.
    FailFast,
}

/// What a worker does when the processor rejects a block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProcessorErrorPolicy {
    /// Fail the sub-range at that block.
    #[default]
    Abort,
    /// Log the error and continue with the next block.
    Skip,
}

/// How stream workers obtain their RPC channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionMode {
    /// All workers multiplex over one channel.
    #[default]
    Shared,
    /// Every worker connects its own channel.
    PerWorker,
}
