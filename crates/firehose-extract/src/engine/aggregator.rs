//! Fan-in of worker outcomes.

use crate::engine::service::config::FailurePolicy;
use firehose_extract_core::{BlockRange, Record, StreamFailure};

/// What one worker produced.
///
/// `items` covers every block the worker handled. When it stopped early,
/// that is `[range.start, failure.failed_block_num)`, so the items and
/// [`StreamFailure::remaining`] together span the whole sub-range.
#[derive(Clone, Debug)]
pub struct Outcome<T> {
    pub items: Vec<T>,
    pub failure: Option<StreamFailure>,
}

impl<T> Outcome<T> {
    pub fn complete(items: Vec<T>) -> Self {
        Self {
            items,
            failure: None,
        }
    }

    pub fn failed(items: Vec<T>, failure: StreamFailure) -> Self {
        Self {
            items,
            failure: Some(failure),
        }
    }
}

/// Merged output of all workers.
#[derive(Clone, Debug, Default)]
pub struct Aggregated<T> {
    /// Items from every worker, in worker order. A failed worker contributes
    /// the items of the blocks it handled before stopping.
    pub items: Vec<T>,
    /// One entry per failed worker, in worker order.
    pub failures: Vec<StreamFailure>,
}

/// Result of an extraction run.
pub type RunResult = Aggregated<Record>;

impl<T> Aggregated<T> {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Ranges that still have to be streamed to complete the run.
    pub fn failed_ranges(&self) -> Vec<BlockRange> {
        self.failures.iter().map(StreamFailure::remaining).collect()
    }
}

/// Merges per-worker outcomes, given in worker order.
///
/// Outputs are concatenated in worker order, each keeping its own order.
/// Under [`FailurePolicy::Partial`] failures are collected next to the
/// items, and a failed worker's items are kept. Under
/// [`FailurePolicy::FailFast`] the first failure in worker order is returned
/// and every item is discarded.
///
/// The function is pure: the same outcomes always merge to the same result.
pub fn aggregate<T, I>(outcomes: I, policy: FailurePolicy) -> Result<Aggregated<T>, StreamFailure>
where
    I: IntoIterator<Item = Outcome<T>>,
{
    let mut merged = Aggregated {
        items: Vec::new(),
        failures: Vec::new(),
    };

    for Outcome { mut items, failure } in outcomes {
        match failure {
            Some(failure) if policy == FailurePolicy::FailFast => return Err(failure),
            Some(failure) => merged.failures.push(failure),
            None => {}
        }
        merged.items.append(&mut items);
    }

    Ok(merged)
}
