//! Building `BlocksRequestV2` messages for stream workers.
//!
//! A [`RequestTemplate`] holds everything that is identical across the
//! sub-ranges of a run: fork steps, filter expressions and the optional
//! irreversibility condition. Workers stamp their own block bounds onto it.
//!
//! Precedence, lowest first: template defaults, then [`RequestOverrides`].

use firehose_extract_core::{
    BlockRange, Error, FilterExpression, Result,
    proto::bstream::{BlocksRequestV2, ForkStep},
};

/// Per-run request parameters shared by every worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestTemplate {
    fork_steps: Vec<ForkStep>,
    filters: FilterExpression,
    irreversibility_condition: String,
    start_cursor: String,
}

/// Explicit per-call parameters. Any field set here wins over the template.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestOverrides {
    pub fork_steps: Option<Vec<ForkStep>>,
    pub include_filter_expr: Option<String>,
    pub exclude_filter_expr: Option<String>,
    pub irreversibility_condition: Option<String>,
    pub start_cursor: Option<String>,
}

impl RequestTemplate {
    /// Irreversible blocks only, filtered with `filters`.
    pub fn new(filters: FilterExpression) -> Self {
        Self {
            fork_steps: vec![ForkStep::StepIrreversible],
            filters,
            irreversibility_condition: String::new(),
            start_cursor: String::new(),
        }
    }

    #[must_use]
    pub fn with_overrides(mut self, overrides: &RequestOverrides) -> Self {
        if let Some(steps) = &overrides.fork_steps {
            self.fork_steps.clone_from(steps);
        }
        if let Some(include) = &overrides.include_filter_expr {
            self.filters.include.clone_from(include);
        }
        if let Some(exclude) = &overrides.exclude_filter_expr {
            self.filters.exclude.clone_from(exclude);
        }
        if let Some(condition) = &overrides.irreversibility_condition {
            self.irreversibility_condition.clone_from(condition);
        }
        if let Some(cursor) = &overrides.start_cursor {
            self.start_cursor.clone_from(cursor);
        }
        self
    }

    pub const fn filters(&self) -> &FilterExpression {
        &self.filters
    }

    pub fn irreversibility_condition(&self) -> &str {
        &self.irreversibility_condition
    }

    /// Request for `range`, or `None` when the range is empty.
    ///
    /// The wire `stop_block_num` is inclusive, so it is set to the last block
    /// of the half-open range.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if `range` starts beyond the signed 64-bit
    /// `start_block_num` of the wire request.
    pub fn build(&self, range: BlockRange) -> Result<Option<BlocksRequestV2>> {
        let Some(stop_block_num) = range.last_block() else {
            return Ok(None);
        };
        let start_block_num = i64::try_from(range.start()).map_err(|_| {
            Error::configuration(format!(
                "start block {} of {range} is beyond the protocol maximum ({})",
                range.start(),
                i64::MAX
            ))
        })?;

        Ok(Some(BlocksRequestV2 {
            start_block_num,
            start_cursor: self.start_cursor.clone(),
            stop_block_num,
            fork_steps: self.fork_steps.iter().map(|step| *step as i32).collect(),
            include_filter_expr: self.filters.include.clone(),
            exclude_filter_expr: self.filters.exclude.clone(),
            irreversibility_condition: self.irreversibility_condition.clone(),
        }))
    }
}
