use firehose_extract_core::{BlockRange, Error, Result};

/// Splits `[period_start, period_end)` into contiguous sub-ranges, one per
/// stream worker.
///
/// At most `max_tasks` sub-ranges are produced, and never more than there are
/// blocks, so no sub-range is empty. Every sub-range gets
/// `(period_end - period_start) / max_tasks` blocks; the last one also takes
/// the remainder of the division.
///
/// # Errors
///
/// - [`Error::InvalidRange`] if `period_end < period_start`.
/// - [`Error::Configuration`] if `max_tasks` is zero.
///
/// # Examples
///
/// ```
/// use firehose_extract::engine::streaming::coordinator::split;
///
/// let ranges = split(100, 110, 3).unwrap();
/// let bounds: Vec<_> = ranges.iter().map(|r| (r.start(), r.end())).collect();
/// assert_eq!(bounds, [(100, 103), (103, 106), (106, 110)]);
/// ```
pub fn split(period_start: u64, period_end: u64, max_tasks: usize) -> Result<Vec<BlockRange>> {
    let period = BlockRange::new(period_start, period_end)?;

    if max_tasks == 0 {
        return Err(Error::configuration("max_tasks must be greater than 0"));
    }

    // Never spawn more workers than there are blocks to stream.
    let tasks = period.len().min(max_tasks as u64);
    if tasks == 0 {
        return Ok(Vec::new());
    }

    let chunk = period.len() / tasks;
    (0..tasks)
        .map(|i| {
            let start = period_start + i * chunk;
            let end = if i + 1 == tasks {
                period_end
            } else {
                start + chunk
            };
            BlockRange::new(start, end)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn bounds(ranges: &[BlockRange]) -> Vec<(u64, u64)> {
        ranges.iter().map(|r| (r.start(), r.end())).collect()
    }

    #[test]
    fn splits_evenly() {
        let ranges = split(100, 110, 2).unwrap();
        assert_eq!(bounds(&ranges), [(100, 105), (105, 110)]);
    }

    #[test]
    fn last_range_absorbs_remainder() {
        let ranges = split(0, 23, 5).unwrap();
        assert_eq!(
            bounds(&ranges),
            [(0, 4), (4, 8), (8, 12), (12, 16), (16, 23)]
        );
    }

    #[test]
    fn clamps_tasks_to_block_count() {
        let ranges = split(1_000, 1_003, 20).unwrap();
        assert_eq!(bounds(&ranges), [(1_000, 1_001), (1_001, 1_002), (1_002, 1_003)]);
    }

    #[test]
    fn empty_period_yields_no_ranges() {
        assert!(split(42, 42, 8).unwrap().is_empty());
    }

    #[test]
    fn rejects_inverted_period() {
        assert!(matches!(
            split(110, 100, 2),
            Err(Error::InvalidRange { start: 110, end: 100 })
        ));
    }

    #[test]
    fn rejects_zero_tasks() {
        assert!(matches!(split(0, 10, 0), Err(Error::Configuration { .. })));
    }

    proptest! {
        #[test]
        fn ranges_cover_period_exactly(
            start in 0u64..1_000_000,
            width in 0u64..5_000,
            max_tasks in 1usize..64,
        ) {
            let end = start + width;
            let ranges = split(start, end, max_tasks).unwrap();

            prop_assert!(ranges.len() as u64 <= width);
            prop_assert!(ranges.len() <= max_tasks);
            prop_assert!(ranges.iter().all(|r| !r.is_empty()));

            if width == 0 {
                prop_assert!(ranges.is_empty());
            } else {
                prop_assert_eq!(ranges.first().unwrap().start(), start);
                prop_assert_eq!(ranges.last().unwrap().end(), end);
                for pair in ranges.windows(2) {
                    prop_assert_eq!(pair[0].end(), pair[1].start());
                }
                let covered: u64 = ranges.iter().map(BlockRange::len).sum();
                prop_assert_eq!(covered, width);
            }
        }

        #[test]
        fn range_count_is_clamped_to_width(width in 1u64..64, extra in 0usize..64) {
            let max_tasks = width as usize + extra;
            let ranges = split(10, 10 + width, max_tasks).unwrap();
            prop_assert_eq!(ranges.len() as u64, width);
        }
    }
}
