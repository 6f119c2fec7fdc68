//! Range planner for parallel fetching.

/// A disjoint sub-range `[start, end)` of a requested time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: i64,
    pub end: i64,
}

/// Split `[start, end)` into at most `max_windows` granularity-aligned
/// windows, sized so each is expected to hold about `datapoints_per_window`
/// points.
///
/// The window size is rounded down to a multiple of the granularity;
/// otherwise aggregate buckets at window seams would straddle two workers
/// and rows would be duplicated or lost. The last window absorbs the
/// rounding remainder. When the rounded size degenerates to zero, the whole
/// range is served by one window.
pub fn split_into_windows(
    start: i64,
    end: i64,
    granularity_ms: i64,
    max_windows: usize,
    datapoints_per_window: i64,
) -> Vec<Window> {
    let granularity_ms = granularity_ms.max(1);
    let diff = end - start;
    let estimated_points = diff / granularity_ms;
    let count = (estimated_points / datapoints_per_window)
        .min(max_windows as i64)
        .max(1);
    let size = (diff / count) / granularity_ms * granularity_ms;
    if size == 0 {
        return vec![Window { start, end }];
    }

    (0..count)
        .map(|i| Window {
            start: start + i * size,
            end: if i == count - 1 {
                end
            } else {
                start + (i + 1) * size
            },
        })
        .collect()
}
