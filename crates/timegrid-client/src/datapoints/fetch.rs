//! Parallel datapoint fetching.
//!
//! One fetch proceeds in stages: probe each series for its first available
//! timestamp, split each range into granularity-aligned windows, fetch
//! windows concurrently (each window pages through the server cap until
//! drained), and merge pages per series in timestamp order. Workers send
//! their window results over a channel to a single merging coordinator, so
//! accumulator state is never shared.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use timegrid_core::{
    Aggregate, Datapoints, DatapointsItem, DatapointsList, Error, Granularity, Identifier, Result,
    SeriesItem, Window, split_into_windows,
};

use crate::session::ApiSession;

use super::{AGG_REQ_LIMIT, DataEnvelope, ItemsResponse, RAW_REQ_LIMIT};

/// Expected datapoints served by one window before the range is split
/// further.
const RAW_WINDOW_BUDGET: i64 = RAW_REQ_LIMIT as i64 * 500;
const AGG_WINDOW_BUDGET: i64 = AGG_REQ_LIMIT as i64 * 5;

/// A resolved single-series fetch plan.
#[derive(Debug, Clone)]
pub(crate) struct FetchQuery {
    /// Position in the caller's canonical series order.
    pub index: usize,
    pub item: Identifier,
    pub start: i64,
    pub end: i64,
    pub aggregates: Option<Vec<Aggregate>>,
    pub granularity: Option<Granularity>,
    pub include_outside_points: bool,
    pub limit: Option<usize>,
}

impl FetchQuery {
    /// Per-series aggregate overrides win over the query-level list.
    fn effective_aggregates(&self) -> Option<&[Aggregate]> {
        self.item.aggregates().or(self.aggregates.as_deref())
    }

    fn is_aggregate(&self) -> bool {
        self.effective_aggregates().is_some_and(|aggs| !aggs.is_empty())
    }

    fn per_request_cap(&self) -> usize {
        if self.is_aggregate() {
            AGG_REQ_LIMIT
        } else {
            RAW_REQ_LIMIT
        }
    }

    fn window_budget(&self) -> i64 {
        if self.is_aggregate() {
            AGG_WINDOW_BUDGET
        } else {
            RAW_WINDOW_BUDGET
        }
    }

    /// Paging advances past the last returned timestamp by one granularity
    /// bucket, or one millisecond for raw data.
    fn step_ms(&self) -> i64 {
        self.granularity.map_or(1, |g| g.as_millis())
    }

    fn empty_result(&self) -> Datapoints {
        Datapoints::for_series(
            self.item.numeric_id(),
            self.item.as_external_id().map(str::to_string),
        )
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadRequest {
    items: Vec<SeriesItem>,
    start: i64,
    end: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    aggregates: Option<Vec<Aggregate>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    granularity: Option<String>,
    include_outside_points: bool,
    limit: usize,
}

/// Execute a set of single-series fetch plans and return results in plan
/// order.
pub(crate) async fn fetch_datapoints(
    session: Arc<ApiSession>,
    queries: Vec<FetchQuery>,
    cancel: CancellationToken,
) -> Result<DatapointsList> {
    for query in &queries {
        if query.end <= query.start {
            return Err(Error::InvalidTimestamp(format!(
                "exclusive end {} must be after inclusive start {}",
                query.end, query.start
            )));
        }
        if query.is_aggregate() && query.granularity.is_none() {
            return Err(Error::InvalidGranularity(
                "granularity is required when aggregates are requested".to_string(),
            ));
        }
    }

    let max_workers = session.config().max_workers;
    let semaphore = Arc::new(Semaphore::new(max_workers));

    // Window sizing divides the range evenly; starting at the first real
    // datapoint avoids splitting an empty prefix across workers.
    let probes = queries
        .iter()
        .map(|query| probe_first_timestamp(&session, query, &semaphore, &cancel));
    let first_timestamps = futures_util::future::try_join_all(probes).await?;

    let mut queries = queries;
    for (query, first_timestamp) in queries.iter_mut().zip(first_timestamps) {
        if let Some(first) = first_timestamp
            && first > query.start
        {
            query.start = first;
        }
    }

    // A caller limit is served from one window; splitting would complicate
    // honoring the cap for little gain.
    let mut window_tasks: Vec<(usize, Window)> = Vec::new();
    for query in &queries {
        if query.limit.is_some() {
            window_tasks.push((
                query.index,
                Window {
                    start: query.start,
                    end: query.end,
                },
            ));
        } else {
            for window in split_into_windows(
                query.start,
                query.end,
                query.step_ms(),
                max_workers,
                query.window_budget(),
            ) {
                window_tasks.push((query.index, window));
            }
        }
    }
    debug!(
        "fetching {} series over {} windows",
        queries.len(),
        window_tasks.len()
    );

    let mut accumulators: Vec<Datapoints> = queries.iter().map(FetchQuery::empty_result).collect();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let queries = Arc::new(queries);
    for (index, window) in window_tasks {
        let tx = tx.clone();
        let session = session.clone();
        let semaphore = semaphore.clone();
        let cancel = cancel.clone();
        let queries = queries.clone();
        tokio::spawn(async move {
            let result = run_window(&session, &queries[index], window, &semaphore, &cancel).await;
            let _ = tx.send((index, result));
        });
    }
    drop(tx);

    // Single-coordinator merge: only this loop touches the accumulators.
    // The first failure cancels the remaining windows and fails the fetch;
    // a partial time range would silently deceive downstream code.
    let mut first_error: Option<Error> = None;
    while let Some((index, result)) = rx.recv().await {
        match result {
            Ok(page) => {
                if first_error.is_none() {
                    accumulators[index].splice(page);
                }
            }
            Err(error) => {
                if first_error.is_none() {
                    cancel.cancel();
                    first_error = Some(error);
                }
            }
        }
    }
    if let Some(error) = first_error {
        return Err(error);
    }

    // Adjacent windows fetched with outside points each carry their own
    // copy of a shared boundary point.
    for (query, accumulator) in queries.iter().zip(accumulators.iter_mut()) {
        if query.include_outside_points {
            accumulator.remove_duplicate_timestamps();
        }
    }

    let total: usize = accumulators.iter().map(Datapoints::len).sum();
    info!(
        "retrieved {} datapoints over {} series",
        total,
        accumulators.len()
    );
    Ok(DatapointsList::new(accumulators))
}

async fn probe_first_timestamp(
    session: &ApiSession,
    query: &FetchQuery,
    semaphore: &Arc<Semaphore>,
    cancel: &CancellationToken,
) -> Result<Option<i64>> {
    let _permit = acquire_worker(semaphore, cancel).await?;
    let page = request_datapoints(session, query, query.start, query.end, false, 1, cancel).await?;
    Ok(page.timestamp.first().copied())
}

async fn run_window(
    session: &ApiSession,
    query: &FetchQuery,
    window: Window,
    semaphore: &Arc<Semaphore>,
    cancel: &CancellationToken,
) -> Result<Datapoints> {
    let _permit = acquire_worker(semaphore, cancel).await?;
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    fetch_window(session, query, window, cancel).await
}

async fn acquire_worker(
    semaphore: &Arc<Semaphore>,
    cancel: &CancellationToken,
) -> Result<tokio::sync::OwnedSemaphorePermit> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        permit = semaphore.clone().acquire_owned() => permit.map_err(|_| Error::Cancelled),
    }
}

/// Fetch one series over one window, paging until the window is drained or
/// the caller limit is spent.
///
/// Every iteration either returns fewer points than requested (and stops)
/// or advances the cursor by at least one millisecond, so the loop
/// terminates.
async fn fetch_window(
    session: &ApiSession,
    query: &FetchQuery,
    window: Window,
    cancel: &CancellationToken,
) -> Result<Datapoints> {
    let cap = query.per_request_cap();
    let step = query.step_ms();
    let mut remaining = query.limit;
    let mut next_start = window.start;
    let mut accumulated = query.empty_result();

    loop {
        let request_limit = remaining.map_or(cap, |r| cap.min(r));
        if request_limit == 0 {
            break;
        }
        let page = request_datapoints(
            session,
            query,
            next_start,
            window.end,
            query.include_outside_points,
            request_limit,
            cancel,
        )
        .await?;
        let returned = page.len();
        if returned == 0 {
            break;
        }
        let Some(&last_timestamp) = page.timestamp.last() else {
            break;
        };
        accumulated.splice(page);

        if returned < request_limit {
            break;
        }
        if let Some(r) = remaining.as_mut() {
            *r = r.saturating_sub(returned);
            if *r == 0 {
                break;
            }
        }
        next_start = last_timestamp + step;
        if next_start >= window.end {
            break;
        }
    }
    Ok(accumulated)
}

async fn request_datapoints(
    session: &ApiSession,
    query: &FetchQuery,
    start: i64,
    end: i64,
    include_outside_points: bool,
    limit: usize,
    cancel: &CancellationToken,
) -> Result<Datapoints> {
    let body = ReadRequest {
        items: vec![SeriesItem::from(&query.item)],
        start,
        end,
        aggregates: query.aggregates.clone(),
        granularity: query.granularity.map(|g| g.to_string()),
        include_outside_points,
        limit,
    };
    let envelope: DataEnvelope<ItemsResponse<DatapointsItem>> = session
        .post_json("timeseries/data/get", &body, true, cancel)
        .await?;
    Ok(envelope
        .data
        .items
        .into_iter()
        .next()
        .map(Datapoints::from_item)
        .unwrap_or_else(|| query.empty_result()))
}
