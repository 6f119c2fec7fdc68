//! Datapoint insertion.
//!
//! Batches are validated up front, series with more than [`WRITE_LIMIT`]
//! points are split into contiguous slices, and the slices are bin-packed
//! (first-fit decreasing) into request bodies holding at most
//! [`WRITE_LIMIT`] points each. Bodies post concurrently; the first failure
//! cancels the remaining bodies and the caller receives a per-body outcome.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use timegrid_core::{
    Error, FailedWriteBin, Identifier, Result, TimeSpec, Value, WriteBinSummary,
    validate_insert_timestamp,
};

use crate::session::ApiSession;

use super::{ItemsRequest, WRITE_LIMIT};

/// One datapoint to insert.
#[derive(Debug, Clone)]
pub struct InsertDatapoint {
    pub timestamp: TimeSpec,
    pub value: Value,
}

impl InsertDatapoint {
    pub fn new(timestamp: impl Into<TimeSpec>, value: impl Into<Value>) -> Self {
        Self {
            timestamp: timestamp.into(),
            value: value.into(),
        }
    }
}

impl<T: Into<TimeSpec>, V: Into<Value>> From<(T, V)> for InsertDatapoint {
    fn from((timestamp, value): (T, V)) -> Self {
        Self::new(timestamp, value)
    }
}

/// Datapoints to insert into one series.
#[derive(Debug, Clone)]
pub struct InsertBatch {
    pub identifier: Identifier,
    pub datapoints: Vec<InsertDatapoint>,
}

impl InsertBatch {
    pub fn new(
        identifier: Identifier,
        datapoints: impl IntoIterator<Item = impl Into<InsertDatapoint>>,
    ) -> Self {
        Self {
            identifier,
            datapoints: datapoints.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct WritePoint {
    timestamp: i64,
    value: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WriteItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    external_id: Option<String>,
    datapoints: Vec<WritePoint>,
}

/// A contiguous run of points for one series, at most [`WRITE_LIMIT`] long.
type SeriesSlice = (Identifier, Vec<WritePoint>);

pub(crate) async fn insert_datapoints(
    session: Arc<ApiSession>,
    batches: Vec<InsertBatch>,
    cancel: CancellationToken,
) -> Result<()> {
    let now = Utc::now();

    // Validation happens in full before any request is issued.
    let mut records: Vec<SeriesSlice> = Vec::with_capacity(batches.len());
    for batch in batches {
        if batch.identifier.aggregates().is_some() {
            return Err(Error::InvalidIdentifier(
                "aggregates are not valid on insert".to_string(),
            ));
        }
        if batch.datapoints.is_empty() {
            return Err(Error::InvalidDatapoint(
                "no datapoints provided".to_string(),
            ));
        }
        let mut points = Vec::with_capacity(batch.datapoints.len());
        for datapoint in batch.datapoints {
            let timestamp = datapoint.timestamp.resolve(now);
            validate_insert_timestamp(timestamp)?;
            points.push(WritePoint {
                timestamp,
                value: datapoint.value,
            });
        }
        records.push((batch.identifier, points));
    }

    let slices = split_oversized(records, WRITE_LIMIT);
    let bins = pack_bins(slices, WRITE_LIMIT);

    let summaries: Vec<WriteBinSummary> = bins
        .iter()
        .map(|bin| WriteBinSummary {
            series: bin.iter().map(|(identifier, _)| identifier.clone()).collect(),
            datapoint_count: bin.iter().map(|(_, points)| points.len()).sum(),
        })
        .collect();
    let total_points: usize = summaries.iter().map(|s| s.datapoint_count).sum();
    debug!(
        "packed {} datapoints into {} write requests",
        total_points,
        bins.len()
    );

    let semaphore = Arc::new(Semaphore::new(session.config().max_workers));
    let mut handles = Vec::with_capacity(bins.len());
    for bin in bins {
        let session = session.clone();
        let semaphore = semaphore.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            post_bin(&session, bin, &semaphore, &cancel).await
        }));
    }
    let results = futures_util::future::join_all(handles).await;

    let mut succeeded = Vec::new();
    let mut failed = Vec::new();
    for (summary, joined) in summaries.into_iter().zip(results) {
        match joined {
            Ok(Ok(())) => succeeded.push(summary),
            Ok(Err(error)) => failed.push(FailedWriteBin {
                summary,
                reason: error.to_string(),
            }),
            Err(join_error) => failed.push(FailedWriteBin {
                summary,
                reason: join_error.to_string(),
            }),
        }
    }
    if failed.is_empty() {
        info!(
            "inserted {} datapoints across {} requests",
            total_points,
            succeeded.len()
        );
        Ok(())
    } else {
        Err(Error::PartialWriteFailure { succeeded, failed })
    }
}

async fn post_bin(
    session: &ApiSession,
    bin: Vec<SeriesSlice>,
    semaphore: &Arc<Semaphore>,
    cancel: &CancellationToken,
) -> Result<()> {
    let _permit = tokio::select! {
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        permit = semaphore.clone().acquire_owned() => permit.map_err(|_| Error::Cancelled)?,
    };
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    let items: Vec<WriteItem> = bin
        .into_iter()
        .map(|(identifier, datapoints)| WriteItem {
            id: identifier.numeric_id(),
            external_id: identifier.as_external_id().map(str::to_string),
            datapoints,
        })
        .collect();
    let result = session
        .post_json_discard("timeseries/data", &ItemsRequest { items }, false, cancel)
        .await;
    if result.is_err() {
        // Fail fast: take the remaining bodies down with this one.
        cancel.cancel();
    }
    result
}

/// Split any slice longer than `limit` into contiguous `limit`-sized runs in
/// original order.
fn split_oversized(records: Vec<SeriesSlice>, limit: usize) -> Vec<SeriesSlice> {
    let mut slices = Vec::with_capacity(records.len());
    for (identifier, points) in records {
        let mut remaining = points;
        loop {
            if remaining.len() <= limit {
                slices.push((identifier, remaining));
                break;
            }
            let tail = remaining.split_off(limit);
            slices.push((identifier.clone(), remaining));
            remaining = tail;
        }
    }
    slices
}

/// First-fit decreasing: place each slice in the first body with room,
/// opening a new body otherwise. Minimizes round-trips, not balance. The
/// sort is stable, so equal-sized slices of one series keep their order.
fn pack_bins(mut slices: Vec<SeriesSlice>, capacity: usize) -> Vec<Vec<SeriesSlice>> {
    slices.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
    let mut bins: Vec<(usize, Vec<SeriesSlice>)> = Vec::new();
    for slice in slices {
        let weight = slice.1.len();
        match bins.iter_mut().find(|(used, _)| *used + weight <= capacity) {
            Some((used, bin)) => {
                *used += weight;
                bin.push(slice);
            }
            None => bins.push((weight, vec![slice])),
        }
    }
    bins.into_iter().map(|(_, bin)| bin).collect()
}
