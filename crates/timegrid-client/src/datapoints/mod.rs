//! Datapoints API.
//!
//! Reads fan a time range out across bounded concurrent window fetches and
//! merge the pages back in timestamp order; writes validate, split and
//! bin-pack datapoint batches into size-bounded request bodies. See the
//! `fetch` and `write` submodules for the two engines.

mod fetch;
mod write;

pub use write::{InsertBatch, InsertDatapoint};

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use timegrid_core::{
    Datapoints, DatapointsItem, DatapointsList, DatapointsQuery, Error, Identifier, IdentifierArg,
    Result, SeriesQuery, TimeSpec, normalize,
};

use crate::session::ApiSession;
use fetch::FetchQuery;

/// Per-request cap on raw datapoints.
pub const RAW_REQ_LIMIT: usize = 100_000;
/// Per-request cap on aggregate datapoints.
pub const AGG_REQ_LIMIT: usize = 10_000;
/// Cap on datapoints in one write request body.
pub const WRITE_LIMIT: usize = 100_000;

#[derive(Serialize)]
pub(crate) struct ItemsRequest<T: Serialize> {
    pub items: Vec<T>,
}

#[derive(Deserialize)]
pub(crate) struct DataEnvelope<T> {
    pub data: T,
}

#[derive(Deserialize)]
pub(crate) struct ItemsResponse<T> {
    pub items: Vec<T>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LatestItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    before: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    external_id: Option<String>,
    inclusive_begin: i64,
    exclusive_end: i64,
}

/// A datapoint range to delete from one series.
#[derive(Debug, Clone)]
pub struct DeleteRange {
    pub identifier: Identifier,
    /// Inclusive start.
    pub start: TimeSpec,
    /// Exclusive end.
    pub end: TimeSpec,
}

/// Client for the `timeseries/data` endpoints.
pub struct DatapointsClient {
    session: Arc<ApiSession>,
}

impl DatapointsClient {
    pub fn new(session: Arc<ApiSession>) -> Self {
        Self { session }
    }

    /// Retrieve datapoints for one or more series.
    ///
    /// Ranges are fetched in parallel windows; results per series are in
    /// strictly increasing timestamp order, and series appear in the order
    /// given (all `id` entries first, then all `external_id` entries).
    pub async fn retrieve(
        &self,
        id: Option<IdentifierArg>,
        external_id: Option<IdentifierArg>,
        query: &DatapointsQuery,
    ) -> Result<DatapointsList> {
        self.retrieve_with_cancel(id, external_id, query, CancellationToken::new())
            .await
    }

    /// As [`Self::retrieve`], cancellable through the given token.
    pub async fn retrieve_with_cancel(
        &self,
        id: Option<IdentifierArg>,
        external_id: Option<IdentifierArg>,
        query: &DatapointsQuery,
        cancel: CancellationToken,
    ) -> Result<DatapointsList> {
        query.validate()?;
        let normalized = normalize(id, external_id)?;
        self.fetch_series(normalized.items, query, cancel).await
    }

    /// Retrieve datapoints for a single series.
    pub async fn retrieve_one(
        &self,
        identifier: Identifier,
        query: &DatapointsQuery,
    ) -> Result<Datapoints> {
        query.validate()?;
        let (id, external_id) = split_single(identifier);
        let normalized = normalize(id, external_id)?;
        let is_single = normalized.is_single;
        let list = self
            .fetch_series(normalized.items, query, CancellationToken::new())
            .await?;
        single_series(is_single, list)
    }

    async fn fetch_series(
        &self,
        items: Vec<Identifier>,
        query: &DatapointsQuery,
        cancel: CancellationToken,
    ) -> Result<DatapointsList> {
        let now = Utc::now();
        let start = query.start.resolve(now);
        let end = query.end.resolve(now);
        let queries = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| FetchQuery {
                index,
                item,
                start,
                end,
                aggregates: query.aggregates.clone(),
                granularity: query.granularity,
                include_outside_points: query.include_outside_points,
                limit: query.limit,
            })
            .collect();
        fetch::fetch_datapoints(self.session.clone(), queries, cancel).await
    }

    /// Retrieve datapoints with per-series ranges and resolutions.
    pub async fn query(&self, queries: Vec<SeriesQuery>) -> Result<DatapointsList> {
        self.query_with_cancel(queries, CancellationToken::new())
            .await
    }

    /// As [`Self::query`], cancellable through the given token.
    pub async fn query_with_cancel(
        &self,
        queries: Vec<SeriesQuery>,
        cancel: CancellationToken,
    ) -> Result<DatapointsList> {
        let now = Utc::now();
        let fetch_queries = queries
            .into_iter()
            .enumerate()
            .map(|(index, q)| {
                q.validate()?;
                Ok(FetchQuery {
                    index,
                    item: q.identifier,
                    start: q.start.resolve(now),
                    end: q.end.resolve(now),
                    aggregates: q.aggregates,
                    granularity: q.granularity,
                    include_outside_points: q.include_outside_points,
                    limit: q.limit,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        fetch::fetch_datapoints(self.session.clone(), fetch_queries, cancel).await
    }

    /// Retrieve the most recent datapoint per series, optionally before a
    /// cutoff.
    pub async fn retrieve_latest(
        &self,
        id: Option<IdentifierArg>,
        external_id: Option<IdentifierArg>,
        before: Option<TimeSpec>,
    ) -> Result<DatapointsList> {
        let normalized = normalize(id, external_id)?;
        self.latest_for_series(&normalized.items, before).await
    }

    /// Retrieve the most recent datapoint of a single series.
    pub async fn retrieve_latest_one(
        &self,
        identifier: Identifier,
        before: Option<TimeSpec>,
    ) -> Result<Datapoints> {
        let (id, external_id) = split_single(identifier);
        let normalized = normalize(id, external_id)?;
        let list = self.latest_for_series(&normalized.items, before).await?;
        single_series(normalized.is_single, list)
    }

    async fn latest_for_series(
        &self,
        series: &[Identifier],
        before: Option<TimeSpec>,
    ) -> Result<DatapointsList> {
        let before_ms = before.map(|cutoff| cutoff.resolve(Utc::now()));
        let items = series
            .iter()
            .map(|item| {
                if item.aggregates().is_some() {
                    return Err(Error::InvalidIdentifier(
                        "aggregates are not valid when fetching the latest datapoint".to_string(),
                    ));
                }
                Ok(LatestItem {
                    id: item.numeric_id(),
                    external_id: item.as_external_id().map(str::to_string),
                    before: before_ms,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let envelope: DataEnvelope<ItemsResponse<DatapointsItem>> = self
            .session
            .post_json(
                "timeseries/data/latest",
                &ItemsRequest { items },
                true,
                &CancellationToken::new(),
            )
            .await?;
        Ok(DatapointsList::new(
            envelope
                .data
                .items
                .into_iter()
                .map(Datapoints::from_item)
                .collect(),
        ))
    }

    /// Insert datapoints into one series.
    pub async fn insert(
        &self,
        identifier: Identifier,
        datapoints: Vec<InsertDatapoint>,
    ) -> Result<()> {
        self.insert_multiple(vec![InsertBatch {
            identifier,
            datapoints,
        }])
        .await
    }

    /// Insert datapoints into multiple series.
    ///
    /// Oversized per-series batches are split at [`WRITE_LIMIT`] and the
    /// resulting slices are bin-packed into as few request bodies as fit.
    pub async fn insert_multiple(&self, batches: Vec<InsertBatch>) -> Result<()> {
        self.insert_multiple_with_cancel(batches, CancellationToken::new())
            .await
    }

    /// As [`Self::insert_multiple`], cancellable through the given token.
    pub async fn insert_multiple_with_cancel(
        &self,
        batches: Vec<InsertBatch>,
        cancel: CancellationToken,
    ) -> Result<()> {
        write::insert_datapoints(self.session.clone(), batches, cancel).await
    }

    /// Delete a range of datapoints from one series.
    pub async fn delete_range(
        &self,
        identifier: Identifier,
        start: impl Into<TimeSpec>,
        end: impl Into<TimeSpec>,
    ) -> Result<()> {
        self.delete_ranges(vec![DeleteRange {
            identifier,
            start: start.into(),
            end: end.into(),
        }])
        .await
    }

    /// Delete datapoint ranges from multiple series.
    pub async fn delete_ranges(&self, ranges: Vec<DeleteRange>) -> Result<()> {
        let now = Utc::now();
        let items = ranges
            .into_iter()
            .map(|range| {
                if range.identifier.aggregates().is_some() {
                    return Err(Error::InvalidIdentifier(
                        "aggregates are not valid when deleting datapoints".to_string(),
                    ));
                }
                let inclusive_begin = range.start.resolve(now);
                let exclusive_end = range.end.resolve(now);
                if exclusive_end <= inclusive_begin {
                    return Err(Error::InvalidTimestamp(format!(
                        "exclusive end {exclusive_end} must be after inclusive begin {inclusive_begin}"
                    )));
                }
                Ok(DeleteItem {
                    id: range.identifier.numeric_id(),
                    external_id: range.identifier.as_external_id().map(str::to_string),
                    inclusive_begin,
                    exclusive_end,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let deleted = items.len();
        self.session
            .post_json_discard(
                "timeseries/data/delete",
                &ItemsRequest { items },
                true,
                &CancellationToken::new(),
            )
            .await?;
        info!("deleted datapoint ranges for {} series", deleted);
        Ok(())
    }
}

fn split_single(identifier: Identifier) -> (Option<IdentifierArg>, Option<IdentifierArg>) {
    if identifier.is_by_id() {
        (Some(identifier.into()), None)
    } else {
        (None, Some(identifier.into()))
    }
}

/// Collapse a result list to its only entry when the normalizer saw a
/// single-identifier argument shape.
fn single_series(is_single: bool, list: DatapointsList) -> Result<Datapoints> {
    if !is_single {
        return Err(Error::InvalidIdentifier(
            "a single identifier is required here".to_string(),
        ));
    }
    Ok(list.into_inner().into_iter().next().unwrap_or_default())
}
