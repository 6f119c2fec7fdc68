//! HTTP client for the Timegrid time-series platform.
//!
//! The entry point is [`ApiSession`] (configuration + connection pool) and
//! [`DatapointsClient`] (reads, writes, latest-point lookups and range
//! deletes against the `timeseries/data` endpoints).

pub mod config;
pub mod datapoints;
pub mod session;

pub use config::Config;
pub use datapoints::{
    AGG_REQ_LIMIT, DatapointsClient, DeleteRange, InsertBatch, InsertDatapoint, RAW_REQ_LIMIT,
    WRITE_LIMIT,
};
pub use session::ApiSession;

pub use timegrid_core::{
    Aggregate, Datapoint, Datapoints, DatapointsList, DatapointsQuery, Error, Granularity,
    Identifier, IdentifierArg, Result, SeriesQuery, TimeSpec, TimeUnit, Value,
};
