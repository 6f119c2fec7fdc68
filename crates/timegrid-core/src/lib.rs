pub mod aggregate;
pub mod datapoint;
pub mod error;
pub mod identifier;
pub mod query;
pub mod time;
pub mod window;

pub use aggregate::Aggregate;
pub use datapoint::{Datapoint, Datapoints, DatapointsItem, DatapointsList, Value};
pub use error::{Error, FailedWriteBin, Result, WriteBinSummary};
pub use identifier::{
    Identifier, IdentifierArg, NormalizedIdentifiers, SeriesItem, normalize,
};
pub use query::{DatapointsQuery, SeriesQuery};
pub use time::{Granularity, TimeSpec, TimeUnit, validate_insert_timestamp};
pub use window::{Window, split_into_windows};
