//! Datapoint query parameters.

use crate::aggregate::Aggregate;
use crate::error::{Error, Result};
use crate::identifier::Identifier;
use crate::time::{Granularity, TimeSpec};

/// Shared query parameters applied to every series in one retrieval.
#[derive(Debug, Clone)]
pub struct DatapointsQuery {
    /// Inclusive start.
    pub start: TimeSpec,
    /// Exclusive end.
    pub end: TimeSpec,
    pub aggregates: Option<Vec<Aggregate>>,
    pub granularity: Option<Granularity>,
    /// Also return the last point before the range and the first at or after
    /// it. Not available for aggregates.
    pub include_outside_points: bool,
    /// Hard cap on returned points per series.
    pub limit: Option<usize>,
}

impl DatapointsQuery {
    pub fn new(start: impl Into<TimeSpec>, end: impl Into<TimeSpec>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            aggregates: None,
            granularity: None,
            include_outside_points: false,
            limit: None,
        }
    }

    /// Request aggregates at the given bucket width.
    pub fn with_aggregates(mut self, aggregates: Vec<Aggregate>, granularity: Granularity) -> Self {
        self.aggregates = Some(aggregates);
        self.granularity = Some(granularity);
        self
    }

    pub fn with_outside_points(mut self) -> Self {
        self.include_outside_points = true;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.aggregates.as_ref().is_some_and(|a| !a.is_empty()) && self.granularity.is_none() {
            return Err(Error::InvalidGranularity(
                "granularity is required when aggregates are requested".to_string(),
            ));
        }
        Ok(())
    }
}

/// A fully self-contained single-series query, for retrievals where each
/// series needs its own time range or resolution.
#[derive(Debug, Clone)]
pub struct SeriesQuery {
    pub identifier: Identifier,
    pub start: TimeSpec,
    pub end: TimeSpec,
    pub aggregates: Option<Vec<Aggregate>>,
    pub granularity: Option<Granularity>,
    pub include_outside_points: bool,
    pub limit: Option<usize>,
}

impl SeriesQuery {
    pub fn new(
        identifier: Identifier,
        start: impl Into<TimeSpec>,
        end: impl Into<TimeSpec>,
    ) -> Self {
        Self {
            identifier,
            start: start.into(),
            end: end.into(),
            aggregates: None,
            granularity: None,
            include_outside_points: false,
            limit: None,
        }
    }

    pub fn with_aggregates(mut self, aggregates: Vec<Aggregate>, granularity: Granularity) -> Self {
        self.aggregates = Some(aggregates);
        self.granularity = Some(granularity);
        self
    }

    pub fn with_outside_points(mut self) -> Self {
        self.include_outside_points = true;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.aggregates.as_ref().is_some_and(|a| !a.is_empty()) && self.granularity.is_none() {
            return Err(Error::InvalidGranularity(
                "granularity is required when aggregates are requested".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::TimeUnit;

    #[test]
    fn test_query_builder() {
        let query = DatapointsQuery::new(0_i64, 86_400_000_i64)
            .with_aggregates(
                vec![Aggregate::Average],
                Granularity::new(1, TimeUnit::Hour),
            )
            .with_limit(500);
        assert_eq!(query.granularity.unwrap().as_millis(), 3_600_000);
        assert_eq!(query.limit, Some(500));
        assert!(query.validate().is_ok());
    }

    #[test]
    fn test_aggregates_require_granularity() {
        let mut query = DatapointsQuery::new(0_i64, 1_000_i64);
        query.aggregates = Some(vec![Aggregate::Min]);
        assert!(matches!(
            query.validate(),
            Err(Error::InvalidGranularity(_))
        ));

        let mut series = SeriesQuery::new(Identifier::id(1), 0_i64, 1_000_i64);
        series.aggregates = Some(vec![Aggregate::Min]);
        assert!(matches!(
            series.validate(),
            Err(Error::InvalidGranularity(_))
        ));
    }
}
