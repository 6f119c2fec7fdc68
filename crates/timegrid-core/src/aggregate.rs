//! Server-side aggregate statistics.

use serde::{Deserialize, Serialize};

/// A statistic the server computes over one granularity bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Aggregate {
    /// Integral average over the bucket.
    Average,
    Max,
    Min,
    /// Number of datapoints in the bucket.
    Count,
    Sum,
    /// Interpolated value at the start of the bucket.
    Interpolation,
    /// Last value at or before the start of the bucket.
    StepInterpolation,
    ContinuousVariance,
    DiscreteVariance,
    TotalVariation,
}

impl Aggregate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Average => "average",
            Self::Max => "max",
            Self::Min => "min",
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Interpolation => "interpolation",
            Self::StepInterpolation => "stepInterpolation",
            Self::ContinuousVariance => "continuousVariance",
            Self::DiscreteVariance => "discreteVariance",
            Self::TotalVariation => "totalVariation",
        }
    }
}
