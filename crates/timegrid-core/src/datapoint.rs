//! Datapoint collections.
//!
//! [`Datapoints`] is the per-series result container. It is column-oriented:
//! one timestamp array plus one parallel array per populated field, all of
//! identical length. Raw series populate `value`; aggregate series populate a
//! subset of the aggregate columns. [`Datapoint`] is the row view over one
//! index, and doubles as the wire form of a single point.

use std::collections::HashSet;
use std::ops::{Index, Range};

use serde::{Deserialize, Deserializer, Serialize};

/// A raw datapoint value. The server stores either a 64-bit float or a
/// UTF-8 string per series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Float(f64),
    String(String),
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Float(v as f64)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Float(v as f64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::String(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Float(_) => None,
            Self::String(s) => Some(s),
        }
    }
}

/// The server transports `count` as an IEEE double; cast it on load. A
/// non-finite value would cast to a garbage integer, so it fails the load
/// instead.
fn count_as_integer<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<f64>::deserialize(deserializer)? {
        Some(raw) if !raw.is_finite() => Err(serde::de::Error::custom(format!(
            "count must be a finite number, got {raw}"
        ))),
        Some(raw) => Ok(Some(raw as i64)),
        None => Ok(None),
    }
}

/// One time-value observation. Either `value` is set (raw point) or a subset
/// of the aggregate fields is (aggregate point), never both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Datapoint {
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(
        default,
        deserialize_with = "count_as_integer",
        skip_serializing_if = "Option::is_none"
    )]
    pub count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpolation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_interpolation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuous_variance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discrete_variance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_variation: Option<f64>,
}

impl Datapoint {
    /// A raw point.
    pub fn raw(timestamp: i64, value: impl Into<Value>) -> Self {
        Self {
            timestamp,
            value: Some(value.into()),
            ..Default::default()
        }
    }
}

/// Wire form of one series in a `timeseries/data` request or response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatapointsItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default)]
    pub datapoints: Vec<Datapoint>,
}

/// An ordered collection of datapoints belonging to one series.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Datapoints {
    pub id: Option<i64>,
    pub external_id: Option<String>,
    pub timestamp: Vec<i64>,
    pub value: Option<Vec<Value>>,
    pub average: Option<Vec<f64>>,
    pub max: Option<Vec<f64>>,
    pub min: Option<Vec<f64>>,
    pub count: Option<Vec<i64>>,
    pub sum: Option<Vec<f64>>,
    pub interpolation: Option<Vec<f64>>,
    pub step_interpolation: Option<Vec<f64>>,
    pub continuous_variance: Option<Vec<f64>>,
    pub discrete_variance: Option<Vec<f64>>,
    pub total_variation: Option<Vec<f64>>,
}

fn push_field<T>(column: &mut Option<Vec<T>>, value: Option<T>) {
    if let Some(value) = value {
        column.get_or_insert_with(Vec::new).push(value);
    }
}

fn splice_field<T>(column: &mut Option<Vec<T>>, incoming: Option<Vec<T>>, at: Option<usize>) {
    let Some(incoming) = incoming else { return };
    match column {
        None => *column = Some(incoming),
        Some(existing) => match at {
            Some(index) => {
                existing.splice(index..index, incoming);
            }
            None => existing.extend(incoming),
        },
    }
}

fn slice_field<T: Clone>(column: &Option<Vec<T>>, range: &Range<usize>) -> Option<Vec<T>> {
    column.as_ref().map(|v| v[range.clone()].to_vec())
}

fn retain_field<T>(column: &mut Option<Vec<T>>, keep: &[bool]) {
    if let Some(v) = column {
        let mut index = 0;
        v.retain(|_| {
            let kept = keep[index];
            index += 1;
            kept
        });
    }
}

fn copied_at<T: Copy>(column: &Option<Vec<T>>, index: usize) -> Option<T> {
    column.as_ref().map(|v| v[index])
}

impl Datapoints {
    /// An empty collection carrying only the series identity.
    pub fn for_series(id: Option<i64>, external_id: Option<String>) -> Self {
        Self {
            id,
            external_id,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.timestamp.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamp.is_empty()
    }

    /// Row view over one index.
    pub fn get(&self, index: usize) -> Option<Datapoint> {
        if index >= self.len() {
            return None;
        }
        Some(Datapoint {
            timestamp: self.timestamp[index],
            value: self.value.as_ref().map(|v| v[index].clone()),
            average: copied_at(&self.average, index),
            max: copied_at(&self.max, index),
            min: copied_at(&self.min, index),
            count: copied_at(&self.count, index),
            sum: copied_at(&self.sum, index),
            interpolation: copied_at(&self.interpolation, index),
            step_interpolation: copied_at(&self.step_interpolation, index),
            continuous_variance: copied_at(&self.continuous_variance, index),
            discrete_variance: copied_at(&self.discrete_variance, index),
            total_variation: copied_at(&self.total_variation, index),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Datapoint> + '_ {
        (0..self.len()).filter_map(|i| self.get(i))
    }

    /// Copy out a contiguous sub-range, keeping the series identity.
    pub fn slice(&self, range: Range<usize>) -> Self {
        Self {
            id: self.id,
            external_id: self.external_id.clone(),
            timestamp: self.timestamp[range.clone()].to_vec(),
            value: slice_field(&self.value, &range),
            average: slice_field(&self.average, &range),
            max: slice_field(&self.max, &range),
            min: slice_field(&self.min, &range),
            count: slice_field(&self.count, &range),
            sum: slice_field(&self.sum, &range),
            interpolation: slice_field(&self.interpolation, &range),
            step_interpolation: slice_field(&self.step_interpolation, &range),
            continuous_variance: slice_field(&self.continuous_variance, &range),
            discrete_variance: slice_field(&self.discrete_variance, &range),
            total_variation: slice_field(&self.total_variation, &range),
        }
    }

    pub fn push(&mut self, point: Datapoint) {
        self.timestamp.push(point.timestamp);
        push_field(&mut self.value, point.value);
        push_field(&mut self.average, point.average);
        push_field(&mut self.max, point.max);
        push_field(&mut self.min, point.min);
        push_field(&mut self.count, point.count);
        push_field(&mut self.sum, point.sum);
        push_field(&mut self.interpolation, point.interpolation);
        push_field(&mut self.step_interpolation, point.step_interpolation);
        push_field(&mut self.continuous_variance, point.continuous_variance);
        push_field(&mut self.discrete_variance, point.discrete_variance);
        push_field(&mut self.total_variation, point.total_variation);
    }

    /// Build a collection from the wire form of one series.
    pub fn from_item(item: DatapointsItem) -> Self {
        let mut dps = Self::for_series(item.id, item.external_id);
        for point in item.datapoints {
            dps.push(point);
        }
        dps
    }

    /// Merge another page of the same series, keeping timestamps ordered.
    ///
    /// The incoming page is inserted in front of the first existing timestamp
    /// greater than its first timestamp; when pages arrive in order this is a
    /// plain append.
    pub fn splice(&mut self, other: Datapoints) {
        if other.timestamp.is_empty() {
            return;
        }
        if self.id.is_none() && self.external_id.is_none() {
            self.id = other.id;
            self.external_id = other.external_id.clone();
        }

        let other_first = other.timestamp[0];
        let at = self.timestamp.iter().position(|ts| *ts > other_first);

        match at {
            Some(index) => {
                self.timestamp.splice(index..index, other.timestamp);
            }
            None => self.timestamp.extend(other.timestamp),
        }
        splice_field(&mut self.value, other.value, at);
        splice_field(&mut self.average, other.average, at);
        splice_field(&mut self.max, other.max, at);
        splice_field(&mut self.min, other.min, at);
        splice_field(&mut self.count, other.count, at);
        splice_field(&mut self.sum, other.sum, at);
        splice_field(&mut self.interpolation, other.interpolation, at);
        splice_field(&mut self.step_interpolation, other.step_interpolation, at);
        splice_field(&mut self.continuous_variance, other.continuous_variance, at);
        splice_field(&mut self.discrete_variance, other.discrete_variance, at);
        splice_field(&mut self.total_variation, other.total_variation, at);
    }

    /// Drop every row whose timestamp already occurred, keeping the first
    /// occurrence. Adjacent windows fetched with outside points each carry
    /// their own copy of a shared boundary point.
    pub fn remove_duplicate_timestamps(&mut self) {
        let mut seen = HashSet::with_capacity(self.timestamp.len());
        let keep: Vec<bool> = self.timestamp.iter().map(|ts| seen.insert(*ts)).collect();
        if keep.iter().all(|k| *k) {
            return;
        }
        retain_by_mask(&mut self.timestamp, &keep);
        retain_field(&mut self.value, &keep);
        retain_field(&mut self.average, &keep);
        retain_field(&mut self.max, &keep);
        retain_field(&mut self.min, &keep);
        retain_field(&mut self.count, &keep);
        retain_field(&mut self.sum, &keep);
        retain_field(&mut self.interpolation, &keep);
        retain_field(&mut self.step_interpolation, &keep);
        retain_field(&mut self.continuous_variance, &keep);
        retain_field(&mut self.discrete_variance, &keep);
        retain_field(&mut self.total_variation, &keep);
    }
}

fn retain_by_mask<T>(v: &mut Vec<T>, keep: &[bool]) {
    let mut index = 0;
    v.retain(|_| {
        let kept = keep[index];
        index += 1;
        kept
    });
}

/// Per-series results in the caller's canonical order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatapointsList(Vec<Datapoints>);

impl DatapointsList {
    pub fn new(items: Vec<Datapoints>) -> Self {
        Self(items)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Datapoints> {
        self.0.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Datapoints> {
        self.0.iter()
    }

    pub fn into_inner(self) -> Vec<Datapoints> {
        self.0
    }
}

impl From<Vec<Datapoints>> for DatapointsList {
    fn from(items: Vec<Datapoints>) -> Self {
        Self(items)
    }
}

impl Index<usize> for DatapointsList {
    type Output = Datapoints;

    fn index(&self, index: usize) -> &Datapoints {
        &self.0[index]
    }
}

impl IntoIterator for DatapointsList {
    type Item = Datapoints;
    type IntoIter = std::vec::IntoIter<Datapoints>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a DatapointsList {
    type Item = &'a Datapoints;
    type IntoIter = std::slice::Iter<'a, Datapoints>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
