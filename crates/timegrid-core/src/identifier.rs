//! Series identifiers and the argument normalizer.
//!
//! A series is addressed either by its numeric id or by its external string
//! id, optionally with a per-series aggregate override. Callers may hand the
//! client a single identifier or a list of them, in either or both of the
//! `id` and `external_id` slots; [`normalize`] flattens that into one
//! canonical ordered sequence and records whether the caller's shape was a
//! single series.

use serde::Serialize;

use crate::aggregate::Aggregate;
use crate::error::{Error, Result};

/// Identity of one time series, with optional per-series aggregates.
#[derive(Debug, Clone, PartialEq)]
pub enum Identifier {
    Id(i64),
    ExternalId(String),
    IdWithAggregates(i64, Vec<Aggregate>),
    ExternalIdWithAggregates(String, Vec<Aggregate>),
}

impl Identifier {
    pub fn id(id: i64) -> Self {
        Self::Id(id)
    }

    pub fn external_id(external_id: impl Into<String>) -> Self {
        Self::ExternalId(external_id.into())
    }

    /// Attach a per-series aggregate override.
    pub fn with_aggregates(self, aggregates: Vec<Aggregate>) -> Self {
        match self {
            Self::Id(id) | Self::IdWithAggregates(id, _) => {
                Self::IdWithAggregates(id, aggregates)
            }
            Self::ExternalId(ext) | Self::ExternalIdWithAggregates(ext, _) => {
                Self::ExternalIdWithAggregates(ext, aggregates)
            }
        }
    }

    pub fn is_by_id(&self) -> bool {
        matches!(self, Self::Id(_) | Self::IdWithAggregates(_, _))
    }

    pub fn numeric_id(&self) -> Option<i64> {
        match self {
            Self::Id(id) | Self::IdWithAggregates(id, _) => Some(*id),
            _ => None,
        }
    }

    pub fn as_external_id(&self) -> Option<&str> {
        match self {
            Self::ExternalId(ext) | Self::ExternalIdWithAggregates(ext, _) => Some(ext),
            _ => None,
        }
    }

    pub fn aggregates(&self) -> Option<&[Aggregate]> {
        match self {
            Self::IdWithAggregates(_, aggs) | Self::ExternalIdWithAggregates(_, aggs) => {
                Some(aggs)
            }
            _ => None,
        }
    }
}

/// Canonical wire form of one requested series.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregates: Option<Vec<Aggregate>>,
}

impl From<&Identifier> for SeriesItem {
    fn from(identifier: &Identifier) -> Self {
        Self {
            id: identifier.numeric_id(),
            external_id: identifier.as_external_id().map(str::to_string),
            aggregates: identifier.aggregates().map(<[Aggregate]>::to_vec),
        }
    }
}

/// The shape in which a caller handed identifiers to one argument slot.
#[derive(Debug, Clone, PartialEq)]
pub enum IdentifierArg {
    One(Identifier),
    Many(Vec<Identifier>),
}

impl From<i64> for IdentifierArg {
    fn from(id: i64) -> Self {
        Self::One(Identifier::Id(id))
    }
}

impl From<Vec<i64>> for IdentifierArg {
    fn from(ids: Vec<i64>) -> Self {
        Self::Many(ids.into_iter().map(Identifier::Id).collect())
    }
}

impl From<&str> for IdentifierArg {
    fn from(external_id: &str) -> Self {
        Self::One(Identifier::external_id(external_id))
    }
}

impl From<String> for IdentifierArg {
    fn from(external_id: String) -> Self {
        Self::One(Identifier::ExternalId(external_id))
    }
}

impl From<Vec<String>> for IdentifierArg {
    fn from(external_ids: Vec<String>) -> Self {
        Self::Many(external_ids.into_iter().map(Identifier::ExternalId).collect())
    }
}

impl From<Vec<&str>> for IdentifierArg {
    fn from(external_ids: Vec<&str>) -> Self {
        Self::Many(
            external_ids
                .into_iter()
                .map(Identifier::external_id)
                .collect(),
        )
    }
}

impl From<Identifier> for IdentifierArg {
    fn from(identifier: Identifier) -> Self {
        Self::One(identifier)
    }
}

impl From<Vec<Identifier>> for IdentifierArg {
    fn from(identifiers: Vec<Identifier>) -> Self {
        Self::Many(identifiers)
    }
}

impl IdentifierArg {
    fn into_items(self) -> Vec<Identifier> {
        match self {
            Self::One(item) => vec![item],
            Self::Many(items) => items,
        }
    }

    fn is_one(&self) -> bool {
        matches!(self, Self::One(_))
    }
}

/// The canonical form of a caller's identifier arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedIdentifiers {
    /// By-id items first in the caller's order, then by-external-id items in
    /// the caller's order.
    pub items: Vec<Identifier>,
    /// True iff the caller passed a single identifier in exactly one slot;
    /// controls whether the top-level result is a single series.
    pub is_single: bool,
}

/// Flatten the `id` / `external_id` argument pair into canonical order.
pub fn normalize(
    id: Option<IdentifierArg>,
    external_id: Option<IdentifierArg>,
) -> Result<NormalizedIdentifiers> {
    if id.is_none() && external_id.is_none() {
        return Err(Error::InvalidIdentifier(
            "at least one of id or external_id must be given".to_string(),
        ));
    }

    let is_single = match (&id, &external_id) {
        (Some(arg), None) | (None, Some(arg)) => arg.is_one(),
        _ => false,
    };

    let mut items = Vec::new();
    if let Some(arg) = id {
        for item in arg.into_items() {
            if !item.is_by_id() {
                return Err(Error::InvalidIdentifier(
                    "the id argument only accepts numeric identifiers".to_string(),
                ));
            }
            items.push(item);
        }
    }
    if let Some(arg) = external_id {
        for item in arg.into_items() {
            if item.is_by_id() {
                return Err(Error::InvalidIdentifier(
                    "the external_id argument only accepts string identifiers".to_string(),
                ));
            }
            items.push(item);
        }
    }

    Ok(NormalizedIdentifiers { items, is_single })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_id_is_single() {
        let norm = normalize(Some(42.into()), None).unwrap();
        assert_eq!(norm.items, vec![Identifier::Id(42)]);
        assert!(norm.is_single);
    }

    #[test]
    fn test_single_external_id_is_single() {
        let norm = normalize(None, Some("abc".into())).unwrap();
        assert_eq!(norm.items, vec![Identifier::external_id("abc")]);
        assert!(norm.is_single);
    }

    #[test]
    fn test_list_is_not_single() {
        let norm = normalize(Some(vec![10, 20].into()), None).unwrap();
        assert_eq!(norm.items.len(), 2);
        assert!(!norm.is_single);
    }

    #[test]
    fn test_both_slots_never_single() {
        let norm = normalize(Some(42.into()), Some("abc".into())).unwrap();
        assert!(!norm.is_single);
    }

    #[test]
    fn test_ids_precede_external_ids() {
        let norm = normalize(Some(vec![10, 20].into()), Some("abc".into())).unwrap();
        assert_eq!(
            norm.items,
            vec![
                Identifier::Id(10),
                Identifier::Id(20),
                Identifier::external_id("abc"),
            ]
        );
    }

    #[test]
    fn test_neither_slot_rejected() {
        assert!(matches!(
            normalize(None, None),
            Err(Error::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_wrong_slot_rejected() {
        let err = normalize(Some(IdentifierArg::One(Identifier::external_id("abc"))), None);
        assert!(matches!(err, Err(Error::InvalidIdentifier(_))));

        let err = normalize(None, Some(IdentifierArg::One(Identifier::id(1))));
        assert!(matches!(err, Err(Error::InvalidIdentifier(_))));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let norm = normalize(
            Some(vec![Identifier::id(1).with_aggregates(vec![Aggregate::Min])].into()),
            Some("abc".into()),
        )
        .unwrap();
        let (ids, external_ids): (Vec<_>, Vec<_>) =
            norm.items.iter().cloned().partition(Identifier::is_by_id);
        let again = normalize(Some(ids.into()), Some(external_ids.into())).unwrap();
        assert_eq!(again.items, norm.items);
        assert_eq!(again.is_single, norm.is_single);
    }

    #[test]
    fn test_series_item_wire_form() {
        let item = SeriesItem::from(
            &Identifier::id(7).with_aggregates(vec![Aggregate::Average, Aggregate::Count]),
        );
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": 7, "aggregates": ["average", "count"]})
        );

        let item = SeriesItem::from(&Identifier::external_id("abc"));
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json, serde_json::json!({"externalId": "abc"}));
    }
}
