//! Price component catalog.
//!
//! Prices are keyed by (category, location) and never edited in place: a
//! price change appends a new component, and the latest one per key is the
//! *active* price. Earlier components stay as history.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::{CategoryId, LocationId, PriceComponentId};
use serde::{Deserialize, Serialize};

use crate::Money;

/// The (category, location) pair a price applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PriceKey {
    pub category_id: CategoryId,
    pub location_id: LocationId,
}

impl PriceKey {
    pub fn new(category_id: CategoryId, location_id: LocationId) -> Self {
        Self {
            category_id,
            location_id,
        }
    }
}

/// A priced offering for one category in one location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceComponent {
    pub id: PriceComponentId,
    pub category_id: CategoryId,
    pub location_id: LocationId,
    pub amount: Money,
    pub created_at: DateTime<Utc>,
}

impl PriceComponent {
    pub fn key(&self) -> PriceKey {
        PriceKey::new(self.category_id, self.location_id)
    }

    /// Creation order: latest `created_at` first, ties broken by the higher id.
    fn creation_order(&self) -> (DateTime<Utc>, PriceComponentId) {
        (self.created_at, self.id)
    }

    /// Returns true if `self` supersedes `other` under the latest-wins rule.
    pub fn supersedes(&self, other: &PriceComponent) -> bool {
        self.creation_order() > other.creation_order()
    }
}

/// Append-only price history, indexed by key.
///
/// Each key maps to its components in creation order, so the active component
/// is always the last element.
#[derive(Debug, Clone, Default)]
pub struct PriceHistory {
    by_key: HashMap<PriceKey, Vec<PriceComponent>>,
}

impl PriceHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a component to the history of its key.
    ///
    /// Components that arrive out of creation order are slotted into place so
    /// the ordering invariant holds regardless of insertion order.
    pub fn append(&mut self, component: PriceComponent) {
        let entries = self.by_key.entry(component.key()).or_default();
        let position =
            entries.partition_point(|existing| !existing.supersedes(&component));
        entries.insert(position, component);
    }

    /// Returns the active component for a key, if any price exists.
    pub fn active(&self, key: &PriceKey) -> Option<&PriceComponent> {
        self.by_key.get(key).and_then(|entries| entries.last())
    }

    /// Returns every component ever recorded for a key, oldest first.
    pub fn history(&self, key: &PriceKey) -> &[PriceComponent] {
        self.by_key.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Returns the active component of every key in the cross-product of the
    /// given categories and locations. Keys without a price are skipped.
    pub fn active_for(
        &self,
        categories: &[CategoryId],
        locations: &[LocationId],
    ) -> Vec<PriceComponent> {
        categories
            .iter()
            .flat_map(|category_id| {
                locations
                    .iter()
                    .map(move |location_id| PriceKey::new(*category_id, *location_id))
            })
            .filter_map(|key| self.active(&key).cloned())
            .collect()
    }

    /// Total number of components across all keys, history included.
    pub fn len(&self) -> usize {
        self.by_key.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}
