//! Price selection for a business.
//!
//! Given the business's categories, the locations it operates in and the
//! active catalog components for that cross-product, [`select_price_components`]
//! decides which snapshots a new subscription gets.

use std::collections::{BTreeMap, BTreeSet};

use common::{BusinessId, CategoryId, LocationId};
use serde::{Deserialize, Serialize};

use crate::business::Category;
use crate::catalog::{PriceComponent, PriceKey};
use crate::error::DomainError;
use crate::subscription::SubscriptionPriceComponentInput;
use crate::Money;

/// Selects one snapshot per (category, location) pair that has an active price.
///
/// Archived categories never take part. Pairs without a component are skipped.
/// When `active` carries several components for one pair the latest one wins,
/// so the result does not depend on the order the store returned them in.
/// A component outside the cross-product, or with a negative amount, means the
/// catalog data is malformed and the whole selection fails.
///
/// The output is ordered by (category, location).
pub fn select_price_components(
    categories: &[Category],
    locations: &[LocationId],
    active: &[PriceComponent],
) -> Result<Vec<SubscriptionPriceComponentInput>, DomainError> {
    let category_ids: BTreeSet<CategoryId> = categories
        .iter()
        .filter(|category| category.is_active())
        .map(|category| category.id)
        .collect();
    let location_ids: BTreeSet<LocationId> = locations.iter().copied().collect();

    let mut selected: BTreeMap<PriceKey, &PriceComponent> = BTreeMap::new();
    for component in active {
        if !location_ids.contains(&component.location_id) {
            continue;
        }
        if !category_ids.contains(&component.category_id) {
            if categories
                .iter()
                .any(|category| category.id == component.category_id && category.archived)
            {
                continue;
            }
            return Err(DomainError::UnexpectedPriceComponent {
                price_component_id: component.id,
                category_id: component.category_id,
                location_id: component.location_id,
            });
        }

        selected
            .entry(component.key())
            .and_modify(|current| {
                if component.supersedes(current) {
                    *current = component;
                }
            })
            .or_insert(component);
    }

    selected
        .into_values()
        .map(|component| {
            let input = SubscriptionPriceComponentInput::snapshot(component);
            input.validate()?;
            Ok(input)
        })
        .collect()
}

/// Recommended retail price preview shown before a purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub business_id: BusinessId,
    pub price_components: Vec<SubscriptionPriceComponentInput>,
    /// Sum of the applicable active price components.
    pub rrp: Money,
}

impl Quote {
    pub fn new(business_id: BusinessId, price_components: Vec<SubscriptionPriceComponentInput>) -> Self {
        let rrp = price_components.iter().map(|input| input.amount).sum();
        Self {
            business_id,
            price_components,
            rrp,
        }
    }
}
