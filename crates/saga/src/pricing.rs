//! Pricing resolution for a purchase.

use std::time::Duration;

use common::{BusinessId, CategoryId, LocationId};
use domain::{Quote, SubscriptionPriceComponentInput, select_price_components};
use store::{BusinessRepository, PriceCatalog};

use crate::error::{LocationError, PricingError};
use crate::services::location::LocationResolver;

/// Shown in place of the RRP when pricing could not be worked out.
pub const RRP_UNAVAILABLE: &str = "Error calculating RRP";

/// Works out which price snapshots a new subscription gets.
///
/// Reads only. The location lookup is bounded by `location_timeout`.
#[derive(Debug, Clone)]
pub struct PricingResolver<S, L> {
    store: S,
    locations: L,
    location_timeout: Duration,
}

impl<S, L> PricingResolver<S, L>
where
    S: BusinessRepository + PriceCatalog,
    L: LocationResolver,
{
    pub fn new(store: S, locations: L, location_timeout: Duration) -> Self {
        Self {
            store,
            locations,
            location_timeout,
        }
    }

    /// Returns one snapshot per (active category, location) pair that has
    /// an active price, ordered by pair.
    ///
    /// An empty category or location set yields an empty list, not an error.
    #[tracing::instrument(skip(self), fields(%business_id))]
    pub async fn resolve(
        &self,
        business_id: BusinessId,
    ) -> Result<Vec<SubscriptionPriceComponentInput>, PricingError> {
        let categories = self.store.active_categories(business_id).await?;

        let locations = tokio::time::timeout(
            self.location_timeout,
            self.locations.resolve_locations(business_id),
        )
        .await
        .map_err(|_| LocationError::Timeout(self.location_timeout))??;

        if categories.is_empty() || locations.is_empty() {
            tracing::debug!(
                categories = categories.len(),
                locations = locations.len(),
                "nothing to price"
            );
            return Ok(Vec::new());
        }

        let category_ids: Vec<CategoryId> = categories.iter().map(|c| c.id).collect();
        let location_ids: Vec<LocationId> = locations.into_iter().collect();
        let active = self
            .store
            .active_price_components(&category_ids, &location_ids)
            .await?;

        let selected = select_price_components(&categories, &location_ids, &active)?;
        tracing::debug!(selected = selected.len(), "price components resolved");
        Ok(selected)
    }

    /// Returns the applicable components and their sum as the RRP preview.
    pub async fn quote(&self, business_id: BusinessId) -> Result<Quote, PricingError> {
        let components = self.resolve(business_id).await?;
        Ok(Quote::new(business_id, components))
    }
}
