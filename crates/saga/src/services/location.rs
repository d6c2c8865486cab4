//! Location resolver trait, search-backed client and in-memory implementation.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use common::{BusinessId, LocationId};

use crate::error::LocationError;

/// Finds the locations a business operates in.
///
/// An empty set is a valid answer. A fault is reported as [`LocationError`]
/// and must never be confused with "no locations".
#[async_trait]
pub trait LocationResolver: Send + Sync {
    async fn resolve_locations(
        &self,
        business_id: BusinessId,
    ) -> Result<BTreeSet<LocationId>, LocationError>;
}

#[async_trait]
impl<T: LocationResolver + ?Sized> LocationResolver for Arc<T> {
    async fn resolve_locations(
        &self,
        business_id: BusinessId,
    ) -> Result<BTreeSet<LocationId>, LocationError> {
        (**self).resolve_locations(business_id).await
    }
}

/// Resolves locations through the search service's HTTP API.
///
/// `GET {base}/businesses/{id}/locations` answers with a JSON array of
/// location ids.
#[derive(Debug, Clone)]
pub struct SearchLocationResolver {
    base_url: String,
    http: reqwest::Client,
}

impl SearchLocationResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LocationResolver for SearchLocationResolver {
    #[tracing::instrument(skip(self), fields(%business_id))]
    async fn resolve_locations(
        &self,
        business_id: BusinessId,
    ) -> Result<BTreeSet<LocationId>, LocationError> {
        let url = format!("{}/businesses/{}/locations", self.base_url, business_id);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| LocationError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LocationError::Unavailable(format!(
                "search service returned {status}"
            )));
        }

        let ids: Vec<i64> = response
            .json()
            .await
            .map_err(|e| LocationError::Unavailable(format!("malformed location list: {e}")))?;

        tracing::debug!(count = ids.len(), "locations resolved");
        Ok(ids.into_iter().map(LocationId::new).collect())
    }
}

#[derive(Debug, Default)]
struct InMemoryLocationState {
    locations: HashMap<BusinessId, BTreeSet<LocationId>>,
    unavailable: bool,
    delay: Option<Duration>,
    calls: usize,
}

/// In-memory location resolver for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLocationResolver {
    state: Arc<RwLock<InMemoryLocationState>>,
}

impl InMemoryLocationResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_locations(
        &self,
        business_id: BusinessId,
        locations: impl IntoIterator<Item = LocationId>,
    ) {
        self.write()
            .locations
            .insert(business_id, locations.into_iter().collect());
    }

    /// Makes every lookup fail as if the search service were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.write().unavailable = unavailable;
    }

    /// Delays every lookup, for exercising the caller's timeout.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.write().delay = delay;
    }

    /// Returns how many lookups were made.
    pub fn call_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .calls
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, InMemoryLocationState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl LocationResolver for InMemoryLocationResolver {
    async fn resolve_locations(
        &self,
        business_id: BusinessId,
    ) -> Result<BTreeSet<LocationId>, LocationError> {
        let delay = {
            let mut state = self.write();
            state.calls += 1;
            state.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.write();
        if state.unavailable {
            return Err(LocationError::Unavailable(
                "search service unreachable".to_string(),
            ));
        }
        Ok(state
            .locations
            .get(&business_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_business_has_no_locations() {
        let resolver = InMemoryLocationResolver::new();
        let locations = resolver
            .resolve_locations(BusinessId::new(1))
            .await
            .unwrap();
        assert!(locations.is_empty());
        assert_eq!(resolver.call_count(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_is_an_error_not_an_empty_set() {
        let resolver = InMemoryLocationResolver::new();
        resolver.set_locations(BusinessId::new(1), [LocationId::new(100)]);
        resolver.set_unavailable(true);

        let result = resolver.resolve_locations(BusinessId::new(1)).await;
        assert!(matches!(result, Err(LocationError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_search_resolver_parses_location_ids() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/businesses/42/locations")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("[100, 101, 100]")
            .create_async()
            .await;

        let resolver = SearchLocationResolver::new(server.url());
        let locations = resolver
            .resolve_locations(BusinessId::new(42))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(
            locations.into_iter().collect::<Vec<_>>(),
            vec![LocationId::new(100), LocationId::new(101)]
        );
    }

    #[tokio::test]
    async fn test_search_resolver_empty_list() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/businesses/42/locations")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let resolver = SearchLocationResolver::new(format!("{}/", server.url()));
        let locations = resolver
            .resolve_locations(BusinessId::new(42))
            .await
            .unwrap();
        assert!(locations.is_empty());
    }

    #[tokio::test]
    async fn test_search_resolver_server_error_is_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/businesses/42/locations")
            .with_status(503)
            .create_async()
            .await;

        let resolver = SearchLocationResolver::new(server.url());
        let result = resolver.resolve_locations(BusinessId::new(42)).await;
        assert!(matches!(result, Err(LocationError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_search_resolver_malformed_body_is_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/businesses/42/locations")
            .with_status(200)
            .with_body("{\"error\": true}")
            .create_async()
            .await;

        let resolver = SearchLocationResolver::new(server.url());
        let result = resolver.resolve_locations(BusinessId::new(42)).await;
        assert!(matches!(result, Err(LocationError::Unavailable(_))));
    }
}
