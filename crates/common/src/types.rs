use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares an identifier for a row that already exists in the platform
/// database (businesses, categories, the price catalog, ...).
///
/// Row identifiers are assigned by the database and are totally ordered,
/// which the price catalog relies on to break creation-time ties.
macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Creates an identifier from a raw database value.
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            /// Returns the raw database value.
            pub const fn as_i64(&self) -> i64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

/// Declares an identifier minted by this system when it creates a record.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

row_id!(
    /// Identifier of a business listed on the marketplace.
    BusinessId
);
row_id!(
    /// Identifier of a service category.
    CategoryId
);
row_id!(
    /// Identifier of an operating location (suburb/region) from the search index.
    LocationId
);
row_id!(
    /// Identifier of a subscription plan.
    PlanId
);
row_id!(
    /// Identifier of a price component in the catalog.
    PriceComponentId
);
row_id!(
    /// Identifier of a stored credit card.
    CreditCardId
);

uuid_id!(
    /// Identifier of a subscription created by a purchase.
    SubscriptionId
);
uuid_id!(
    /// Identifier of a recorded payment.
    PaymentId
);
uuid_id!(
    /// Identifier of a single purchase saga run.
    SagaId
);
