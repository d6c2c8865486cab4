//! Persistence for the subscription purchase saga.
//!
//! The [`store`] traits cover the platform records the saga reads, the price
//! catalog, the atomic subscription commit and the saga journal. Two
//! implementations are provided: [`InMemoryStore`] and [`PostgresStore`].

pub mod error;
pub mod journal;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use journal::{AppendOptions, JournalEntry, JournalEntryBuilder, Version};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use store::{BusinessRepository, PriceCatalog, SagaJournal, Store, SubscriptionStore};
