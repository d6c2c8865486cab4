use chrono::{DateTime, Utc};
use common::SagaId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Result, StoreError};

/// Position of an entry in a saga's journal, used for optimistic concurrency.
///
/// Versions start at 1 for the first entry and increment by 1 for each
/// subsequent entry of the same saga.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// The version of a saga with no entries yet.
    pub fn initial() -> Self {
        Self(0)
    }

    pub fn first() -> Self {
        Self(1)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Options for appending to a saga journal.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    /// Expected version of the saga. If None, no version check is performed.
    pub expected_version: Option<Version>,
}

impl AppendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// Expects the saga to have no entries yet.
    pub fn expect_new() -> Self {
        Self {
            expected_version: Some(Version::initial()),
        }
    }
}

/// One recorded step of a saga run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub entry_id: Uuid,
    pub saga_id: SagaId,
    /// The kind of saga, e.g. "SubscriptionPurchase".
    pub saga_type: String,
    /// The event name, e.g. "StepCompleted".
    pub event_type: String,
    /// The version of the saga after this entry.
    pub version: Version,
    pub recorded_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl JournalEntry {
    pub fn builder() -> JournalEntryBuilder {
        JournalEntryBuilder::default()
    }
}

/// Builder for journal entries.
#[derive(Debug, Default)]
pub struct JournalEntryBuilder {
    saga_id: Option<SagaId>,
    saga_type: Option<String>,
    event_type: Option<String>,
    version: Option<Version>,
    recorded_at: Option<DateTime<Utc>>,
    payload: Option<serde_json::Value>,
}

impl JournalEntryBuilder {
    pub fn saga_id(mut self, id: SagaId) -> Self {
        self.saga_id = Some(id);
        self
    }

    pub fn saga_type(mut self, saga_type: impl Into<String>) -> Self {
        self.saga_type = Some(saga_type.into());
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// Sets the timestamp. Defaults to now.
    pub fn recorded_at(mut self, at: DateTime<Utc>) -> Self {
        self.recorded_at = Some(at);
        self
    }

    /// Serializes the payload.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Builds the entry, failing on the first missing required field.
    pub fn build(self) -> Result<JournalEntry> {
        Ok(JournalEntry {
            entry_id: Uuid::new_v4(),
            saga_id: self.saga_id.ok_or(StoreError::InvalidEntry("saga_id"))?,
            saga_type: self.saga_type.ok_or(StoreError::InvalidEntry("saga_type"))?,
            event_type: self.event_type.ok_or(StoreError::InvalidEntry("event_type"))?,
            version: self.version.ok_or(StoreError::InvalidEntry("version"))?,
            recorded_at: self.recorded_at.unwrap_or_else(Utc::now),
            payload: self.payload.ok_or(StoreError::InvalidEntry("payload"))?,
        })
    }
}

/// Checks a batch targets one saga with consecutive versions.
pub(crate) fn validate_entries_for_append(entries: &[JournalEntry]) -> Result<()> {
    let Some(first) = entries.first() else {
        return Err(StoreError::Conflict(
            "cannot append an empty journal batch".to_string(),
        ));
    };

    let mut expected = first.version;
    for entry in entries.iter().skip(1) {
        if entry.saga_id != first.saga_id {
            return Err(StoreError::Conflict(
                "all journal entries must belong to the same saga".to_string(),
            ));
        }
        expected = expected.next();
        if entry.version != expected {
            return Err(StoreError::Conflict(format!(
                "journal versions must be sequential: expected {expected}, got {}",
                entry.version
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(saga_id: SagaId, version: i64) -> JournalEntry {
        JournalEntry::builder()
            .saga_id(saga_id)
            .saga_type("SubscriptionPurchase")
            .event_type("StepStarted")
            .version(Version::new(version))
            .payload_raw(serde_json::json!({"step": "resolve_pricing"}))
            .build()
            .unwrap()
    }

    #[test]
    fn version_ordering() {
        assert!(Version::new(1) < Version::new(2));
        assert_eq!(Version::initial().next(), Version::first());
    }

    #[test]
    fn builder_requires_fields() {
        let err = JournalEntry::builder().saga_id(SagaId::new()).build().unwrap_err();
        assert!(matches!(err, StoreError::InvalidEntry("saga_type")));
    }

    #[test]
    fn sequential_batch_is_valid() {
        let saga_id = SagaId::new();
        assert!(validate_entries_for_append(&[entry(saga_id, 1), entry(saga_id, 2)]).is_ok());
    }

    #[test]
    fn gap_in_versions_is_rejected() {
        let saga_id = SagaId::new();
        assert!(validate_entries_for_append(&[entry(saga_id, 1), entry(saga_id, 3)]).is_err());
    }

    #[test]
    fn mixed_sagas_are_rejected() {
        assert!(validate_entries_for_append(&[entry(SagaId::new(), 1), entry(SagaId::new(), 2)]).is_err());
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert!(validate_entries_for_append(&[]).is_err());
    }
}
