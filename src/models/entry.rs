//! Local mirrors of remote records.
//!
//! An entry is a field mapping plus the identifier the backend assigned at
//! creation. There is no shared identity table: every read or notification
//! builds a fresh instance, so two instances for the same identifier may hold
//! different values. Only an explicit re-fetch brings one up to date.
//!
//! Two tiers exist over the same record:
//! - [`ObservedEntry`] is read-only and carries no credential.
//! - [`OwnedEntry`] is bound to the client's credential and can update or
//!   delete the remote record. Its local values change only after the
//!   backend acknowledged the change.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::api::{id_filter, Api};
use crate::error::{Error, Result};

/// Field mapping of a record. The schema is defined by the caller.
pub type Values = serde_json::Map<String, Value>;

/// Field holding a record's identifier.
pub const ID_FIELD: &str = "_id";

/// Opaque identifier assigned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryId(String);

impl EntryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn from_json(value: &Value) -> Option<Self> {
        value.as_str().map(Self::new)
    }

    pub(crate) fn to_json(&self) -> Value {
        Value::String(self.0.clone())
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for EntryId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for EntryId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Read access shared by both entry tiers.
pub trait EntryView {
    /// The full field mapping.
    fn values(&self) -> &Values;

    /// Name of the owning collection as last known to this instance.
    fn collection_name(&self) -> &str;

    /// The value at `key`, or `None` if absent.
    fn value_of(&self, key: &str) -> Option<&Value> {
        self.values().get(key)
    }

    /// The value at `key` converted to `T`.
    ///
    /// Returns `None` when the key is absent or the value does not fit `T`.
    fn value_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.value_of(key).and_then(|v| T::deserialize(v).ok())
    }
}

/// Read-only view of a record's values.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedEntry {
    collection_name: String,
    values: Values,
}

impl ObservedEntry {
    pub fn new(collection_name: impl Into<String>, values: Values) -> Self {
        Self {
            collection_name: collection_name.into(),
            values,
        }
    }

    pub fn into_values(self) -> Values {
        self.values
    }
}

impl EntryView for ObservedEntry {
    fn values(&self) -> &Values {
        &self.values
    }

    fn collection_name(&self) -> &str {
        &self.collection_name
    }
}

/// Credential-bound mirror of a record that can mutate it remotely.
#[derive(Debug, Clone)]
pub struct OwnedEntry {
    id: EntryId,
    collection_name: String,
    values: Values,
    api: Arc<Api>,
}

impl OwnedEntry {
    /// Builds an entry with a known identifier, writing it into `_id`.
    pub(crate) fn new(
        api: Arc<Api>,
        collection_name: impl Into<String>,
        id: EntryId,
        mut values: Values,
    ) -> Self {
        values.insert(ID_FIELD.to_string(), id.to_json());
        Self {
            id,
            collection_name: collection_name.into(),
            values,
            api,
        }
    }

    /// Builds an entry from a record that carries its own `_id`.
    pub(crate) fn from_record(
        api: Arc<Api>,
        collection_name: impl Into<String>,
        values: Values,
    ) -> Option<Self> {
        let id = values.get(ID_FIELD).and_then(EntryId::from_json)?;
        Some(Self {
            id,
            collection_name: collection_name.into(),
            values,
            api,
        })
    }

    pub fn id(&self) -> &EntryId {
        &self.id
    }

    /// Copy of the current values without the ability to mutate.
    pub fn to_observed(&self) -> ObservedEntry {
        ObservedEntry::new(self.collection_name.clone(), self.values.clone())
    }

    /// Sets one field remotely, then locally.
    ///
    /// Returns the full mapping after the merge. On failure the local values
    /// are left untouched.
    pub async fn update_value(&mut self, key: impl Into<String>, value: Value) -> Result<&Values> {
        let mut partial = Values::new();
        partial.insert(key.into(), value);
        self.update_values(partial).await
    }

    /// Sets several fields in one round trip. Fields not named are untouched.
    ///
    /// The identifier cannot be changed; an `_id` key in `partial` is ignored.
    pub async fn update_values(&mut self, mut partial: Values) -> Result<&Values> {
        if partial.remove(ID_FIELD).is_some() {
            tracing::warn!("Ignoring attempt to overwrite the identifier of {}", self.id);
        }

        self.api
            .update(&self.collection_name, &id_filter(&self.id), &partial)
            .await
            .map_err(|f| f.classify(Error::EntryUpdateFailed))?;

        self.values.extend(partial);
        Ok(&self.values)
    }

    /// Removes the record remotely. The instance is consumed.
    pub async fn delete(self) -> Result<()> {
        self.api
            .delete(&self.collection_name, &id_filter(&self.id))
            .await
            .map_err(|f| f.classify(Error::EntryUpdateFailed))?;

        tracing::debug!("Deleted entry {} from {}", self.id, self.collection_name);
        Ok(())
    }
}

impl EntryView for OwnedEntry {
    fn values(&self) -> &Values {
        &self.values
    }

    fn collection_name(&self) -> &str {
        &self.collection_name
    }
}
