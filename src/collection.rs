//! Collection gateway.
//!
//! A [`Collection`] holds only the shared API handle and a collection name.
//! Every operation is an independent request/response exchange; no entry
//! state is kept between calls.
//!
//! Error classification follows one rule: a 401 is always
//! [`Error::Unauthorized`]; any other failure becomes the operation's
//! not-found condition and the underlying cause is dropped.

use std::sync::Arc;

use crate::api::{id_filter, Api, Failure, RequestError};
use crate::error::{Error, Result};
use crate::models::{EntryId, OwnedEntry, Values};

/// Stateless handle on one named remote collection.
#[derive(Debug, Clone)]
pub struct Collection {
    api: Arc<Api>,
    name: String,
}

impl Collection {
    pub(crate) fn new(api: Arc<Api>, name: impl Into<String>) -> Self {
        Self {
            api,
            name: name.into(),
        }
    }

    /// The name this gateway addresses.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn not_found(&self) -> impl FnOnce(RequestError) -> Error + '_ {
        move |cause| {
            tracing::debug!("Request on collection {} failed: {}", self.name, cause);
            Error::CollectionNotFound(self.name.clone())
        }
    }

    /// Checks whether the collection exists.
    ///
    /// Any failure other than a 401 reads as "does not exist".
    pub async fn exists(&self) -> Result<bool> {
        match self.api.probe_collection(&self.name).await {
            Ok(_) => Ok(true),
            Err(Failure::Unauthorized) => Err(Error::Unauthorized),
            Err(Failure::Request(cause)) => {
                tracing::debug!("Collection {} not available: {}", self.name, cause);
                Ok(false)
            }
        }
    }

    /// Deletes the collection and all of its entries.
    pub async fn drop(&self) -> Result<()> {
        self.api
            .drop_collection(&self.name)
            .await
            .map_err(|f| f.classify(self.not_found()))?;

        tracing::info!("Dropped collection {}", self.name);
        Ok(())
    }

    /// Renames the collection on the backend.
    ///
    /// This gateway keeps addressing the old name afterwards; use
    /// [`Collection::rename`] to get a gateway bound to the new one.
    pub async fn set_name(&self, new_name: &str) -> Result<()> {
        self.api
            .rename_collection(&self.name, new_name)
            .await
            .map_err(|f| f.classify(self.not_found()))?;

        tracing::info!("Renamed collection {} to {}", self.name, new_name);
        Ok(())
    }

    /// Renames the collection and returns a gateway for the new name.
    pub async fn rename(self, new_name: impl Into<String>) -> Result<Collection> {
        let new_name = new_name.into();
        self.set_name(&new_name).await?;
        Ok(Collection::new(self.api, new_name))
    }

    /// Submits a new record and returns it with its assigned identifier.
    ///
    /// `data` should not carry an `_id`; the backend assigns one.
    pub async fn create_entry(&self, data: Values) -> Result<OwnedEntry> {
        let envelope = self
            .api
            .insert(&self.name, &data)
            .await
            .map_err(|f| f.classify(self.not_found()))?;

        let id = envelope.inserted_id().map_err(self.not_found())?;
        tracing::debug!("Created entry {} in {}", id, self.name);

        Ok(OwnedEntry::new(self.api.clone(), self.name.clone(), id, data))
    }

    /// Fetches exactly one record by identifier.
    pub async fn get_entry_by_id(&self, id: impl Into<EntryId>) -> Result<OwnedEntry> {
        let id = id.into();
        let records = self.find(&id_filter(&id)).await?;

        records
            .into_iter()
            .next()
            .ok_or_else(|| Error::EntryNotFound(id.to_string()))
    }

    /// Fetches every record whose fields equal those in `filters`.
    ///
    /// An empty filter matches everything. Order is as returned by the backend.
    pub async fn get_entries(&self, filters: Values) -> Result<Vec<OwnedEntry>> {
        self.find(&filters).await
    }

    async fn find(&self, filters: &Values) -> Result<Vec<OwnedEntry>> {
        let records = self
            .api
            .find(&self.name, filters)
            .await
            .map_err(|f| f.classify(self.not_found()))?
            .into_records()
            .map_err(self.not_found())?;

        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            match OwnedEntry::from_record(self.api.clone(), self.name.clone(), record) {
                Some(entry) => entries.push(entry),
                None => {
                    tracing::warn!("Skipping record without identifier in {}", self.name);
                }
            }
        }
        Ok(entries)
    }

    /// Deletes one record by identifier.
    pub async fn delete_entry_by_id(&self, id: impl Into<EntryId>) -> Result<()> {
        let id = id.into();
        let deleted = self.delete(&id_filter(&id)).await?;

        if deleted == 0 {
            return Err(Error::EntryNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Deletes every record matching `filters`. Returns the number deleted.
    pub async fn delete_entries(&self, filters: Values) -> Result<u64> {
        self.delete(&filters).await
    }

    async fn delete(&self, filters: &Values) -> Result<u64> {
        let envelope = self
            .api
            .delete(&self.name, filters)
            .await
            .map_err(|f| f.classify(self.not_found()))?;

        envelope.count("deletedCount").map_err(self.not_found())
    }

    /// Merges `data` into one record by identifier.
    pub async fn update_entry_by_id(&self, id: impl Into<EntryId>, data: Values) -> Result<()> {
        let id = id.into();
        let envelope = self
            .api
            .update(&self.name, &id_filter(&id), &data)
            .await
            .map_err(|f| f.classify(self.not_found()))?;

        if envelope.matched_count().map_err(self.not_found())? == 0 {
            return Err(Error::EntryNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Merges `data` into every record matching `filters`. Returns the number modified.
    pub async fn update_entries(&self, filters: Values, data: Values) -> Result<u64> {
        let envelope = self
            .api
            .update(&self.name, &filters, &data)
            .await
            .map_err(|f| f.classify(self.not_found()))?;

        envelope.count("modifiedCount").map_err(self.not_found())
    }
}
