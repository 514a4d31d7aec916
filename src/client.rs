//! Client façade.
//!
//! A [`Client`] is built once per credential. It owns the shared HTTP handle
//! and the [`SubscriptionManager`], hands out [`Collection`] gateways, and
//! registers change listeners.

use std::sync::Arc;

use crate::api::Api;
use crate::collection::Collection;
use crate::config::{ClientConfig, Credential};
use crate::error::{Error, Result};
use crate::models::{ObservedEntry, OwnedEntry};
use crate::realtime::{
    ChangeEvent, ChannelState, EventKind, EventMeta, ListenerResult, SubscriptionError,
    SubscriptionManager,
};

/// Entry point to the backend for one credential.
#[derive(Debug)]
pub struct Client {
    api: Arc<Api>,
    subscriptions: SubscriptionManager,
}

impl Client {
    /// Creates a client configured from the environment.
    ///
    /// The real-time channel starts connecting immediately, so this must be
    /// called from within a Tokio runtime.
    pub fn new(credential: impl Into<Credential>) -> Self {
        Self::with_config(credential, ClientConfig::from_env())
    }

    /// Creates a client with explicit configuration.
    pub fn with_config(credential: impl Into<Credential>, config: ClientConfig) -> Self {
        let api = Arc::new(Api::new(config, credential.into()));
        let subscriptions = SubscriptionManager::start(api.clone());

        Self { api, subscriptions }
    }

    /// Returns a gateway for `name` without contacting the backend.
    pub fn get_collection(&self, name: impl Into<String>) -> Collection {
        Collection::new(self.api.clone(), name)
    }

    /// Returns a gateway for `name` after checking that it exists.
    pub async fn fetch_collection(&self, name: impl Into<String>) -> Result<Collection> {
        let collection = self.get_collection(name);
        if collection.exists().await? {
            Ok(collection)
        } else {
            Err(Error::CollectionNotFound(collection.name().to_string()))
        }
    }

    /// Creates the collection `name` and returns a gateway for it.
    pub async fn create_collection(&self, name: impl Into<String>) -> Result<Collection> {
        let name = name.into();
        self.api
            .create_collection(&name)
            .await
            .map_err(|f| {
                f.classify(|cause| {
                    tracing::debug!("Creating collection {} failed: {}", name, cause);
                    Error::CollectionAlreadyExists(name.clone())
                })
            })?;

        tracing::info!("Created collection {}", name);
        Ok(self.get_collection(name))
    }

    /// Registers a listener for `kind`. Returns the client for chaining.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> &Self
    where
        F: Fn(&ChangeEvent) -> ListenerResult + Send + Sync + 'static,
    {
        self.subscriptions.subscribe(kind, listener);
        self
    }

    /// Registers a listener for created entries.
    pub fn on_entry_created<F>(&self, listener: F) -> &Self
    where
        F: Fn(&OwnedEntry, &EventMeta) -> ListenerResult + Send + Sync + 'static,
    {
        self.on(EventKind::EntryCreated, move |event| match event {
            ChangeEvent::Created { entry, meta } => listener(entry, meta),
            _ => Ok(()),
        })
    }

    /// Registers a listener for deleted entries.
    pub fn on_entry_deleted<F>(&self, listener: F) -> &Self
    where
        F: Fn(&ObservedEntry, &EventMeta) -> ListenerResult + Send + Sync + 'static,
    {
        self.on(EventKind::EntryDeleted, move |event| match event {
            ChangeEvent::Deleted { entry, meta } => listener(entry, meta),
            _ => Ok(()),
        })
    }

    /// Registers a listener for updated entries, called with the old and new values.
    pub fn on_entry_updated<F>(&self, listener: F) -> &Self
    where
        F: Fn(&ObservedEntry, &OwnedEntry, &EventMeta) -> ListenerResult + Send + Sync + 'static,
    {
        self.on(EventKind::EntryUpdated, move |event| match event {
            ChangeEvent::Updated { old, new, meta } => listener(old, new, meta),
            _ => Ok(()),
        })
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn channel_state(&self) -> ChannelState {
        self.subscriptions.state()
    }

    /// Waits for the real-time channel to connect.
    ///
    /// An error here is terminal: no change notifications will be delivered
    /// for the lifetime of this client.
    pub async fn wait_connected(&self) -> std::result::Result<(), SubscriptionError> {
        self.subscriptions.wait_connected().await
    }
}
