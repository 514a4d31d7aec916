//! Change events and listener fan-out.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::error::SubscriptionError;
use super::protocol::{EntryPayload, EventEnvelope, EventKind, UpdatePayload};
use crate::api::Api;
use crate::models::{ObservedEntry, OwnedEntry};

/// Error a listener may return; it is logged and otherwise ignored.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Return type of every listener.
pub type ListenerResult = Result<(), ListenerError>;

pub(crate) type Listener = Arc<dyn Fn(&ChangeEvent) -> ListenerResult + Send + Sync>;

/// Where and when a change happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMeta {
    /// Identifier of the database the change originated in
    pub database_id: String,
    pub timestamp: DateTime<Utc>,
}

/// A decoded change notification.
///
/// Entries are built fresh for every event; they are not linked to any other
/// instance that mirrors the same record.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    Created {
        entry: OwnedEntry,
        meta: EventMeta,
    },
    /// The record is gone remotely, so only its last values are exposed.
    Deleted {
        entry: ObservedEntry,
        meta: EventMeta,
    },
    Updated {
        old: ObservedEntry,
        new: OwnedEntry,
        meta: EventMeta,
    },
}

impl ChangeEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ChangeEvent::Created { .. } => EventKind::EntryCreated,
            ChangeEvent::Deleted { .. } => EventKind::EntryDeleted,
            ChangeEvent::Updated { .. } => EventKind::EntryUpdated,
        }
    }

    pub fn meta(&self) -> &EventMeta {
        match self {
            ChangeEvent::Created { meta, .. }
            | ChangeEvent::Deleted { meta, .. }
            | ChangeEvent::Updated { meta, .. } => meta,
        }
    }

    /// Builds the event for `kind` from its envelope. Owned entries are bound
    /// to `api`.
    pub(crate) fn decode(
        api: &Arc<Api>,
        kind: EventKind,
        envelope: EventEnvelope,
    ) -> Result<Self, SubscriptionError> {
        let meta = EventMeta {
            database_id: envelope.database_id.clone(),
            timestamp: envelope.timestamp,
        };

        match kind {
            EventKind::EntryCreated => {
                let payload: EntryPayload = envelope.payload()?;
                let entry = owned(api, payload.collection_name, payload.values)?;
                Ok(ChangeEvent::Created { entry, meta })
            }
            EventKind::EntryDeleted => {
                let payload: EntryPayload = envelope.payload()?;
                let entry = ObservedEntry::new(payload.collection_name, payload.values);
                Ok(ChangeEvent::Deleted { entry, meta })
            }
            EventKind::EntryUpdated => {
                let payload: UpdatePayload = envelope.payload()?;
                let old = ObservedEntry::new(payload.collection_name.clone(), payload.old_values);
                let new = owned(api, payload.collection_name, payload.new_values)?;
                Ok(ChangeEvent::Updated { old, new, meta })
            }
        }
    }
}

fn owned(
    api: &Arc<Api>,
    collection_name: String,
    values: crate::models::Values,
) -> Result<OwnedEntry, SubscriptionError> {
    OwnedEntry::from_record(api.clone(), collection_name, values)
        .ok_or_else(|| SubscriptionError::Protocol("event record has no identifier".to_string()))
}

/// Ordered listener lists, one per event kind.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    listeners: RwLock<HashMap<EventKind, Vec<Listener>>>,
}

impl ListenerRegistry {
    pub(crate) fn add(&self, kind: EventKind, listener: Listener) {
        self.listeners.write().entry(kind).or_default().push(listener);
    }

    pub(crate) fn count(&self, kind: EventKind) -> usize {
        self.listeners.read().get(&kind).map_or(0, Vec::len)
    }

    /// Invokes every listener for the event's kind in registration order.
    ///
    /// A listener that errors or panics is logged and skipped; the rest still
    /// run. Returns the number of listeners that failed.
    pub(crate) fn dispatch(&self, event: &ChangeEvent) -> usize {
        let kind = event.kind();
        // Listeners run outside the lock so they may register more listeners.
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        let mut failures = 0;
        for (index, listener) in listeners.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    tracing::warn!("{} listener #{} failed: {}", kind, index, e);
                }
                Err(payload) => {
                    failures += 1;
                    tracing::warn!(
                        "{} listener #{} panicked: {}",
                        kind,
                        index,
                        panic_message(payload.as_ref())
                    );
                }
            }
        }
        failures
    }
}

/// Text of a panic payload, when it carries one.
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
