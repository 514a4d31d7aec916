//! Real-time change notifications.
//!
//! One hub connection per client delivers three kinds of event:
//! - `entryCreated`: the new record, as an [`OwnedEntry`](crate::OwnedEntry)
//! - `entryDeleted`: the record's last values, as an [`ObservedEntry`](crate::ObservedEntry)
//! - `entryUpdated`: the previous values (observed) and the new ones (owned)
//!
//! Notifications are not ordered with respect to gateway or entry calls. An
//! `entryUpdated` for a record may arrive before or after the caller's own
//! update to it completes; nothing is reconciled.

mod error;
mod event;
mod manager;
mod protocol;

pub use error::SubscriptionError;
pub use event::{ChangeEvent, EventMeta, ListenerError, ListenerResult};
pub use manager::{ChannelState, SubscriptionManager};
pub use protocol::{EventKind, RECORD_SEPARATOR};
