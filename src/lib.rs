//! Docbase client library.
//!
//! Collections of schema-less entries over HTTP, plus a real-time channel
//! for change notifications.
//!
//! ```no_run
//! use docbase::{Client, ClientConfig, EntryView};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::with_config("my-token", ClientConfig::from_env());
//! client.on_entry_created(|entry, meta| {
//!     println!("{} created in {} at {}", entry.id(), entry.collection_name(), meta.timestamp);
//!     Ok(())
//! });
//!
//! let users = client.create_collection("users").await?;
//! let mut entry = users.create_entry(json!({ "name": "x" }).as_object().cloned().unwrap_or_default()).await?;
//! entry.update_value("name", json!("y")).await?;
//! # Ok(())
//! # }
//! ```

mod api;
pub mod client;
pub mod collection;
pub mod config;
pub mod error;
pub mod models;
pub mod realtime;

pub use api::RequestError;
pub use client::Client;
pub use collection::Collection;
pub use config::{ClientConfig, Credential};
pub use error::{Error, Result};
pub use models::{EntryId, EntryView, ObservedEntry, OwnedEntry, Values, ID_FIELD};
pub use realtime::{
    ChangeEvent, ChannelState, EventKind, EventMeta, ListenerError, ListenerResult,
    SubscriptionError, SubscriptionManager, RECORD_SEPARATOR,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
