//! Error types for collection and entry operations.

use thiserror::Error;

use crate::api::RequestError;

/// Errors returned by the client, its collections and its entries.
///
/// `Unauthorized` always wins: a 401 response is reported as such before any
/// other classification of the call is attempted.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Unauthorized: the credential was rejected by the backend")]
    Unauthorized,

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Collection already exists: {0}")]
    CollectionAlreadyExists(String),

    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    /// An entry mutation or deletion failed. The local mirror was not touched.
    #[error("Entry update failed: {0}")]
    EntryUpdateFailed(#[source] RequestError),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
