//! Request/response plumbing for the backend REST API.
//!
//! Every request carries the raw credential in the `authorization` header and
//! every response body is a JSON envelope:
//!
//! ```text
//! { "success": bool, "data": <any>, "message": <string> }
//! ```
//!
//! A 401 status is reported as [`Failure::Unauthorized`] before the body is
//! looked at. Anything else succeeds only when the status is 2xx and
//! `success` is `true`.

use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::{ClientConfig, Credential};
use crate::error::Error;
use crate::models::{EntryId, Values, ID_FIELD};

/// Query flag the backend uses to serve reads over PATCH (reads carry a body).
const READ_OVERRIDE: (&str, &str) = ("methodOverwrite", "GET");

/// Underlying cause of a failed request.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Backend rejected the request (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Malformed response: {0}")]
    Decode(String),
}

/// Outcome of a failed call before it is mapped to an operation's error.
#[derive(Debug)]
pub(crate) enum Failure {
    Unauthorized,
    Request(RequestError),
}

impl Failure {
    /// Maps the failure to an operation's error, keeping 401 as `Unauthorized`.
    pub(crate) fn classify(self, otherwise: impl FnOnce(RequestError) -> Error) -> Error {
        match self {
            Failure::Unauthorized => Error::Unauthorized,
            Failure::Request(e) => otherwise(e),
        }
    }
}

impl From<RequestError> for Failure {
    fn from(e: RequestError) -> Self {
        Failure::Request(e)
    }
}

impl From<reqwest::Error> for Failure {
    fn from(e: reqwest::Error) -> Self {
        Failure::Request(RequestError::Transport(e))
    }
}

/// Response envelope returned by every endpoint.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Envelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub message: Option<String>,
}

impl Envelope {
    /// Records returned by a read.
    pub(crate) fn into_records(self) -> Result<Vec<Values>, RequestError> {
        match self.data {
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(values) => Ok(values),
                    other => Err(RequestError::Decode(format!(
                        "expected a record object, got {}",
                        other
                    ))),
                })
                .collect(),
            Value::Null => Ok(Vec::new()),
            other => Err(RequestError::Decode(format!(
                "expected an array of records, got {}",
                other
            ))),
        }
    }

    /// Identifier assigned by the backend on create.
    pub(crate) fn inserted_id(&self) -> Result<EntryId, RequestError> {
        self.data
            .get("insertedId")
            .and_then(EntryId::from_json)
            .ok_or_else(|| RequestError::Decode("response is missing insertedId".to_string()))
    }

    /// A counter such as `deletedCount` or `modifiedCount`.
    pub(crate) fn count(&self, field: &str) -> Result<u64, RequestError> {
        self.data
            .get(field)
            .and_then(Value::as_u64)
            .ok_or_else(|| RequestError::Decode(format!("response is missing {}", field)))
    }

    /// Number of records an update matched, falling back to the modified count.
    pub(crate) fn matched_count(&self) -> Result<u64, RequestError> {
        match self.data.get("matchedCount").and_then(Value::as_u64) {
            Some(n) => Ok(n),
            None => self.count("modifiedCount"),
        }
    }
}

/// Shared HTTP access to the backend.
///
/// One instance is shared by the client, its collections and every owned
/// entry, so they all reuse the same connection pool and credential.
#[derive(Debug)]
pub(crate) struct Api {
    http: reqwest::Client,
    base_url: String,
    credential: Credential,
    config: ClientConfig,
}

impl Api {
    pub(crate) fn new(config: ClientConfig, credential: Credential) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.http_base(),
            credential,
            config,
        }
    }

    pub(crate) fn credential(&self) -> &Credential {
        &self.credential
    }

    pub(crate) fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn collection_url(&self, name: &str) -> String {
        format!("{}/v0/collection/{}", self.base_url, urlencoding::encode(name))
    }

    fn entries_url(&self, name: &str) -> String {
        format!("{}/v1/entries/{}", self.base_url, urlencoding::encode(name))
    }

    /// Sends one request and classifies the response.
    async fn send(
        &self,
        method: Method,
        url: String,
        query: Option<(&str, &str)>,
        body: Option<Value>,
    ) -> Result<Envelope, Failure> {
        tracing::debug!("{} {}", method, url);

        let mut request = self
            .http
            .request(method, &url)
            .header(reqwest::header::AUTHORIZATION, self.credential.as_str());
        if let Some(pair) = query {
            request = request.query(&[pair]);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }
        if let Some(timeout) = self.config.request_timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            tracing::debug!("{} answered 401", url);
            return Err(Failure::Unauthorized);
        }

        let bytes = response.bytes().await?;
        let envelope: Envelope = serde_json::from_slice(&bytes)
            .map_err(|e| RequestError::Decode(e.to_string()))?;

        if !status.is_success() || !envelope.success {
            let message = envelope
                .message
                .or_else(|| status.canonical_reason().map(str::to_string))
                .unwrap_or_else(|| "request failed".to_string());
            tracing::debug!("{} failed with status {}: {}", url, status, message);
            return Err(Failure::Request(RequestError::Rejected {
                status: status.as_u16(),
                message,
            }));
        }

        Ok(envelope)
    }

    // ------------------------------------------------------------------
    // Collection lifecycle (v0)
    // ------------------------------------------------------------------

    pub(crate) async fn probe_collection(&self, name: &str) -> Result<Envelope, Failure> {
        self.send(Method::GET, self.collection_url(name), None, None)
            .await
    }

    pub(crate) async fn create_collection(&self, name: &str) -> Result<Envelope, Failure> {
        self.send(Method::POST, self.collection_url(name), None, None)
            .await
    }

    pub(crate) async fn rename_collection(
        &self,
        name: &str,
        new_name: &str,
    ) -> Result<Envelope, Failure> {
        let body = json!({ "collectionName": new_name });
        self.send(Method::PUT, self.collection_url(name), None, Some(body))
            .await
    }

    pub(crate) async fn drop_collection(&self, name: &str) -> Result<Envelope, Failure> {
        self.send(Method::DELETE, self.collection_url(name), None, None)
            .await
    }

    // ------------------------------------------------------------------
    // Entry CRUD (v1)
    // ------------------------------------------------------------------

    pub(crate) async fn insert(&self, collection: &str, data: &Values) -> Result<Envelope, Failure> {
        let body = json!({ "data": data });
        self.send(Method::POST, self.entries_url(collection), None, Some(body))
            .await
    }

    pub(crate) async fn find(&self, collection: &str, filters: &Values) -> Result<Envelope, Failure> {
        let body = json!({ "filters": filters });
        self.send(
            Method::PATCH,
            self.entries_url(collection),
            Some(READ_OVERRIDE),
            Some(body),
        )
        .await
    }

    pub(crate) async fn update(
        &self,
        collection: &str,
        filters: &Values,
        data: &Values,
    ) -> Result<Envelope, Failure> {
        let body = json!({ "filters": filters, "data": data });
        self.send(Method::PUT, self.entries_url(collection), None, Some(body))
            .await
    }

    pub(crate) async fn delete(&self, collection: &str, filters: &Values) -> Result<Envelope, Failure> {
        let body = json!({ "filters": filters });
        self.send(Method::DELETE, self.entries_url(collection), None, Some(body))
            .await
    }
}

/// Filter matching exactly one identifier.
pub(crate) fn id_filter(id: &EntryId) -> Values {
    let mut filters = Values::new();
    filters.insert(ID_FIELD.to_string(), id.to_json());
    filters
}
