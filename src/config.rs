//! Client configuration.
//!
//! A client is configured from explicit values or from the environment:
//! - `DOCBASE_API_URL`: Base URL of the REST API (default: https://api.docbase.io)
//! - `DOCBASE_HUB_URL`: Real-time hub endpoint (default: wss://hub.docbase.io/events)
//! - `DOCBASE_HANDSHAKE_TIMEOUT_SECS`: Seconds to wait for the hub handshake (default: 10)

use std::fmt;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.docbase.io";
pub const DEFAULT_HUB_URL: &str = "wss://hub.docbase.io/events";

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Opaque bearer token threaded into every request and the hub connection.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, exactly as supplied.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

impl From<String> for Credential {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for Credential {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

/// Endpoints and timeouts used by a [`Client`](crate::Client).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST API base URL
    pub api_url: String,
    /// Real-time hub endpoint
    pub hub_url: String,
    /// How long to wait for the hub connection, WebSocket upgrade and
    /// protocol handshake together
    pub handshake_timeout: Duration,
    /// Interval between client pings on the hub connection; zero disables them
    pub keepalive_interval: Duration,
    /// Per-request timeout; `None` leaves the transport default in place
    pub request_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            hub_url: DEFAULT_HUB_URL.to_string(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            request_timeout: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let api_url = std::env::var("DOCBASE_API_URL").unwrap_or(defaults.api_url);
        let hub_url = std::env::var("DOCBASE_HUB_URL").unwrap_or(defaults.hub_url);
        let handshake_timeout = std::env::var("DOCBASE_HANDSHAKE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.handshake_timeout);

        Self {
            api_url,
            hub_url,
            handshake_timeout,
            ..defaults
        }
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_hub_url(mut self, url: impl Into<String>) -> Self {
        self.hub_url = url.into();
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// REST base URL with an http(s) scheme and no trailing slash.
    pub(crate) fn http_base(&self) -> String {
        let url = &self.api_url;
        let base = if let Some(rest) = url.strip_prefix("ws://") {
            format!("http://{}", rest)
        } else if let Some(rest) = url.strip_prefix("wss://") {
            format!("https://{}", rest)
        } else if !url.starts_with("http://") && !url.starts_with("https://") {
            format!("http://{}", url)
        } else {
            url.clone()
        };

        base.trim_end_matches('/').to_string()
    }

    /// Hub URL with a ws(s) scheme and the credential as bearer query parameter.
    pub(crate) fn hub_connect_url(&self, credential: &Credential) -> String {
        let url = &self.hub_url;
        let base = if let Some(rest) = url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else if let Some(rest) = url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if !url.starts_with("ws://") && !url.starts_with("wss://") {
            format!("ws://{}", url)
        } else {
            url.clone()
        };

        let separator = if base.contains('?') { '&' } else { '?' };
        format!(
            "{}{}access_token={}",
            base.trim_end_matches('/'),
            separator,
            urlencoding::encode(credential.as_str())
        )
    }
}
