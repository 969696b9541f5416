//! Client configuration and endpoint handling
//!
//! The [`Endpoint`] type normalizes whatever base URL the user pastes in
//! (with or without `/api`, `/api/websocket` or trailing slashes) and derives
//! the WebSocket URL, REST URLs and the `Host` header from the normalized
//! form. Two endpoints are considered equal exactly when their normalized
//! bases agree.

use crate::client::reconnect::ReconnectConfig;
use crate::error::{HassError, Result};
use std::time::Duration;
use url::Url;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server base URL (e.g. "https://hass.example:8123")
    pub url: String,

    /// Optional User-Agent for REST requests
    pub user_agent: Option<String>,

    /// Enable TLS certificate verification
    pub verify_tls: bool,

    /// Timeout applied to individual REST requests
    pub request_timeout: Duration,

    /// Reconnection behavior
    pub reconnect: ReconnectConfig,
}

impl ClientConfig {
    /// Create a configuration for the given server URL with defaults
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            user_agent: None,
            verify_tls: true,
            request_timeout: Duration::from_secs(30),
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Set the User-Agent header used on REST requests
    pub fn with_user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Disable TLS certificate verification (insecure, for test setups)
    pub fn with_tls_verification(mut self, verify: bool) -> Self {
        self.verify_tls = verify;
        self
    }

    /// Set the REST request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the reconnection policy
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }
}

/// Normalized server endpoint
///
/// Immutable value; replaced wholesale when the caller reconfigures the
/// client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    base: Url,
}

impl Endpoint {
    /// Parse and normalize a user-supplied base URL
    ///
    /// The host must be non-empty and the scheme one of `http`, `https`,
    /// `ws` or `wss`. Trailing `/api/websocket`, `/api` and `/` suffixes are
    /// stripped until a fixpoint is reached, so normalization is idempotent.
    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input).map_err(|e| match e {
            url::ParseError::EmptyHost => HassError::InvalidHostname,
            url::ParseError::InvalidPort => HassError::InvalidPort(input.to_string()),
            other => HassError::InvalidEndpoint(other.to_string()),
        })?;
        Self::from_url(url)
    }

    /// Normalize an already-parsed base URL
    pub fn from_url(mut url: Url) -> Result<Self> {
        match url.host_str() {
            Some(host) if !host.is_empty() => {}
            _ => return Err(HassError::InvalidHostname),
        }
        if !matches!(url.scheme(), "http" | "https" | "ws" | "wss") {
            return Err(HassError::InvalidEndpoint(format!(
                "unsupported scheme: {}",
                url.scheme()
            )));
        }

        let normalized = normalize_path(url.path());
        url.set_path(&normalized);
        url.set_query(None);
        url.set_fragment(None);
        Ok(Self { base: url })
    }

    /// The normalized base URL
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Derive the WebSocket URL for this endpoint
    ///
    /// Scheme is mapped `http` → `ws` and `https` → `wss`; the path always
    /// ends in `/api/websocket`.
    pub fn websocket_url(&self) -> Url {
        let mut url = self.base.clone();
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            "wss" => "wss",
            _ => "ws",
        };
        // http(s) and ws(s) are all "special" schemes, so this cannot fail.
        let _ = url.set_scheme(scheme);

        let path = self.base.path().trim_end_matches('/');
        url.set_path(&format!("{path}/api/websocket"));
        url
    }

    /// Build a REST URL by appending `path` (caller includes `api/`) and
    /// query items to the normalized base
    pub fn rest_url(&self, path: &str, query: &[(String, String)]) -> Result<Url> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| HassError::InvalidEndpoint("URL cannot carry a path".into()))?;
            segments.pop_if_empty();
            for segment in path.split('/').filter(|s| !s.is_empty()) {
                segments.push(segment);
            }
        }
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// The value of the `Host` header for REST requests
    ///
    /// The port is appended only when it is explicit and not 80/443.
    pub fn host_header(&self) -> String {
        let host = self.base.host_str().unwrap_or_default();
        match self.base.port() {
            Some(port) if port != 80 && port != 443 => format!("{host}:{port}"),
            _ => host.to_string(),
        }
    }

    /// Whether a connection to `existing_ws_url` must be torn down to honor
    /// this endpoint
    pub fn should_replace(&self, existing_ws_url: &Url) -> bool {
        self.websocket_url() != *existing_ws_url
    }
}

/// Strip trailing `/api/websocket`, `/api` and `/` suffixes until the path
/// stops changing.
fn normalize_path(path: &str) -> String {
    let mut current = path.to_string();
    loop {
        let mut next = current.trim_end_matches('/').to_string();
        if let Some(stripped) = next.strip_suffix("/api/websocket") {
            next = stripped.to_string();
        }
        next = next.trim_end_matches('/').to_string();
        if let Some(stripped) = next.strip_suffix("/api") {
            next = stripped.to_string();
        }
        next = next.trim_end_matches('/').to_string();
        if next == current {
            return next;
        }
        current = next;
    }
}
