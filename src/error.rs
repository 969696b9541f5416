//! Error types for the Home Assistant client
//!
//! This module provides the error taxonomy shared by the WebSocket session,
//! the REST path and the configuration layer, together with helper
//! constructors and classification predicates used for retry decisions.

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, HassError>;

/// Error types for Home Assistant client operations
#[derive(Error, Debug)]
pub enum HassError {
    /// Endpoint URL has no usable host
    #[error("invalid hostname: endpoint URL must include a host")]
    InvalidHostname,

    /// Endpoint URL carries an out-of-range or malformed port
    #[error("invalid port: {0}")]
    InvalidPort(String),

    /// Endpoint URL is malformed in some other way
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Connection errors
    #[error("connection error: {0}")]
    Connection(String),

    /// WebSocket transport errors
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Malformed or unexpected protocol data
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server rejected the provided credentials
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The token provider could not produce an access token
    #[error("auth token unavailable: {0}")]
    TokenUnavailable(String),

    /// Server-reported command or REST failure
    #[error("server error {code}: {message}")]
    External { code: String, message: String },

    /// HTTP client errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing errors
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Operation aborted by the caller or by a permanent disconnect
    #[error("operation cancelled")]
    Cancelled,

    /// Generic errors
    #[error("generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl HassError {
    /// Create a connection error
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a protocol error
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create an authentication failure
    pub fn auth_failed<S: Into<String>>(msg: S) -> Self {
        Self::AuthFailed(msg.into())
    }

    /// Create a token-unavailable error
    pub fn token_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::TokenUnavailable(msg.into())
    }

    /// Create a server-reported error
    pub fn external<C: Into<String>, M: Into<String>>(code: C, message: M) -> Self {
        Self::External {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Stable error kind, used for logging and for structural comparison of
    /// phases that carry an error
    pub fn kind(&self) -> &'static str {
        match self {
            HassError::InvalidHostname => "invalid_hostname",
            HassError::InvalidPort(_) => "invalid_port",
            HassError::InvalidEndpoint(_) => "invalid_endpoint",
            HassError::Connection(_) => "connection_error",
            HassError::WebSocket(_) => "websocket_error",
            HassError::Protocol(_) => "protocol_error",
            HassError::AuthFailed(_) => "auth_failed",
            HassError::TokenUnavailable(_) => "token_unavailable",
            HassError::External { .. } => "external_error",
            HassError::Http(_) => "http_error",
            HassError::Json(_) => "json_error",
            HassError::Cancelled => "cancelled",
            HassError::Generic(_) => "generic_error",
        }
    }

    /// Check if the error is transient and worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HassError::Connection(_)
                | HassError::WebSocket(_)
                | HassError::TokenUnavailable(_)
                | HassError::Http(_)
        )
    }

    /// Check if the error indicates an authentication problem
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            HassError::AuthFailed(_) | HassError::TokenUnavailable(_)
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for HassError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        HassError::WebSocket(err.to_string())
    }
}
