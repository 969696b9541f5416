//! Access-token acquisition for the WebSocket handshake and REST calls
//!
//! Token storage and refresh are the host application's business; the client
//! only asks for a fresh token whenever it is about to authenticate.

use crate::error::Result;
use async_trait::async_trait;

/// Capability to produce an access token on demand
///
/// Called once per WebSocket authentication attempt and once per REST
/// request, so implementations can refresh expiring tokens transparently.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Return a currently valid access token
    async fn access_token(&self) -> Result<String>;
}

/// Token provider backed by a fixed long-lived access token
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    /// Create a provider that always returns the given token
    pub fn new<S: Into<String>>(token: S) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}
