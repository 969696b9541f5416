//! Async client for Home Assistant home automation servers
//!
//! This crate maintains a long-lived, authenticated, bidirectional
//! JSON-over-WebSocket session with a Home Assistant server and shares its
//! authentication with one-off REST calls.
//!
//! # Features
//!
//! - Automatic reconnection with exponential backoff and jitter
//! - Bearer-token authentication via a pluggable [`TokenProvider`](client::TokenProvider)
//! - Correlated request/response commands and long-lived event subscriptions
//! - Subscription replay across reconnects, transparent to the caller
//! - REST calls against the same base URL and credentials
//! - Observable connection phase stream and connection statistics
//!
//! # Example
//!
//! ```no_run
//! use hass_client::{ClientConfig, HassClient, StaticTokenProvider};
//! use std::sync::Arc;
//!
//! # async fn run() -> hass_client::Result<()> {
//! let config = ClientConfig::new("https://hass.example:8123");
//! let tokens = Arc::new(StaticTokenProvider::new("long-lived-token"));
//! let client = HassClient::new(config, tokens)?;
//!
//! client.connect();
//! let states = client.get_states().await?;
//! println!("{} entities", states.as_array().map(|a| a.len()).unwrap_or(0));
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;

pub use client::{
    CommandHandle, Connect, ConnectionStats, HassClient, HassRequest, Phase, ReconnectConfig,
    StaticTokenProvider, SubscriptionHandle, TokenProvider, Transport, TransportMessage,
};
pub use config::{ClientConfig, Endpoint};
pub use error::{HassError, Result};
