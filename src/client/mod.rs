//! Client implementations for WebSocket session and REST communication

pub mod auth;
pub(crate) mod commands;
pub(crate) mod http_client;
pub mod protocol;
pub mod reconnect;
pub mod responses;
pub mod transport;
pub mod websocket_client;

pub use auth::{StaticTokenProvider, TokenProvider};
pub use protocol::HassRequest;
pub use reconnect::ReconnectConfig;
pub use responses::Phase;
pub use transport::{Connect, Transport, TransportMessage};
pub use websocket_client::{CommandHandle, ConnectionStats, HassClient, SubscriptionHandle};
