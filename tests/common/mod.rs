//! Common test utilities and mock transport infrastructure
//!
//! Provides a scripted in-memory transport so integration tests can play the
//! server side of the WebSocket protocol: accept connections, inspect the
//! frames the client writes and inject frames, failures and closes.

use async_trait::async_trait;
use hass_client::client::transport::next_transport_id;
use hass_client::{Connect, HassError, Result, Transport, TransportMessage};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use url::Url;

const WAIT: Duration = Duration::from_secs(2);

/// In-memory transport handed to the client under test
pub struct MockTransport {
    id: u64,
    sent: mpsc::UnboundedSender<String>,
    inbound: Mutex<mpsc::UnboundedReceiver<Result<TransportMessage>>>,
    closed: AtomicBool,
}

#[async_trait]
impl Transport for MockTransport {
    fn id(&self) -> u64 {
        self.id
    }

    async fn send_text(&self, text: String) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(HassError::connection("mock transport closed"));
        }
        self.sent
            .send(text)
            .map_err(|_| HassError::connection("mock peer gone"))
    }

    async fn next_message(&self) -> Option<Result<TransportMessage>> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        self.inbound.lock().await.recv().await
    }

    async fn cancel(&self, _reason: &str) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Server side of one accepted mock connection
pub struct MockConnection {
    /// URL the client dialed
    pub url: Url,
    pub transport_id: u64,
    frames: mpsc::UnboundedReceiver<String>,
    inject: mpsc::UnboundedSender<Result<TransportMessage>>,
}

impl MockConnection {
    /// Next frame written by the client, parsed as JSON
    pub async fn expect_frame(&mut self) -> Value {
        let text = timeout(WAIT, self.frames.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client side of the mock transport is gone");
        serde_json::from_str(&text).expect("client frames must be JSON")
    }

    /// Inject a JSON frame from the server
    pub fn send_json(&self, value: Value) {
        let _ = self
            .inject
            .send(Ok(TransportMessage::Text(value.to_string())));
    }

    /// Inject a binary frame from the server
    pub fn send_binary(&self, data: Vec<u8>) {
        let _ = self.inject.send(Ok(TransportMessage::Binary(data)));
    }

    /// Inject a transport failure; the stream ends after it
    pub fn fail(&self, message: &str) {
        let _ = self.inject.send(Err(HassError::connection(message)));
    }

    /// Drive the standard auth handshake and assert the client's token
    pub async fn handshake(&mut self, expected_token: &str, version: &str) {
        self.send_json(serde_json::json!({
            "type": "auth_required",
            "ha_version": version,
        }));
        let auth = self.expect_frame().await;
        assert_eq!(auth["type"], "auth", "first client frame must be auth");
        assert_eq!(auth["access_token"], expected_token);
        assert!(auth.get("id").is_none(), "auth frame must not carry an id");
        self.send_json(serde_json::json!({
            "type": "auth_ok",
            "ha_version": version,
        }));
    }
}

/// Test-side view of all connections the client opens
pub struct MockHub {
    connections: mpsc::UnboundedReceiver<MockConnection>,
}

impl MockHub {
    /// Wait for the client's next connection attempt
    pub async fn next_connection(&mut self) -> MockConnection {
        timeout(WAIT, self.connections.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("mock connector dropped")
    }

    /// Assert that no connection attempt happens within `window`
    pub async fn expect_no_connection(&mut self, window: Duration) {
        if timeout(window, self.connections.recv()).await.is_ok() {
            panic!("unexpected connection attempt");
        }
    }
}

/// Connector injected into the client under test
pub struct MockConnector {
    connections: mpsc::UnboundedSender<MockConnection>,
}

#[async_trait]
impl Connect for MockConnector {
    async fn open(&self, url: &Url) -> Result<Arc<dyn Transport>> {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (inject_tx, inject_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(MockTransport {
            id: next_transport_id(),
            sent: sent_tx,
            inbound: Mutex::new(inject_rx),
            closed: AtomicBool::new(false),
        });

        self.connections
            .send(MockConnection {
                url: url.clone(),
                transport_id: transport.id(),
                frames: sent_rx,
                inject: inject_tx,
            })
            .map_err(|_| HassError::connection("mock hub stopped"))?;

        Ok(transport)
    }
}

/// Create a connector/hub pair
pub fn mock_connector() -> (Arc<MockConnector>, MockHub) {
    let (connections_tx, connections_rx) = mpsc::unbounded_channel();
    (
        Arc::new(MockConnector {
            connections: connections_tx,
        }),
        MockHub {
            connections: connections_rx,
        },
    )
}
