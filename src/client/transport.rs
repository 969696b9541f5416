//! WebSocket transport abstraction
//!
//! The session logic only ever sees the [`Transport`] trait: a text-frame
//! sink plus a finite inbound message sequence. The production
//! implementation wraps tokio-tungstenite; tests substitute a scripted
//! in-memory transport. Every instance carries a process-unique id so the
//! orchestrator can discard callbacks from a transport it has already
//! replaced.

use crate::error::{HassError, Result};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{
    connect_async, connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique transport id
pub fn next_transport_id() -> u64 {
    NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Inbound transport payload
#[derive(Debug, Clone)]
pub enum TransportMessage {
    /// UTF-8 text frame carrying protocol JSON
    Text(String),
    /// Binary frame; not part of this protocol, logged and discarded upstream
    Binary(Vec<u8>),
}

/// Bidirectional message channel to the server
#[async_trait]
pub trait Transport: Send + Sync {
    /// Stable per-instance id
    fn id(&self) -> u64;

    /// Send one text frame
    async fn send_text(&self, text: String) -> Result<()>;

    /// Receive the next inbound message
    ///
    /// `None` means the stream has terminated (graceful close or after a
    /// previously returned error).
    async fn next_message(&self) -> Option<Result<TransportMessage>>;

    /// Close the transport; subsequent reads terminate
    async fn cancel(&self, reason: &str);
}

impl std::fmt::Debug for dyn Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Transport({})", self.id())
    }
}

/// Capability to open a [`Transport`] to a WebSocket URL
#[async_trait]
pub trait Connect: Send + Sync {
    /// Open a new transport
    async fn open(&self, url: &Url) -> Result<Arc<dyn Transport>>;
}

/// Production transport over tokio-tungstenite
pub struct WsTransport {
    id: u64,
    sender: Mutex<SplitSink<WsStream, Message>>,
    receiver: Mutex<SplitStream<WsStream>>,
    closed: AtomicBool,
}

impl WsTransport {
    /// Open a WebSocket connection to `url`
    pub async fn connect(url: &Url, verify_tls: bool) -> Result<Self> {
        let (stream, response) = if verify_tls {
            connect_async(url.as_str()).await?
        } else {
            warn!("TLS verification disabled for WebSocket connection");
            let tls = native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .build()
                .map_err(|e| HassError::connection(format!("TLS setup failed: {e}")))?;
            connect_async_tls_with_config(url.as_str(), None, false, Some(Connector::NativeTls(tls)))
                .await?
        };
        debug!(status = %response.status(), %url, "WebSocket handshake complete");

        let (sender, receiver) = stream.split();
        Ok(Self {
            id: next_transport_id(),
            sender: Mutex::new(sender),
            receiver: Mutex::new(receiver),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn id(&self) -> u64 {
        self.id
    }

    async fn send_text(&self, text: String) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(HassError::connection("transport is closed"));
        }
        self.sender
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .map_err(Into::into)
    }

    async fn next_message(&self) -> Option<Result<TransportMessage>> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            let item = self.receiver.lock().await.next().await;
            match item {
                Some(Ok(Message::Text(text))) => return Some(Ok(TransportMessage::Text(text))),
                Some(Ok(Message::Binary(data))) => {
                    return Some(Ok(TransportMessage::Binary(data)))
                }
                // Pongs are answered by tungstenite internally.
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Frame(_))) => continue,
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "WebSocket closed by server");
                    self.closed.store(true, Ordering::Release);
                    return None;
                }
                Some(Err(e)) => {
                    self.closed.store(true, Ordering::Release);
                    return Some(Err(e.into()));
                }
                None => {
                    self.closed.store(true, Ordering::Release);
                    return None;
                }
            }
        }
    }

    async fn cancel(&self, reason: &str) {
        debug!(reason, id = self.id, "cancelling WebSocket transport");
        self.closed.store(true, Ordering::Release);
        let _ = self.sender.lock().await.send(Message::Close(None)).await;
    }
}

/// Default connector opening [`WsTransport`] instances
pub struct WsConnector {
    verify_tls: bool,
}

impl WsConnector {
    /// Create a connector; `verify_tls = false` accepts invalid certificates
    pub fn new(verify_tls: bool) -> Self {
        Self { verify_tls }
    }
}

#[async_trait]
impl Connect for WsConnector {
    async fn open(&self, url: &Url) -> Result<Arc<dyn Transport>> {
        Ok(Arc::new(WsTransport::connect(url, self.verify_tls).await?))
    }
}
