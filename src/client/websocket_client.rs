//! WebSocket client orchestrator
//!
//! [`HassClient`] ties the transport, the response router, the command
//! tracker and the reconnect manager together behind a small public surface.
//! All session state is owned by a single event-loop task; facade methods
//! and background tasks (transport reader, token fetch, REST execution,
//! reconnect timer) communicate with it exclusively through an op channel,
//! so phase transitions and map mutations are serialized without locks and
//! user callbacks never run inside the session internals.

use crate::client::auth::TokenProvider;
use crate::client::commands::{
    ActiveSubscription, CommandResolver, CommandTracker, PendingCommand, QueuedItem,
};
use crate::client::http_client::{RestClient, RestSpec};
use crate::client::protocol::{self, HassRequest};
use crate::client::reconnect::ReconnectManager;
use crate::client::responses::{HttpReply, Phase, ResponseRouter, Routed};
use crate::client::transport::{Connect, Transport, TransportMessage, WsConnector};
use crate::config::{ClientConfig, Endpoint};
use crate::error::{HassError, Result};
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Connection statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionStats {
    /// Total WebSocket messages received
    pub messages_received: u64,

    /// Total command frames written
    pub commands_sent: u64,

    /// Events delivered to subscribers
    pub events_delivered: u64,

    /// Reconnection attempts scheduled
    pub reconnect_attempts: u32,

    /// When the current command phase was entered
    pub connected_since: Option<DateTime<Utc>>,

    /// Last message received timestamp
    pub last_message: Option<DateTime<Utc>>,
}

/// Handle to a submitted single-shot command
#[derive(Debug)]
pub struct CommandHandle {
    rx: oneshot::Receiver<Result<Value>>,
}

impl CommandHandle {
    /// Await the command's single terminal outcome
    pub async fn result(self) -> Result<Value> {
        self.rx.await.map_err(|_| HassError::Cancelled)?
    }
}

/// Handle to a live subscription
///
/// Dropping the handle cancels the subscription.
#[derive(Debug)]
pub struct SubscriptionHandle {
    key: u64,
    events: mpsc::UnboundedReceiver<Value>,
    completion: Option<oneshot::Receiver<Result<Value>>>,
    cancelled: Arc<AtomicBool>,
    op_tx: mpsc::UnboundedSender<ClientOp>,
}

impl SubscriptionHandle {
    /// Receive the next event; `None` after cancellation or termination
    pub async fn next_event(&mut self) -> Option<Value> {
        if self.cancelled.load(Ordering::Acquire) {
            return None;
        }
        self.events.recv().await
    }

    /// Cancel the subscription
    ///
    /// Event delivery stops immediately; the unsubscribe frame is sent on a
    /// best-effort basis when the session is in the command phase.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        let _ = self.op_tx.send(ClientOp::Cancel { key: self.key });
    }

    /// Await the subscription's terminal outcome
    pub async fn completion(mut self) -> Result<Value> {
        match self.completion.take() {
            Some(rx) => rx.await.map_err(|_| HassError::Cancelled)?,
            None => Err(HassError::Cancelled),
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if !self.cancelled.load(Ordering::Acquire) {
            self.cancelled.store(true, Ordering::Release);
            let _ = self.op_tx.send(ClientOp::Cancel { key: self.key });
        }
    }
}

/// Operations processed by the event loop
#[derive(Debug)]
pub(crate) enum ClientOp {
    Connect,
    Disconnect {
        permanent: bool,
    },
    Reconfigure {
        endpoint: Endpoint,
    },
    Submit {
        request: HassRequest,
        resolver: CommandResolver,
    },
    Subscribe {
        subscription: ActiveSubscription,
    },
    Cancel {
        key: u64,
    },
    Rest {
        spec: RestSpec,
        resolver: CommandResolver,
    },
    Opened {
        generation: u64,
        result: Result<Arc<dyn Transport>>,
    },
    Inbound {
        transport_id: u64,
        message: Option<Result<TransportMessage>>,
    },
    TokenFetched {
        transport_id: u64,
        result: Result<String>,
    },
    HttpDone {
        id: u64,
        reply: Result<HttpReply>,
    },
    RetryTick {
        generation: u64,
    },
    Shutdown,
}

/// Client for the Home Assistant WebSocket and REST APIs
///
/// Cheap to clone; all clones share one session.
#[derive(Clone)]
pub struct HassClient {
    shared: Arc<ClientShared>,
}

struct ClientShared {
    op_tx: mpsc::UnboundedSender<ClientOp>,
    phase_tx: broadcast::Sender<Phase>,
    phase_cell: Arc<RwLock<Phase>>,
    stats: Arc<RwLock<ConnectionStats>>,
    next_subscription_key: AtomicU64,
}

impl Drop for ClientShared {
    fn drop(&mut self) {
        let _ = self.op_tx.send(ClientOp::Shutdown);
    }
}

impl HassClient {
    /// Create a client using the built-in tokio-tungstenite transport
    pub fn new(config: ClientConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        let connector = Arc::new(WsConnector::new(config.verify_tls));
        Self::with_connector(config, tokens, connector)
    }

    /// Create a client over a custom transport stack
    pub fn with_connector(
        config: ClientConfig,
        tokens: Arc<dyn TokenProvider>,
        connector: Arc<dyn Connect>,
    ) -> Result<Self> {
        let endpoint = Endpoint::parse(&config.url)?;
        let rest = RestClient::new(&config)?;

        let (op_tx, op_rx) = mpsc::unbounded_channel();
        let (phase_tx, _) = broadcast::channel(64);
        let phase_cell = Arc::new(RwLock::new(Phase::Disconnected {
            error: None,
            for_reset: true,
        }));
        let stats = Arc::new(RwLock::new(ConnectionStats::default()));

        let event_loop = EventLoop {
            endpoint,
            connector,
            tokens,
            rest,
            tracker: CommandTracker::new(),
            router: ResponseRouter::new(),
            reconnect: ReconnectManager::new(config.reconnect),
            transport: None,
            reader: None,
            connecting: false,
            retry_scheduled: false,
            generation: 0,
            phase_tx: phase_tx.clone(),
            phase_cell: phase_cell.clone(),
            stats: stats.clone(),
            op_tx: op_tx.clone(),
        };
        tokio::spawn(event_loop.run(op_rx));

        Ok(Self {
            shared: Arc::new(ClientShared {
                op_tx,
                phase_tx,
                phase_cell,
                stats,
                next_subscription_key: AtomicU64::new(1),
            }),
        })
    }

    fn send_op(&self, op: ClientOp) {
        let _ = self.shared.op_tx.send(op);
    }

    /// Open the session; idempotent, lifts any reconnect suppression
    pub fn connect(&self) {
        self.send_op(ClientOp::Connect);
    }

    /// Close the session
    ///
    /// `permanent = true` cancels all pending work and suppresses automatic
    /// reconnection until [`connect`](Self::connect) is called again;
    /// `permanent = false` keeps retryable work and schedules a reconnect.
    pub fn disconnect(&self, permanent: bool) {
        self.send_op(ClientOp::Disconnect { permanent });
    }

    /// Point the client at a different server
    ///
    /// The live connection is replaced only when the new endpoint actually
    /// derives a different WebSocket URL. The REST client (timeout, user
    /// agent, TLS settings) is not rebuilt.
    pub fn reconfigure(&self, config: &ClientConfig) -> Result<()> {
        let endpoint = Endpoint::parse(&config.url)?;
        self.send_op(ClientOp::Reconfigure { endpoint });
        Ok(())
    }

    /// Submit a single-shot command, returning a handle for its result
    pub fn submit(&self, request: HassRequest) -> CommandHandle {
        let (resolver, rx) = CommandResolver::channel();
        self.send_op(ClientOp::Submit { request, resolver });
        CommandHandle { rx }
    }

    /// Submit a single-shot command and await its result
    pub async fn send_command(&self, request: HassRequest) -> Result<Value> {
        self.submit(request).result().await
    }

    /// Open a subscription for the given request
    pub fn subscribe(&self, request: HassRequest) -> SubscriptionHandle {
        let key = self
            .shared
            .next_subscription_key
            .fetch_add(1, Ordering::Relaxed);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (completion, completion_rx) = CommandResolver::channel();
        let cancelled = Arc::new(AtomicBool::new(false));

        self.send_op(ClientOp::Subscribe {
            subscription: ActiveSubscription {
                key,
                request,
                events: events_tx,
                completion,
                cancelled: cancelled.clone(),
            },
        });

        SubscriptionHandle {
            key,
            events: events_rx,
            completion: Some(completion_rx),
            cancelled,
            op_tx: self.shared.op_tx.clone(),
        }
    }

    /// Issue a one-off REST call sharing the session's authentication
    ///
    /// `path` is relative to the normalized base URL and includes `api/`.
    pub async fn rest_call(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<Value>,
    ) -> Result<Value> {
        let (resolver, rx) = CommandResolver::channel();
        self.send_op(ClientOp::Rest {
            spec: RestSpec {
                method,
                path: path.to_string(),
                query: query.to_vec(),
                body,
            },
            resolver,
        });
        rx.await.map_err(|_| HassError::Cancelled)?
    }

    /// Observe phase transitions
    pub fn state_stream(&self) -> broadcast::Receiver<Phase> {
        self.shared.phase_tx.subscribe()
    }

    /// Current phase snapshot
    pub fn phase(&self) -> Phase {
        self.shared
            .phase_cell
            .read()
            .expect("phase lock poisoned")
            .clone()
    }

    /// Connection statistics snapshot
    pub fn stats(&self) -> ConnectionStats {
        self.shared
            .stats
            .read()
            .expect("stats lock poisoned")
            .clone()
    }

    /// Fetch all entity states
    pub async fn get_states(&self) -> Result<Value> {
        self.send_command(HassRequest::new("get_states")).await
    }

    /// Fetch the server configuration
    pub async fn get_config(&self) -> Result<Value> {
        self.send_command(HassRequest::new("get_config")).await
    }

    /// Fetch the service registry
    pub async fn get_services(&self) -> Result<Value> {
        self.send_command(HassRequest::new("get_services")).await
    }

    /// Round-trip liveness probe
    pub async fn ping(&self) -> Result<Value> {
        self.send_command(HassRequest::new("ping")).await
    }

    /// Call a service, e.g. `light.turn_on`
    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        service_data: Option<Value>,
        target: Option<Value>,
    ) -> Result<Value> {
        let mut request = HassRequest::new("call_service")
            .retryable()
            .with_field("domain", domain)
            .with_field("service", service);
        if let Some(data) = service_data {
            request = request.with_field("service_data", data);
        }
        if let Some(target) = target {
            request = request.with_field("target", target);
        }
        self.send_command(request).await
    }

    /// Subscribe to event bus events, optionally filtered by type
    pub fn subscribe_events(&self, event_type: Option<&str>) -> SubscriptionHandle {
        let mut request = HassRequest::new("subscribe_events").retryable();
        if let Some(event_type) = event_type {
            request = request.with_field("event_type", event_type);
        }
        self.subscribe(request)
    }

    /// Subscribe to a trigger definition
    pub fn subscribe_trigger(&self, trigger: Value) -> SubscriptionHandle {
        self.subscribe(
            HassRequest::new("subscribe_trigger")
                .retryable()
                .with_field("trigger", trigger),
        )
    }
}

/// Session state machine; owned by one task, fed by the op channel
struct EventLoop {
    endpoint: Endpoint,
    connector: Arc<dyn Connect>,
    tokens: Arc<dyn TokenProvider>,
    rest: RestClient,
    tracker: CommandTracker,
    router: ResponseRouter,
    reconnect: ReconnectManager,
    transport: Option<Arc<dyn Transport>>,
    reader: Option<JoinHandle<()>>,
    connecting: bool,
    retry_scheduled: bool,
    /// Bumped on every connect/teardown to invalidate stale callbacks
    generation: u64,
    phase_tx: broadcast::Sender<Phase>,
    phase_cell: Arc<RwLock<Phase>>,
    stats: Arc<RwLock<ConnectionStats>>,
    op_tx: mpsc::UnboundedSender<ClientOp>,
}

impl EventLoop {
    async fn run(mut self, mut op_rx: mpsc::UnboundedReceiver<ClientOp>) {
        while let Some(op) = op_rx.recv().await {
            if matches!(op, ClientOp::Shutdown) {
                break;
            }
            self.handle(op).await;
        }
        debug!("client event loop stopped");
        self.teardown_transport();
        self.tracker.cancel_all();
        if let Some(Routed::Phase(phase)) = self.router.reset() {
            self.emit_phase(phase);
        }
    }

    async fn handle(&mut self, op: ClientOp) {
        match op {
            ClientOp::Connect => self.handle_connect(),
            ClientOp::Disconnect { permanent } => self.handle_disconnect(permanent).await,
            ClientOp::Reconfigure { endpoint } => self.handle_reconfigure(endpoint).await,
            ClientOp::Submit { request, resolver } => {
                self.handle_submit(request, resolver).await
            }
            ClientOp::Subscribe { subscription } => self.handle_subscribe(subscription).await,
            ClientOp::Cancel { key } => self.handle_cancel(key).await,
            ClientOp::Rest { spec, resolver } => self.handle_rest(spec, resolver),
            ClientOp::Opened { generation, result } => {
                self.handle_opened(generation, result).await
            }
            ClientOp::Inbound {
                transport_id,
                message,
            } => self.handle_inbound(transport_id, message).await,
            ClientOp::TokenFetched {
                transport_id,
                result,
            } => self.handle_token(transport_id, result).await,
            ClientOp::HttpDone { id, reply } => {
                let routed = self.router.on_http_response(id, reply);
                self.process_routed(vec![routed]).await;
            }
            ClientOp::RetryTick { generation } => self.handle_retry_tick(generation),
            // Filtered by the run loop.
            ClientOp::Shutdown => {}
        }
    }

    fn handle_connect(&mut self) {
        self.reconnect.resume();
        self.retry_scheduled = false;
        if self.transport.is_some() || self.connecting {
            debug!("connect: session already active");
            return;
        }
        // A genuinely fresh session restarts the identifier sequence.
        if self.tracker.is_idle() {
            self.tracker.reset_ids();
        }
        self.start_open();
    }

    async fn handle_disconnect(&mut self, permanent: bool) {
        if permanent {
            info!("disconnecting permanently");
            self.teardown_transport();
            self.reconnect.suppress();
            self.retry_scheduled = false;
            if let Some(Routed::Phase(phase)) = self.router.set_disconnected(None, true) {
                self.emit_phase(phase);
            }
            self.tracker.cancel_all();
        } else {
            info!("disconnecting, reconnect will be scheduled");
            self.lose_session(None, false).await;
        }
    }

    async fn handle_reconfigure(&mut self, endpoint: Endpoint) {
        let active = self.transport.is_some() || self.connecting;
        let replace = active && endpoint.should_replace(&self.endpoint.websocket_url());
        self.endpoint = endpoint;
        if replace {
            info!(url = %self.endpoint.base_url(), "endpoint changed, replacing connection");
            self.teardown_transport();
            if let Some(Routed::Phase(phase)) = self.router.set_disconnected(None, true) {
                self.emit_phase(phase);
            }
            self.tracker.reset_active("endpoint replaced");
            self.start_open();
        }
    }

    async fn handle_submit(&mut self, request: HassRequest, mut resolver: CommandResolver) {
        if self.router.phase().is_command() {
            let id = self.tracker.allocate();
            match request.to_frame(id) {
                Ok(text) => {
                    self.tracker
                        .insert_pending(id, PendingCommand { request, resolver });
                    self.write_frame(text).await;
                }
                Err(e) => resolver.resolve(Err(e)),
            }
        } else if self.session_in_prospect() {
            debug!(kind = %request.kind, "queueing command until command phase");
            self.tracker
                .enqueue(QueuedItem::Command(PendingCommand { request, resolver }));
        } else {
            resolver.resolve(Err(HassError::Cancelled));
        }
    }

    async fn handle_subscribe(&mut self, mut subscription: ActiveSubscription) {
        if self.router.phase().is_command() {
            let id = self.tracker.allocate();
            match subscription.request.to_frame(id) {
                Ok(text) => {
                    self.tracker.insert_subscription(id, subscription);
                    self.write_frame(text).await;
                }
                Err(e) => subscription.completion.resolve(Err(e)),
            }
        } else if self.session_in_prospect() {
            debug!(kind = %subscription.request.kind, "queueing subscription");
            self.tracker.enqueue(QueuedItem::Subscription(subscription));
        } else {
            subscription.cancelled.store(true, Ordering::Release);
            subscription.completion.resolve(Err(HassError::Cancelled));
        }
    }

    async fn handle_cancel(&mut self, key: u64) {
        let Some(old_id) = self.tracker.cancel_subscription(key) else {
            return;
        };
        if !self.router.phase().is_command() {
            return;
        }
        // Best-effort unsubscribe for the server-side registration.
        let request =
            HassRequest::new("unsubscribe_events").with_field("subscription", old_id);
        let id = self.tracker.allocate();
        match request.to_frame(id) {
            Ok(text) => {
                self.tracker.insert_pending(
                    id,
                    PendingCommand {
                        request,
                        resolver: CommandResolver::detached(),
                    },
                );
                self.write_frame(text).await;
            }
            Err(e) => debug!(error = %e, "failed to serialize unsubscribe frame"),
        }
    }

    fn handle_rest(&mut self, spec: RestSpec, resolver: CommandResolver) {
        let id = self.tracker.allocate();
        self.tracker.insert_pending(
            id,
            PendingCommand {
                request: HassRequest::new("rest"),
                resolver,
            },
        );

        let rest = self.rest.clone();
        let endpoint = self.endpoint.clone();
        let tokens = self.tokens.clone();
        let op_tx = self.op_tx.clone();
        tokio::spawn(async move {
            let reply = rest.execute(&endpoint, tokens.as_ref(), spec).await;
            let _ = op_tx.send(ClientOp::HttpDone { id, reply });
        });
    }

    async fn handle_opened(&mut self, generation: u64, result: Result<Arc<dyn Transport>>) {
        if generation != self.generation || !self.connecting {
            if let Ok(transport) = result {
                debug!(id = transport.id(), "discarding stale connection attempt");
                transport.cancel("stale connection attempt").await;
            }
            return;
        }
        self.connecting = false;

        match result {
            Ok(transport) => {
                let transport_id = transport.id();
                debug!(transport_id, "transport attached");
                self.transport = Some(transport.clone());

                let op_tx = self.op_tx.clone();
                self.reader = Some(tokio::spawn(async move {
                    loop {
                        match transport.next_message().await {
                            Some(item) => {
                                let op = ClientOp::Inbound {
                                    transport_id,
                                    message: Some(item),
                                };
                                if op_tx.send(op).is_err() {
                                    break;
                                }
                            }
                            None => {
                                let _ = op_tx.send(ClientOp::Inbound {
                                    transport_id,
                                    message: None,
                                });
                                break;
                            }
                        }
                    }
                }));
            }
            Err(e) => {
                warn!(error = %e, "connection attempt failed");
                self.lose_session(Some(e), false).await;
            }
        }
    }

    async fn handle_inbound(
        &mut self,
        transport_id: u64,
        message: Option<Result<TransportMessage>>,
    ) {
        match &self.transport {
            Some(current) if current.id() == transport_id => {}
            _ => {
                debug!(transport_id, "dropping callback from stale transport");
                return;
            }
        }

        match message {
            Some(Ok(message)) => {
                {
                    let mut stats = self.stats.write().expect("stats lock poisoned");
                    stats.messages_received += 1;
                    stats.last_message = Some(Utc::now());
                }
                let routed = self.router.on_message(message);
                self.process_routed(routed).await;
            }
            Some(Err(e)) => {
                warn!(error = %e, "transport failed");
                self.lose_session(Some(e), false).await;
            }
            None => {
                info!("WebSocket stream ended");
                self.lose_session(Some(HassError::connection("websocket stream ended")), false)
                    .await;
            }
        }
    }

    async fn handle_token(&mut self, transport_id: u64, result: Result<String>) {
        let transport = match &self.transport {
            Some(t) if t.id() == transport_id => t.clone(),
            _ => {
                debug!(transport_id, "dropping token for stale transport");
                return;
            }
        };
        if !matches!(self.router.phase(), Phase::Authenticating) {
            return;
        }

        match result {
            Ok(token) => match protocol::auth_frame(&token) {
                Ok(frame) => {
                    debug!("sending authentication frame");
                    if let Err(e) = transport.send_text(frame).await {
                        self.lose_session(Some(e), false).await;
                    }
                }
                Err(e) => self.lose_session(Some(e), false).await,
            },
            Err(e) => {
                warn!(error = %e, "token provider failed");
                let error = match e {
                    unavailable @ HassError::TokenUnavailable(_) => unavailable,
                    other => HassError::token_unavailable(other.to_string()),
                };
                self.lose_session(Some(error), false).await;
            }
        }
    }

    fn handle_retry_tick(&mut self, generation: u64) {
        if generation != self.generation {
            return;
        }
        self.retry_scheduled = false;
        if self.transport.is_none() && !self.connecting && !self.reconnect.is_suppressed() {
            self.start_open();
        }
    }

    async fn process_routed(&mut self, routed: Vec<Routed>) {
        for item in routed {
            match item {
                Routed::Phase(phase) => {
                    self.emit_phase(phase.clone());
                    match phase {
                        Phase::Authenticating => self.begin_authentication(),
                        Phase::Command { server_version } => {
                            self.enter_command_phase(server_version).await
                        }
                        Phase::Disconnected { error, for_reset } => {
                            let auth_failed =
                                matches!(error.as_deref(), Some(HassError::AuthFailed(_)));
                            self.after_disconnect(auth_failed, for_reset);
                        }
                    }
                }
                Routed::Event { id, data } => {
                    if self.tracker.deliver_event(id, data) {
                        self.stats
                            .write()
                            .expect("stats lock poisoned")
                            .events_delivered += 1;
                    }
                }
                Routed::CommandResult { id, result } => {
                    self.tracker.resolve_result(id, result)
                }
            }
        }
    }

    fn begin_authentication(&mut self) {
        let Some(transport) = &self.transport else {
            return;
        };
        let transport_id = transport.id();
        let tokens = self.tokens.clone();
        let op_tx = self.op_tx.clone();
        tokio::spawn(async move {
            let result = tokens.access_token().await;
            let _ = op_tx.send(ClientOp::TokenFetched {
                transport_id,
                result,
            });
        });
    }

    async fn enter_command_phase(&mut self, server_version: String) {
        info!(server_version, "session ready");
        self.reconnect.record_success();
        self.stats
            .write()
            .expect("stats lock poisoned")
            .connected_since = Some(Utc::now());

        // Flush queued work and resurrect subscriptions before any further
        // inbound frame is processed.
        let frames = self.tracker.prepare();
        for frame in frames {
            debug!(id = frame.id, "replaying frame");
            if !self.write_frame(frame.text).await {
                break;
            }
        }
    }

    /// Tear down the session and record the disconnected phase
    async fn lose_session(&mut self, error: Option<HassError>, for_reset: bool) {
        let auth_failed = matches!(&error, Some(HassError::AuthFailed(_)));
        self.teardown_transport();
        if let Some(Routed::Phase(phase)) =
            self.router.set_disconnected(error.map(Arc::new), for_reset)
        {
            self.emit_phase(phase);
        }
        self.after_disconnect(auth_failed, for_reset);
    }

    /// Side effects of any transition into `Disconnected`
    fn after_disconnect(&mut self, auth_failed: bool, for_reset: bool) {
        self.teardown_transport();
        self.tracker.reset_active("connection lost");
        if for_reset {
            return;
        }
        if auth_failed {
            // A rejected token will not fare better on retry; wait for the
            // caller to reconnect explicitly.
            self.reconnect.suppress();
        } else {
            self.schedule_retry();
        }
    }

    fn start_open(&mut self) {
        self.connecting = true;
        self.generation += 1;
        let generation = self.generation;
        let url = self.endpoint.websocket_url();
        info!(%url, "opening WebSocket connection");

        let connector = self.connector.clone();
        let op_tx = self.op_tx.clone();
        tokio::spawn(async move {
            let result = connector.open(&url).await;
            let _ = op_tx.send(ClientOp::Opened { generation, result });
        });
    }

    fn teardown_transport(&mut self) {
        self.generation += 1;
        self.connecting = false;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(transport) = self.transport.take() {
            tokio::spawn(async move {
                transport.cancel("session teardown").await;
            });
        }
    }

    fn schedule_retry(&mut self) {
        if self.retry_scheduled || self.transport.is_some() || self.connecting {
            return;
        }
        match self.reconnect.next_delay() {
            None => debug!("reconnection suppressed"),
            Some(delay) => {
                info!(?delay, "scheduling reconnection attempt");
                self.retry_scheduled = true;
                self.stats
                    .write()
                    .expect("stats lock poisoned")
                    .reconnect_attempts += 1;

                let generation = self.generation;
                let op_tx = self.op_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = op_tx.send(ClientOp::RetryTick { generation });
                });
            }
        }
    }

    fn session_in_prospect(&self) -> bool {
        self.transport.is_some() || self.connecting || self.retry_scheduled
    }

    async fn write_frame(&mut self, text: String) -> bool {
        let Some(transport) = self.transport.clone() else {
            warn!("no transport for outbound frame");
            self.lose_session(Some(HassError::connection("no transport")), false)
                .await;
            return false;
        };
        match transport.send_text(text).await {
            Ok(()) => {
                self.stats
                    .write()
                    .expect("stats lock poisoned")
                    .commands_sent += 1;
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to write frame");
                self.lose_session(Some(e), false).await;
                false
            }
        }
    }

    fn emit_phase(&self, phase: Phase) {
        debug!(?phase, "phase transition");
        *self.phase_cell.write().expect("phase lock poisoned") = phase.clone();
        let _ = self.phase_tx.send(phase);
    }
}
