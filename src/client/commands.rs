//! Command and subscription tracking
//!
//! Owns the correlation-id counter, the map of in-flight singles, the map of
//! live subscriptions and the queue of requests waiting for the command
//! phase. Every identifier written to the wire has exactly one owner here,
//! and every owner receives exactly one terminal outcome.
//!
//! All methods are called from the client's event loop only; there is no
//! internal locking.

use crate::client::protocol::HassRequest;
use crate::error::{HassError, Result};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// One-shot result sink
///
/// The first delivery consumes the sender; later deliveries are silently
/// dropped, which guarantees at-most-once resolution even when several code
/// paths race to fail the same request.
#[derive(Debug)]
pub(crate) struct CommandResolver(Option<oneshot::Sender<Result<Value>>>);

impl CommandResolver {
    /// Create a resolver together with its receiving half
    pub fn channel() -> (Self, oneshot::Receiver<Result<Value>>) {
        let (tx, rx) = oneshot::channel();
        (Self(Some(tx)), rx)
    }

    /// Create a resolver whose deliveries go nowhere (fire-and-forget)
    pub fn detached() -> Self {
        Self(None)
    }

    /// Deliver the terminal outcome; a no-op after the first call
    pub fn resolve(&mut self, result: Result<Value>) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(result);
        }
    }
}

/// An in-flight single-shot command
#[derive(Debug)]
pub(crate) struct PendingCommand {
    pub request: HassRequest,
    pub resolver: CommandResolver,
}

/// A live event subscription
///
/// Resurrected across reconnects under a fresh wire id; the `key`, sinks and
/// `cancelled` flag persist for the whole caller-visible lifetime.
#[derive(Debug)]
pub(crate) struct ActiveSubscription {
    /// Stable cancellation token, independent of the wire id
    pub key: u64,
    pub request: HassRequest,
    pub events: mpsc::UnboundedSender<Value>,
    pub completion: CommandResolver,
    pub cancelled: Arc<AtomicBool>,
}

/// A request parked until the command phase is reached
#[derive(Debug)]
pub(crate) enum QueuedItem {
    Command(PendingCommand),
    Subscription(ActiveSubscription),
}

/// A frame ready to be written to the transport
#[derive(Debug)]
pub(crate) struct OutboundFrame {
    pub id: u64,
    pub text: String,
}

/// Tracker for pending singles, subscriptions and queued requests
#[derive(Debug, Default)]
pub(crate) struct CommandTracker {
    next_id: u64,
    pending: HashMap<u64, PendingCommand>,
    subscriptions: HashMap<u64, ActiveSubscription>,
    queued: VecDeque<QueuedItem>,
}

impl CommandTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restart the identifier sequence; only valid when nothing is tracked
    pub fn reset_ids(&mut self) {
        debug_assert!(self.is_idle());
        self.next_id = 0;
    }

    /// True when no request owns or awaits an identifier
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.subscriptions.is_empty() && self.queued.is_empty()
    }

    /// Allocate the next identifier; never reused within a session
    pub fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Register a single under an already-allocated id
    pub fn insert_pending(&mut self, id: u64, command: PendingCommand) {
        let previous = self.pending.insert(id, command);
        debug_assert!(previous.is_none(), "identifier {id} already owned");
    }

    /// Register a subscription under an already-allocated id
    pub fn insert_subscription(&mut self, id: u64, subscription: ActiveSubscription) {
        let previous = self.subscriptions.insert(id, subscription);
        debug_assert!(previous.is_none(), "identifier {id} already owned");
    }

    /// Park a request until the next command phase
    pub fn enqueue(&mut self, item: QueuedItem) {
        self.queued.push_back(item);
    }

    /// Route a result frame to its owner
    ///
    /// For singles the result is terminal. For subscriptions only a failure
    /// is terminal; a success is the server's subscribe acknowledgment and
    /// leaves the subscription registered.
    pub fn resolve_result(&mut self, id: u64, result: Result<Value>) {
        if let Some(mut pending) = self.pending.remove(&id) {
            pending.resolver.resolve(result);
            return;
        }
        match self.subscriptions.remove(&id) {
            Some(subscription) if result.is_ok() => {
                debug!(id, "subscription acknowledged");
                self.subscriptions.insert(id, subscription);
            }
            Some(mut subscription) => {
                subscription.cancelled.store(true, Ordering::Release);
                subscription.completion.resolve(result);
            }
            None => {
                debug!(id, "dropping result for unknown identifier");
            }
        }
    }

    /// Deliver an event to its subscription; unknown ids are dropped
    pub fn deliver_event(&mut self, id: u64, data: Value) -> bool {
        match self.subscriptions.get(&id) {
            Some(subscription) if !subscription.cancelled.load(Ordering::Acquire) => {
                if subscription.events.send(data).is_err() {
                    debug!(id, "subscriber dropped its event receiver");
                }
                true
            }
            Some(_) => {
                debug!(id, "dropping event for cancelled subscription");
                false
            }
            None => {
                warn!(id, "dropping event for unknown subscription");
                false
            }
        }
    }

    /// Flush queued requests and re-submit all subscriptions under fresh ids
    ///
    /// Invoked on entering the command phase. Returns the frames to write,
    /// in submission order: queued items first, then resurrected
    /// subscriptions ordered by their previous id.
    pub fn prepare(&mut self) -> Vec<OutboundFrame> {
        let mut existing: Vec<(u64, ActiveSubscription)> = self.subscriptions.drain().collect();
        existing.sort_by_key(|(old_id, _)| *old_id);

        let mut frames = Vec::new();

        for item in self.queued.drain(..).collect::<Vec<_>>() {
            match item {
                QueuedItem::Command(mut command) => {
                    let id = self.next_id + 1;
                    match command.request.to_frame(id) {
                        Ok(text) => {
                            self.next_id = id;
                            self.pending.insert(id, command);
                            frames.push(OutboundFrame { id, text });
                        }
                        Err(e) => command.resolver.resolve(Err(e)),
                    }
                }
                QueuedItem::Subscription(mut subscription) => {
                    let id = self.next_id + 1;
                    match subscription.request.to_frame(id) {
                        Ok(text) => {
                            self.next_id = id;
                            self.subscriptions.insert(id, subscription);
                            frames.push(OutboundFrame { id, text });
                        }
                        Err(e) => subscription.completion.resolve(Err(e)),
                    }
                }
            }
        }

        for (old_id, mut subscription) in existing {
            let id = self.next_id + 1;
            match subscription.request.to_frame(id) {
                Ok(text) => {
                    self.next_id = id;
                    debug!(old_id, new_id = id, "re-submitting subscription");
                    self.subscriptions.insert(id, subscription);
                    frames.push(OutboundFrame { id, text });
                }
                Err(e) => subscription.completion.resolve(Err(e)),
            }
        }

        frames
    }

    /// Handle leaving the command phase
    ///
    /// Retryable singles return to the queue in id order; the rest fail with
    /// a connection error. Subscriptions stay registered (their wire ids are
    /// now stale) awaiting the next [`prepare`](Self::prepare).
    pub fn reset_active(&mut self, reason: &str) {
        let mut drained: Vec<(u64, PendingCommand)> = self.pending.drain().collect();
        drained.sort_by_key(|(id, _)| *id);

        // Reverse iteration + push_front keeps in-flight requests ahead of
        // anything queued later, in their original order.
        for (id, mut command) in drained.into_iter().rev() {
            if command.request.should_retry {
                debug!(id, "re-queueing retryable command after disconnect");
                self.queued.push_front(QueuedItem::Command(command));
            } else {
                command.resolver.resolve(Err(HassError::connection(reason)));
            }
        }
    }

    /// Drop the subscription with the given cancellation key
    ///
    /// Returns its last wire id so the caller can emit an unsubscribe
    /// request. Event delivery stops immediately.
    pub fn cancel_subscription(&mut self, key: u64) -> Option<u64> {
        let active = self
            .subscriptions
            .iter()
            .find(|(_, s)| s.key == key)
            .map(|(id, _)| *id);
        if let Some(id) = active {
            if let Some(mut subscription) = self.subscriptions.remove(&id) {
                subscription.cancelled.store(true, Ordering::Release);
                subscription.completion.resolve(Err(HassError::Cancelled));
            }
            return Some(id);
        }

        // The subscription may still be parked in the queue.
        if let Some(position) = self.queued.iter().position(
            |item| matches!(item, QueuedItem::Subscription(s) if s.key == key),
        ) {
            if let Some(QueuedItem::Subscription(mut subscription)) = self.queued.remove(position) {
                subscription.cancelled.store(true, Ordering::Release);
                subscription.completion.resolve(Err(HassError::Cancelled));
            }
        }
        None
    }

    /// Cancel everything: pending, queued and subscribed
    pub fn cancel_all(&mut self) {
        for (_, mut command) in self.pending.drain() {
            command.resolver.resolve(Err(HassError::Cancelled));
        }
        for item in self.queued.drain(..) {
            match item {
                QueuedItem::Command(mut command) => {
                    command.resolver.resolve(Err(HassError::Cancelled))
                }
                QueuedItem::Subscription(mut subscription) => {
                    subscription.cancelled.store(true, Ordering::Release);
                    subscription.completion.resolve(Err(HassError::Cancelled));
                }
            }
        }
        for (_, mut subscription) in self.subscriptions.drain() {
            subscription.cancelled.store(true, Ordering::Release);
            subscription.completion.resolve(Err(HassError::Cancelled));
        }
    }
}
