//! Inbound frame classification and session phase
//!
//! The [`ResponseRouter`] is the single writer of the session [`Phase`]. It
//! parses inbound frames, drives the authentication transitions and hands
//! events and results back to the orchestrator for dispatch. Malformed
//! frames are logged and dropped; the session keeps running.

use crate::client::protocol::{CommandError, ServerMessage};
use crate::client::transport::TransportMessage;
use crate::error::{HassError, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Coarse session state observed by callers
#[derive(Debug, Clone)]
pub enum Phase {
    /// No usable session; `for_reset` distinguishes an intentional reset
    /// from an unexpected loss that should trigger reconnection
    Disconnected {
        error: Option<Arc<HassError>>,
        for_reset: bool,
    },
    /// Transport is up, waiting for the auth handshake to finish
    Authenticating,
    /// Authenticated; commands may be sent
    Command { server_version: String },
}

impl Phase {
    /// True when outbound non-auth frames are permitted
    pub fn is_command(&self) -> bool {
        matches!(self, Phase::Command { .. })
    }
}

// Redundant transitions are deduplicated by value; a carried error compares
// by kind + message, not by identity.
impl PartialEq for Phase {
    fn eq(&self, other: &Self) -> bool {
        fn project(error: &Option<Arc<HassError>>) -> Option<(&'static str, String)> {
            error.as_ref().map(|e| (e.kind(), e.to_string()))
        }

        match (self, other) {
            (Phase::Authenticating, Phase::Authenticating) => true,
            (
                Phase::Command { server_version: a },
                Phase::Command { server_version: b },
            ) => a == b,
            (
                Phase::Disconnected {
                    error: e1,
                    for_reset: r1,
                },
                Phase::Disconnected {
                    error: e2,
                    for_reset: r2,
                },
            ) => r1 == r2 && project(e1) == project(e2),
            _ => false,
        }
    }
}

/// A classified inbound item, ready for dispatch by the orchestrator
#[derive(Debug)]
pub(crate) enum Routed {
    /// The phase changed; the new value has already been recorded
    Phase(Phase),
    /// Event payload for a subscription
    Event { id: u64, data: Value },
    /// Terminal or acknowledging result for a command
    CommandResult { id: u64, result: Result<Value> },
}

/// Reply captured from the REST path, fed through the same routing
#[derive(Debug)]
pub(crate) struct HttpReply {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

/// Parser and phase owner for one client session
#[derive(Debug)]
pub(crate) struct ResponseRouter {
    phase: Phase,
}

impl ResponseRouter {
    pub fn new() -> Self {
        Self {
            phase: Phase::Disconnected {
                error: None,
                for_reset: true,
            },
        }
    }

    /// Current phase
    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    /// Record a transition, suppressing no-op repeats
    fn transition(&mut self, next: Phase) -> Option<Routed> {
        if self.phase == next {
            return None;
        }
        self.phase = next.clone();
        Some(Routed::Phase(next))
    }

    /// Classify one transport message
    pub fn on_message(&mut self, message: TransportMessage) -> Vec<Routed> {
        let text = match message {
            TransportMessage::Binary(data) => {
                error!(len = data.len(), "discarding binary frame");
                return Vec::new();
            }
            TransportMessage::Text(text) => text,
        };

        let mut routed = Vec::new();

        // Fast path: the server's very first frame demands authentication;
        // detect it even before the JSON parse. The parsed branch below is
        // deduplicated against this one.
        if text.contains("auth_required") {
            routed.extend(self.transition(Phase::Authenticating));
        }

        match serde_json::from_str::<ServerMessage>(&text) {
            Err(e) => {
                warn!(error = %e, "dropping unparseable frame");
            }
            Ok(ServerMessage::AuthRequired { ha_version }) => {
                debug!(?ha_version, "authentication required");
                routed.extend(self.transition(Phase::Authenticating));
            }
            Ok(ServerMessage::AuthOk { ha_version }) => {
                routed.extend(self.transition(Phase::Command {
                    server_version: ha_version.unwrap_or_default(),
                }));
            }
            Ok(ServerMessage::AuthInvalid { message }) => {
                let message =
                    message.unwrap_or_else(|| "authentication rejected".to_string());
                routed.extend(self.transition(Phase::Disconnected {
                    error: Some(Arc::new(HassError::AuthFailed(message))),
                    for_reset: false,
                }));
            }
            Ok(ServerMessage::Event { id, event }) => {
                routed.push(Routed::Event { id, data: event });
            }
            Ok(ServerMessage::Result {
                id,
                success,
                result,
                error,
            }) => {
                let outcome = if success {
                    Ok(result.unwrap_or(Value::Null))
                } else {
                    Err(error
                        .map(CommandError::into_error)
                        .unwrap_or_else(|| HassError::external("unknown", "command failed")))
                };
                routed.push(Routed::CommandResult {
                    id,
                    result: outcome,
                });
            }
        }

        routed
    }

    /// Convert a REST reply into a routed result for the given identifier
    pub fn on_http_response(&self, id: u64, reply: Result<HttpReply>) -> Routed {
        let result = match reply {
            Err(e) => Err(e),
            Ok(reply) if reply.status >= 400 => {
                let message = if reply.body.trim().is_empty() {
                    "Unacceptable status code".to_string()
                } else {
                    reply.body
                };
                Err(HassError::External {
                    code: reply.status.to_string(),
                    message,
                })
            }
            Ok(reply) => {
                let is_json = reply
                    .content_type
                    .as_deref()
                    .map(|ct| ct.contains("json"))
                    .unwrap_or(true);
                if !is_json {
                    Ok(Value::String(reply.body))
                } else if reply.body.trim().is_empty() {
                    Ok(Value::Null)
                } else {
                    serde_json::from_str::<Value>(&reply.body).map_err(Into::into)
                }
            }
        };
        Routed::CommandResult { id, result }
    }

    /// Force the phase to a disconnected state
    pub fn set_disconnected(
        &mut self,
        error: Option<Arc<HassError>>,
        for_reset: bool,
    ) -> Option<Routed> {
        self.transition(Phase::Disconnected { error, for_reset })
    }

    /// Reset to the initial state
    pub fn reset(&mut self) -> Option<Routed> {
        self.set_disconnected(None, true)
    }
}
