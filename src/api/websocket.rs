//! Live feed over WebSocket.
//!
//! ## Protocol
//!
//! Clients connect to `/ws/live` and receive the feed messages as JSON
//! (`officer_update`, `risk_event`, `system_alert`, `heartbeat`), starting
//! with a `snapshot` of every officer.
//!
//! ### Client Commands
//!
//! - `{"action": "ping"}`
//! - `{"action": "subscribe", "officer_ids": ["..."]}`
//! - `{"action": "unsubscribe", "officer_ids": ["..."]}`
//! - `{"action": "subscribe_all"}`
//! - `{"action": "get_snapshot"}`
//!
//! A push that does not complete within the delivery timeout closes the
//! connection.

use std::collections::BTreeSet;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use chrono::{DateTime, Utc};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};

use super::handlers::run_blocking;
use super::AppState;
use crate::fanout::FeedMessage;
use crate::types::OfficerState;

/// Commands sent by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientRequest {
    Ping,
    Subscribe { officer_ids: Vec<String> },
    Unsubscribe { officer_ids: Vec<String> },
    SubscribeAll,
    GetSnapshot,
}

/// Direct replies to client commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionReply {
    Pong {
        timestamp: DateTime<Utc>,
    },
    /// Current filter after a subscription change
    Subscribed {
        all: bool,
        officer_ids: Vec<String>,
    },
    Snapshot {
        timestamp: DateTime<Utc>,
        officers: Vec<OfficerState>,
    },
    Error {
        code: String,
        message: String,
    },
}

#[tracing::instrument(skip(state, ws))]
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

type WsSender = SplitSink<WebSocket, Message>;

/// Serialize and push one message, bounded by `timeout`.
///
/// Returns false when the connection should be closed.
async fn push<T: Serialize>(sender: &mut WsSender, message: &T, timeout: Duration) -> bool {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize WebSocket message");
            return true;
        }
    };
    match tokio::time::timeout(timeout, sender.send(Message::Text(json))).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "WebSocket send failed");
            false
        }
        Err(_) => {
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "WebSocket delivery timed out, closing");
            false
        }
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let monitor = state.monitor().clone();
    let delivery_timeout = monitor.config().server.delivery_timeout();
    let (mut sender, mut receiver) = socket.split();
    let mut feed = monitor.open_feed();
    let mut filter = SubscriptionFilter::default();

    tracing::debug!(mode = ?feed.mode(), "WebSocket client connected");

    let officers = match run_blocking(&monitor, |m| m.snapshot()).await {
        Ok(officers) => officers,
        Err(e) => {
            tracing::warn!(error = %e, "Initial snapshot failed, closing");
            return;
        }
    };
    let initial = SessionReply::Snapshot {
        timestamp: Utc::now(),
        officers,
    };
    if !push(&mut sender, &initial, delivery_timeout).await {
        return;
    }

    loop {
        tokio::select! {
            message = feed.next_message() => {
                let Some(message) = message else { break };
                if filter.should_receive(&message) && !push(&mut sender, &message, delivery_timeout).await {
                    break;
                }
            }
            incoming = receiver.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!("Client closed WebSocket connection");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "WebSocket receive failed");
                        break;
                    }
                };

                let reply = match serde_json::from_str::<ClientRequest>(&text) {
                    Ok(ClientRequest::GetSnapshot) => match run_blocking(&monitor, |m| m.snapshot()).await {
                        Ok(officers) => filter.handle(ClientRequest::GetSnapshot, move || officers),
                        Err(e) => SessionReply::Error {
                            code: "SNAPSHOT_FAILED".to_string(),
                            message: e.to_string(),
                        },
                    },
                    // Other commands never read the store
                    Ok(request) => filter.handle(request, Vec::new),
                    Err(e) => SessionReply::Error {
                        code: "INVALID_COMMAND".to_string(),
                        message: e.to_string(),
                    },
                };
                if !push(&mut sender, &reply, delivery_timeout).await {
                    break;
                }
            }
        }
    }

    tracing::debug!("WebSocket connection closed");
}

/// Which officers one connection wants updates for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionFilter {
    officer_ids: BTreeSet<String>,
    all: bool,
}

impl Default for SubscriptionFilter {
    fn default() -> Self {
        Self {
            officer_ids: BTreeSet::new(),
            all: true,
        }
    }
}

impl SubscriptionFilter {
    pub fn subscribe<I: IntoIterator<Item = String>>(&mut self, officer_ids: I) {
        self.officer_ids.extend(officer_ids);
        self.all = self.officer_ids.is_empty();
    }

    pub fn unsubscribe(&mut self, officer_ids: &[String]) {
        for id in officer_ids {
            self.officer_ids.remove(id);
        }
        if self.officer_ids.is_empty() {
            self.all = true;
        }
    }

    pub fn subscribe_all(&mut self) {
        self.all = true;
        self.officer_ids.clear();
    }

    /// Messages not tied to an officer always pass
    pub fn should_receive(&self, message: &FeedMessage) -> bool {
        if self.all {
            return true;
        }
        match message.officer_id() {
            Some(id) => self.officer_ids.contains(id),
            None => true,
        }
    }

    /// Apply a client command and build its reply
    pub fn handle(
        &mut self,
        request: ClientRequest,
        snapshot: impl FnOnce() -> Vec<OfficerState>,
    ) -> SessionReply {
        match request {
            ClientRequest::Ping => {
                return SessionReply::Pong {
                    timestamp: Utc::now(),
                }
            }
            ClientRequest::GetSnapshot => {
                let officers: Vec<OfficerState> = snapshot()
                    .into_iter()
                    .filter(|o| self.all || self.officer_ids.contains(&o.officer_id))
                    .collect();
                return SessionReply::Snapshot {
                    timestamp: Utc::now(),
                    officers,
                };
            }
            ClientRequest::Subscribe { officer_ids } => self.subscribe(officer_ids),
            ClientRequest::Unsubscribe { officer_ids } => self.unsubscribe(&officer_ids),
            ClientRequest::SubscribeAll => self.subscribe_all(),
        }
        tracing::debug!(all = self.all, officers = self.officer_ids.len(), "Subscription changed");
        SessionReply::Subscribed {
            all: self.all,
            officer_ids: self.officer_ids.iter().cloned().collect(),
        }
    }
}
