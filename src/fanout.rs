//! Event fan-out
//!
//! Delivers state changes, risk events and alerts to every subscriber.
//!
//! Each subscriber owns a bounded queue. Publishing never waits: a message is
//! handed off with `try_send`, and a subscriber whose queue is full is dropped.
//! Its stream then ends and it has to subscribe again. Messages for one officer
//! are published from inside that officer's critical section, so every
//! subscriber sees them in the order they were applied.

use crate::store::LiveStateStore;
use crate::types::{OfficerState, RiskEvent, SystemAlert};
use chrono::{DateTime, Utc};
use futures_util::Stream;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

/// Messages delivered to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    /// An officer's live state changed
    OfficerUpdate {
        timestamp: DateTime<Utc>,
        officer: OfficerState,
    },
    /// A risk event was raised for an officer
    RiskEvent {
        timestamp: DateTime<Utc>,
        event: RiskEvent,
    },
    /// A system alert was raised
    SystemAlert {
        timestamp: DateTime<Utc>,
        alert: SystemAlert,
    },
    /// Keep-alive
    Heartbeat { timestamp: DateTime<Utc> },
}

impl FeedMessage {
    pub fn officer_update(officer: OfficerState) -> Self {
        FeedMessage::OfficerUpdate {
            timestamp: Utc::now(),
            officer,
        }
    }

    pub fn risk_event(event: RiskEvent) -> Self {
        FeedMessage::RiskEvent {
            timestamp: Utc::now(),
            event,
        }
    }

    pub fn system_alert(alert: SystemAlert) -> Self {
        FeedMessage::SystemAlert {
            timestamp: Utc::now(),
            alert,
        }
    }

    pub fn heartbeat() -> Self {
        FeedMessage::Heartbeat {
            timestamp: Utc::now(),
        }
    }

    /// Officer the message concerns, if any
    pub fn officer_id(&self) -> Option<&str> {
        match self {
            FeedMessage::OfficerUpdate { officer, .. } => Some(&officer.officer_id),
            FeedMessage::RiskEvent { event, .. } => Some(&event.officer_id),
            FeedMessage::SystemAlert { alert, .. } => alert.officer_id.as_deref(),
            FeedMessage::Heartbeat { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FeedMessage::OfficerUpdate { .. } => "officer_update",
            FeedMessage::RiskEvent { .. } => "risk_event",
            FeedMessage::SystemAlert { .. } => "system_alert",
            FeedMessage::Heartbeat { .. } => "heartbeat",
        }
    }
}

/// Receiving end of one subscriber.
///
/// Yields `None` once the subscriber has been dropped by the fan-out.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<FeedMessage>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next message
    pub async fn recv(&mut self) -> Option<FeedMessage> {
        self.receiver.recv().await
    }

    /// Take a queued message without waiting
    pub fn try_recv(&mut self) -> Option<FeedMessage> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = FeedMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

#[derive(Debug)]
struct Subscriber {
    id: u64,
    sender: mpsc::Sender<FeedMessage>,
}

/// Delivery counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanoutStats {
    pub subscribers: usize,
    pub published: u64,
    /// Subscribers dropped because their queue overflowed
    pub dropped: u64,
}

/// Fan-out of feed messages to all subscribers
#[derive(Debug)]
pub struct EventFanout {
    store: Arc<LiveStateStore>,
    subscribers: Mutex<Vec<Subscriber>>,
    capacity: usize,
    next_id: AtomicU64,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl EventFanout {
    /// Create a fan-out reading snapshots from `store`, with `capacity`
    /// buffered messages per subscriber
    pub fn new(store: Arc<LiveStateStore>, capacity: usize) -> Self {
        Self {
            store,
            subscribers: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.capacity);
        self.subscribers.lock().push(Subscriber { id, sender });
        tracing::debug!(subscriber_id = id, "Subscriber registered");
        Subscription { id, receiver }
    }

    /// Hand a message to every subscriber without waiting.
    ///
    /// Returns how many subscribers accepted it.
    pub fn publish(&self, message: FeedMessage) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.subscribers.lock();
        let mut delivered = 0;

        subscribers.retain(|subscriber| match subscriber.sender.try_send(message.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    subscriber_id = subscriber.id,
                    message_type = message.kind(),
                    "Subscriber queue full, dropping subscriber"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(subscriber_id = subscriber.id, "Subscriber went away");
                false
            }
        });

        delivered
    }

    /// Current state of every officer
    pub fn snapshot(&self) -> Vec<OfficerState> {
        self.store.list()
    }

    /// `snapshot` run on the blocking pool, for callers on async workers.
    ///
    /// Listing holds the store's map lock exclusively.
    pub async fn snapshot_blocking(self: &Arc<Self>) -> Vec<OfficerState> {
        let fanout = Arc::clone(self);
        match tokio::task::spawn_blocking(move || fanout.snapshot()).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, "Snapshot task failed");
                Vec::new()
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn stats(&self) -> FanoutStats {
        FanoutStats {
            subscribers: self.subscriber_count(),
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Publish a heartbeat every `period` until the fan-out is dropped
    pub fn spawn_heartbeat(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let fanout: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                interval.tick().await;
                match fanout.upgrade() {
                    Some(fanout) => {
                        fanout.publish(FeedMessage::heartbeat());
                    }
                    None => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::OfficerUpdate;
    use futures_util::StreamExt;
    use pretty_assertions::assert_eq;

    fn fanout(capacity: usize) -> EventFanout {
        EventFanout::new(Arc::new(LiveStateStore::default()), capacity)
    }

    fn update(id: &str, revision: u64) -> FeedMessage {
        let mut state = OfficerState::new(id);
        state.revision = revision;
        FeedMessage::officer_update(state)
    }

    fn revision_of(message: &FeedMessage) -> u64 {
        match message {
            FeedMessage::OfficerUpdate { officer, .. } => officer.revision,
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_snapshot_blocking_matches_snapshot() {
        let store = Arc::new(LiveStateStore::default());
        for id in ["B-2", "A-1"] {
            store.upsert(id, OfficerUpdate::default().seen_at(Utc::now()));
        }
        let fanout = Arc::new(EventFanout::new(store, 4));

        let snapshot = fanout.snapshot_blocking().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot, fanout.snapshot());
    }

    #[tokio::test]
    async fn test_publish_preserves_order() {
        let fanout = fanout(16);
        let mut a = fanout.subscribe();
        let mut b = fanout.subscribe();

        for rev in 1..=5 {
            assert_eq!(fanout.publish(update("A-1", rev)), 2);
        }

        for sub in [&mut a, &mut b] {
            let revisions: Vec<u64> = (0..5)
                .map(|_| revision_of(&sub.try_recv().unwrap()))
                .collect();
            assert_eq!(revisions, vec![1, 2, 3, 4, 5]);
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_is_dropped() {
        let fanout = fanout(2);
        let mut slow = fanout.subscribe();
        let mut fast = fanout.subscribe();

        fanout.publish(update("A-1", 1));
        assert_eq!(revision_of(&fast.recv().await.unwrap()), 1);
        fanout.publish(update("A-1", 2));
        assert_eq!(revision_of(&fast.recv().await.unwrap()), 2);
        // slow now holds two messages; the third overflows it
        assert_eq!(fanout.publish(update("A-1", 3)), 1);

        assert_eq!(fanout.subscriber_count(), 1);
        assert_eq!(fanout.stats().dropped, 1);

        // Buffered messages drain, then the stream ends
        assert_eq!(revision_of(&slow.recv().await.unwrap()), 1);
        assert_eq!(revision_of(&slow.recv().await.unwrap()), 2);
        assert!(slow.recv().await.is_none());
        assert_eq!(revision_of(&fast.recv().await.unwrap()), 3);
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_removed() {
        let fanout = fanout(4);
        let sub = fanout.subscribe();
        drop(sub);
        assert_eq!(fanout.publish(FeedMessage::heartbeat()), 0);
        assert_eq!(fanout.subscriber_count(), 0);
        assert_eq!(fanout.stats().dropped, 0);
    }

    #[tokio::test]
    async fn test_subscription_is_a_stream() {
        let fanout = fanout(4);
        let mut sub = fanout.subscribe();
        fanout.publish(FeedMessage::heartbeat());
        let message = sub.next().await.unwrap();
        assert_eq!(message.kind(), "heartbeat");
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_task() {
        let fanout = Arc::new(fanout(4));
        let mut sub = fanout.subscribe();
        let handle = fanout.spawn_heartbeat(Duration::from_secs(30));

        let message = sub.recv().await.unwrap();
        assert!(matches!(message, FeedMessage::Heartbeat { .. }));
        handle.abort();
    }

    #[test]
    fn test_message_wire_format() {
        let json = serde_json::to_value(FeedMessage::heartbeat()).unwrap();
        assert_eq!(json["type"], "heartbeat");
        assert!(json["timestamp"].is_string());

        let json = serde_json::to_value(update("A-1", 3)).unwrap();
        assert_eq!(json["type"], "officer_update");
        assert_eq!(json["officer"]["officer_id"], "A-1");
    }

    #[test]
    fn test_officer_id_routing() {
        assert_eq!(update("A-1", 1).officer_id(), Some("A-1"));
        assert_eq!(FeedMessage::heartbeat().officer_id(), None);
    }
}
