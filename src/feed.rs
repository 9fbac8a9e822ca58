//! Feed consumers
//!
//! Consumers read the feed through [`EventSource`] and do not care how the
//! messages arrive. Two backends exist:
//! - [`PushSource`] holds a fan-out subscription and resubscribes with
//!   backoff when it is dropped, replaying a snapshot to catch up
//! - [`PullSource`] polls snapshots on a fixed interval and emits an update
//!   for every officer whose revision moved

use crate::config::{FeedConfig, FeedMode};
use crate::fanout::{EventFanout, FeedMessage, Subscription};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// A transport-agnostic stream of feed messages
#[async_trait]
pub trait EventSource: Send {
    /// Next message, or `None` once the source is closed for good
    async fn next_message(&mut self) -> Option<FeedMessage>;

    fn mode(&self) -> FeedMode;
}

/// Open the backend selected by configuration
pub fn open_feed(fanout: Arc<EventFanout>, config: &FeedConfig) -> Box<dyn EventSource> {
    match config.mode {
        FeedMode::Push => Box::new(PushSource::new(fanout, config)),
        FeedMode::Pull => Box::new(PullSource::new(fanout, config.poll_interval())),
    }
}

/// Push backend over a fan-out subscription
pub struct PushSource {
    fanout: Arc<EventFanout>,
    subscription: Option<Subscription>,
    subscribed_at: Instant,
    pending: VecDeque<FeedMessage>,
    retry_interval: Duration,
    max_backoff: Duration,
    consecutive_drops: u32,
    reconnects: u64,
}

impl PushSource {
    pub fn new(fanout: Arc<EventFanout>, config: &FeedConfig) -> Self {
        let subscription = fanout.subscribe();
        Self {
            fanout,
            subscription: Some(subscription),
            subscribed_at: Instant::now(),
            pending: VecDeque::new(),
            retry_interval: config.retry_interval(),
            max_backoff: config.max_backoff(),
            consecutive_drops: 0,
            reconnects: 0,
        }
    }

    /// Times this source had to resubscribe
    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    /// Delay before the next resubscribe: doubles per consecutive drop
    fn backoff(&self) -> Duration {
        let factor = 2u32.saturating_pow(self.consecutive_drops.saturating_sub(1));
        self.retry_interval
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    async fn resubscribe(&mut self) {
        // A subscription that survived a full backoff period was healthy
        if self.subscribed_at.elapsed() > self.max_backoff {
            self.consecutive_drops = 0;
        }
        self.consecutive_drops += 1;

        let delay = self.backoff();
        tracing::warn!(
            delay_ms = delay.as_millis() as u64,
            attempt = self.consecutive_drops,
            "Feed subscription dropped, resubscribing"
        );
        tokio::time::sleep(delay).await;

        // Subscribe before reading the snapshot so nothing falls in between
        self.subscription = Some(self.fanout.subscribe());
        self.subscribed_at = Instant::now();
        self.reconnects += 1;
        let snapshot = self.fanout.snapshot_blocking().await;
        self.pending
            .extend(snapshot.into_iter().map(FeedMessage::officer_update));
    }
}

#[async_trait]
impl EventSource for PushSource {
    async fn next_message(&mut self) -> Option<FeedMessage> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Some(message);
            }

            if let Some(subscription) = self.subscription.as_mut() {
                match subscription.recv().await {
                    Some(message) => return Some(message),
                    None => self.subscription = None,
                }
            }

            self.resubscribe().await;
        }
    }

    fn mode(&self) -> FeedMode {
        FeedMode::Push
    }
}

/// Pull backend polling fan-out snapshots
pub struct PullSource {
    fanout: Arc<EventFanout>,
    period: Duration,
    interval: Option<Interval>,
    /// Last revision emitted per officer
    seen: HashMap<String, u64>,
    pending: VecDeque<FeedMessage>,
}

impl PullSource {
    pub fn new(fanout: Arc<EventFanout>, period: Duration) -> Self {
        Self {
            fanout,
            period,
            interval: None,
            seen: HashMap::new(),
            pending: VecDeque::new(),
        }
    }

    async fn poll_snapshot(&mut self) {
        for state in self.fanout.snapshot_blocking().await {
            if self.seen.get(&state.officer_id) != Some(&state.revision) {
                self.seen.insert(state.officer_id.clone(), state.revision);
                self.pending.push_back(FeedMessage::officer_update(state));
            }
        }
    }
}

#[async_trait]
impl EventSource for PullSource {
    async fn next_message(&mut self) -> Option<FeedMessage> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Some(message);
            }

            let period = self.period;
            let interval = self.interval.get_or_insert_with(|| {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                interval
            });
            interval.tick().await;
            self.poll_snapshot().await;
        }
    }

    fn mode(&self) -> FeedMode {
        FeedMode::Pull
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LiveStateStore, OfficerUpdate};
    use chrono::{TimeZone, Utc};

    fn setup(capacity: usize) -> (Arc<LiveStateStore>, Arc<EventFanout>) {
        let store = Arc::new(LiveStateStore::default());
        let fanout = Arc::new(EventFanout::new(store.clone(), capacity));
        (store, fanout)
    }

    fn touch(store: &LiveStateStore, id: &str, secs: u32) {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, secs).unwrap();
        store.upsert(id, OfficerUpdate::default().seen_at(at));
    }

    fn officer_of(message: FeedMessage) -> String {
        match message {
            FeedMessage::OfficerUpdate { officer, .. } => officer.officer_id,
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_open_feed_selects_backend() {
        let (_, fanout) = setup(4);
        let push = open_feed(fanout.clone(), &FeedConfig::default());
        assert_eq!(push.mode(), FeedMode::Push);

        let config = FeedConfig {
            mode: FeedMode::Pull,
            ..Default::default()
        };
        let pull = open_feed(fanout, &config);
        assert_eq!(pull.mode(), FeedMode::Pull);
    }

    #[tokio::test]
    async fn test_push_source_delivers_published_messages() {
        let (_, fanout) = setup(4);
        let mut source = PushSource::new(fanout.clone(), &FeedConfig::default());
        fanout.publish(FeedMessage::heartbeat());
        let message = source.next_message().await.unwrap();
        assert_eq!(message.kind(), "heartbeat");
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_source_resubscribes_with_catch_up() {
        let (store, fanout) = setup(1);
        touch(&store, "A-1", 1);
        let mut source = PushSource::new(fanout.clone(), &FeedConfig::default());

        // Second publish overflows the one-slot queue
        fanout.publish(FeedMessage::heartbeat());
        fanout.publish(FeedMessage::heartbeat());
        assert_eq!(fanout.subscriber_count(), 0);

        assert_eq!(source.next_message().await.unwrap().kind(), "heartbeat");
        // Queue drained and closed: resubscribe and replay the snapshot
        assert_eq!(officer_of(source.next_message().await.unwrap()), "A-1");
        assert_eq!(source.reconnects(), 1);
        assert_eq!(fanout.subscriber_count(), 1);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let store = Arc::new(LiveStateStore::default());
        let fanout = Arc::new(EventFanout::new(store, 1));
        let config = FeedConfig {
            retry_interval_ms: 100,
            max_backoff_ms: 350,
            ..Default::default()
        };
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let _guard = rt.enter();
        let mut source = PushSource::new(fanout, &config);

        let delays: Vec<u128> = (1..=4)
            .map(|drops| {
                source.consecutive_drops = drops;
                source.backoff().as_millis()
            })
            .collect();
        assert_eq!(delays, vec![100, 200, 350, 350]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pull_source_emits_changed_officers() {
        let (store, fanout) = setup(4);
        touch(&store, "A-1", 1);
        touch(&store, "B-2", 1);
        let mut source = PullSource::new(fanout, Duration::from_secs(3));

        assert_eq!(officer_of(source.next_message().await.unwrap()), "A-1");
        assert_eq!(officer_of(source.next_message().await.unwrap()), "B-2");

        // Only B-2 moves before the next poll
        touch(&store, "B-2", 2);
        assert_eq!(officer_of(source.next_message().await.unwrap()), "B-2");
    }
}
