//! Broadcast Channel Adapter
//!
//! Fans stream records out to every connected subscriber using a tokio
//! broadcast channel.
//!
//! # Delivery
//!
//! Delivery is at-most-once with no replay: a subscriber only sees records
//! sent after it subscribed, and a subscriber that falls more than the
//! channel capacity behind skips the records it missed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;

use crate::BroadcastSettings;
use crate::domain::streaming::StreamRecord;

// =============================================================================
// Broadcast Message
// =============================================================================

/// Record broadcast message.
#[derive(Debug, Clone)]
pub struct TweetBroadcast {
    /// The streamed record.
    pub record: Arc<StreamRecord>,
}

// =============================================================================
// Broadcast Hub
// =============================================================================

/// Configuration for the broadcast channel.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Channel capacity; slower subscribers lag past this many records.
    pub capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

impl From<BroadcastSettings> for BroadcastConfig {
    fn from(settings: BroadcastSettings) -> Self {
        Self {
            capacity: settings.capacity,
        }
    }
}

/// Fan-out hub for stream records.
///
/// # Example
///
/// ```rust
/// use tweet_stream_relay::infrastructure::broadcast::BroadcastHub;
///
/// let hub = BroadcastHub::with_defaults();
///
/// // One receiver per connected subscriber
/// let mut rx = hub.tweets_rx();
///
/// // The relay side broadcasts each record
/// // hub.broadcast(record);
/// ```
#[derive(Debug)]
pub struct BroadcastHub {
    tweets_tx: broadcast::Sender<TweetBroadcast>,
    records_sent: AtomicU64,
}

impl BroadcastHub {
    /// Create a new broadcast hub with the given configuration.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            tweets_tx: broadcast::channel(config.capacity.max(1)).0,
            records_sent: AtomicU64::new(0),
        }
    }

    /// Create a new broadcast hub with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BroadcastConfig::default())
    }

    /// Send a record to every current subscriber.
    ///
    /// Returns the number of receivers that got the record, or `None`
    /// if nobody is subscribed.
    #[must_use]
    pub fn broadcast(&self, record: StreamRecord) -> Option<usize> {
        let receivers = self
            .tweets_tx
            .send(TweetBroadcast {
                record: Arc::new(record),
            })
            .ok()?;
        self.records_sent.fetch_add(1, Ordering::Relaxed);
        Some(receivers)
    }

    /// Get a new receiver for records.
    #[must_use]
    pub fn tweets_rx(&self) -> broadcast::Receiver<TweetBroadcast> {
        self.tweets_tx.subscribe()
    }

    /// Get the number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tweets_tx.receiver_count()
    }

    /// Get statistics about the channel.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            receivers: self.receiver_count(),
            records_sent: self.records_sent.load(Ordering::Relaxed),
        }
    }
}

/// Shared broadcast hub reference.
pub type SharedBroadcastHub = Arc<BroadcastHub>;

/// Statistics about the broadcast channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Number of receivers.
    pub receivers: usize,
    /// Records sent while at least one receiver was subscribed.
    pub records_sent: u64,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(n: u64) -> StreamRecord {
        StreamRecord::new(json!({"data": {"id": n.to_string(), "text": "vroom"}}))
    }

    #[test]
    fn hub_starts_empty() {
        let hub = BroadcastHub::with_defaults();
        assert_eq!(hub.stats(), BroadcastStats::default());
    }

    #[test]
    fn receiver_count_follows_subscribers() {
        let hub = BroadcastHub::with_defaults();
        let rx1 = hub.tweets_rx();
        let _rx2 = hub.tweets_rx();
        assert_eq!(hub.receiver_count(), 2);

        drop(rx1);
        assert_eq!(hub.receiver_count(), 1);
    }

    #[test]
    fn broadcast_without_subscribers_returns_none() {
        let hub = BroadcastHub::with_defaults();
        assert!(hub.broadcast(record(1)).is_none());
        assert_eq!(hub.stats().records_sent, 0);
    }

    #[tokio::test]
    async fn every_subscriber_gets_the_record() {
        let hub = BroadcastHub::with_defaults();
        let mut rx1 = hub.tweets_rx();
        let mut rx2 = hub.tweets_rx();

        assert_eq!(hub.broadcast(record(7)), Some(2));

        let r1 = rx1.recv().await.unwrap();
        let r2 = rx2.recv().await.unwrap();
        assert_eq!(r1.record.post_id(), Some("7"));
        assert_eq!(*r1.record, *r2.record);
        assert_eq!(hub.stats().records_sent, 1);
    }

    #[tokio::test]
    async fn late_subscriber_gets_no_backlog() {
        let hub = BroadcastHub::with_defaults();
        let _early = hub.tweets_rx();
        let _ = hub.broadcast(record(1));

        let mut late = hub.tweets_rx();
        let _ = hub.broadcast(record(2));

        let received = late.recv().await.unwrap();
        assert_eq!(received.record.post_id(), Some("2"));
        assert!(late.try_recv().is_err());
    }

    #[tokio::test]
    async fn slow_subscriber_lags() {
        let hub = BroadcastHub::new(BroadcastConfig { capacity: 2 });
        let mut rx = hub.tweets_rx();
        for n in 0..5 {
            let _ = hub.broadcast(record(n));
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        assert_eq!(rx.recv().await.unwrap().record.post_id(), Some("3"));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let hub = BroadcastHub::new(BroadcastConfig { capacity: 0 });
        let _rx = hub.tweets_rx();
        assert_eq!(hub.broadcast(record(1)), Some(1));
    }
}
