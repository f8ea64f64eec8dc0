//! Server-Sent Events Push Channel
//!
//! `GET /stream` keeps one event stream open per subscriber. Every record
//! from the broadcast hub is written as an event named `tweet` whose data
//! is the record JSON. The channel is one-way; subscribers never send.
//!
//! Opening a stream also triggers the session bootstrap. The broadcast
//! receiver is taken first so no record published after the relay starts
//! is missed by the subscriber that started it.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::{Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use uuid::Uuid;

use super::AppState;
use crate::infrastructure::broadcast::TweetBroadcast;
use crate::infrastructure::metrics;

/// SSE event name carrying a record.
pub const TWEET_EVENT: &str = "tweet";

/// Counts connected subscribers.
#[derive(Debug, Clone, Default)]
pub struct SubscriberRegistry {
    connected: Arc<AtomicUsize>,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber until the returned guard is dropped.
    #[must_use]
    pub fn register(&self) -> SubscriberGuard {
        let id = Uuid::new_v4();
        let count = self.connected.fetch_add(1, Ordering::SeqCst) + 1;
        update_gauge(count);
        tracing::info!(subscriber_id = %id, subscribers = count, "Subscriber connected");
        SubscriberGuard {
            id,
            connected: Arc::clone(&self.connected),
        }
    }

    /// Number of connected subscribers.
    #[must_use]
    pub fn count(&self) -> usize {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Keeps a subscriber registered while its stream is alive.
#[derive(Debug)]
pub struct SubscriberGuard {
    id: Uuid,
    connected: Arc<AtomicUsize>,
}

impl SubscriberGuard {
    /// Ephemeral subscriber id, used in logs only.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        let count = self.connected.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        update_gauge(count);
        tracing::info!(subscriber_id = %self.id, subscribers = count, "Subscriber disconnected");
    }
}

#[allow(clippy::cast_precision_loss)]
fn update_gauge(count: usize) {
    metrics::set_subscribers(count as f64);
}

/// `GET /stream`
pub async fn stream_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let rx = state.broadcast_hub.tweets_rx();
    let guard = state.subscribers.register();
    let subscriber_id = guard.id();

    let bootstrap = Arc::clone(&state.bootstrap);
    tokio::spawn(async move {
        if let Err(e) = bootstrap.on_subscriber_connected().await {
            tracing::error!(%subscriber_id, error = %e, "Bootstrap failed for subscriber");
        }
    });

    let events = BroadcastStream::new(rx)
        .filter_map(move |item| {
            let _ = &guard;
            std::future::ready(to_event(item, subscriber_id))
        })
        .take_until(state.shutdown.clone().cancelled_owned());

    Sse::new(events).keep_alive(KeepAlive::default())
}

fn to_event(
    item: Result<TweetBroadcast, BroadcastStreamRecvError>,
    subscriber_id: Uuid,
) -> Option<Result<Event, axum::Error>> {
    match item {
        Ok(broadcast) => Some(
            Event::default()
                .event(TWEET_EVENT)
                .json_data(broadcast.record.payload()),
        ),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            metrics::record_records_lagged(skipped);
            tracing::warn!(%subscriber_id, skipped, "Subscriber lagged, records skipped");
            None
        }
    }
}
