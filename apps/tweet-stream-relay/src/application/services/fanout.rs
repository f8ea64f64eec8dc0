//! Relay Event Fan-out
//!
//! Consumes relay events, keeps [`RelayState`] current and broadcasts each
//! record to the connected subscribers.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::domain::streaming::{RelayPhase, RelayState};
use crate::infrastructure::broadcast::BroadcastHub;
use crate::infrastructure::metrics;
use crate::infrastructure::twitter::RelayEvent;

/// Forward relay events until the relay drops its sender.
pub async fn forward_relay_events(
    mut rx: mpsc::Receiver<RelayEvent>,
    broadcast_hub: Arc<BroadcastHub>,
    relay_state: Arc<RelayState>,
) {
    while let Some(event) = rx.recv().await {
        handle_event(event, &broadcast_hub, &relay_state);
    }
    tracing::debug!("Relay event channel closed");
}

fn handle_event(event: RelayEvent, broadcast_hub: &BroadcastHub, relay_state: &RelayState) {
    match event {
        RelayEvent::Connecting => {
            relay_state.set_phase(RelayPhase::Connecting);
        }
        RelayEvent::Connected => {
            relay_state.set_phase(RelayPhase::Streaming);
            tracing::info!("Filtered stream connected");
        }
        RelayEvent::Record(record) => {
            relay_state.increment_records();
            let post_id = record.post_id().map(ToOwned::to_owned);
            match broadcast_hub.broadcast(record) {
                Some(receivers) => {
                    metrics::record_records_broadcast(receivers as u64);
                    tracing::trace!(post_id = ?post_id, receivers, "Record broadcast");
                }
                None => tracing::trace!(post_id = ?post_id, "Record dropped, no subscribers"),
            }
        }
        RelayEvent::Disconnected { reason } => {
            relay_state.set_phase(RelayPhase::Disconnected);
            relay_state.set_error(reason);
        }
        RelayEvent::Reconnecting { attempt, delay } => {
            relay_state.increment_reconnect_attempts();
            tracing::debug!(attempt, delay_ms = delay.as_millis(), "Relay reconnecting");
        }
        RelayEvent::Stopped => {
            relay_state.set_phase(RelayPhase::Stopped);
            tracing::warn!("Filtered stream relay stopped");
        }
    }
}
