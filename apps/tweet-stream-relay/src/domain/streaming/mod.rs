//! Stream Record Types
//!
//! Core domain types for the filtered stream: the opaque record passed
//! through to subscribers and the relay connection state.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Stream Record
// =============================================================================

/// One record from the filtered stream.
///
/// The payload is never interpreted beyond JSON parsing; it is forwarded to
/// subscribers exactly as received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamRecord(serde_json::Value);

impl StreamRecord {
    /// Wrap a parsed JSON value.
    #[must_use]
    pub const fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Borrow the JSON payload.
    #[must_use]
    pub const fn payload(&self) -> &serde_json::Value {
        &self.0
    }

    /// Take the JSON payload.
    #[must_use]
    pub fn into_payload(self) -> serde_json::Value {
        self.0
    }

    /// Post id, when the record is a post envelope (`data.id`).
    #[must_use]
    pub fn post_id(&self) -> Option<&str> {
        self.0.pointer("/data/id").and_then(serde_json::Value::as_str)
    }
}

impl From<serde_json::Value> for StreamRecord {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

// =============================================================================
// Relay State
// =============================================================================

/// Connection phase of the stream relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayPhase {
    /// Relay has not been started.
    #[default]
    Idle,
    /// Opening the streaming connection.
    Connecting,
    /// Connected and receiving records.
    Streaming,
    /// Connection lost; waiting to reconnect.
    Disconnected,
    /// Relay gave up or was stopped.
    Stopped,
}

impl RelayPhase {
    /// Get the phase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Disconnected => "disconnected",
            Self::Stopped => "stopped",
        }
    }
}

/// Tracks the state of the upstream stream connection.
#[derive(Debug, Default)]
pub struct RelayState {
    phase: parking_lot::RwLock<RelayPhase>,
    last_connected_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
    error_message: parking_lot::RwLock<Option<String>>,
    reconnect_attempts: AtomicU32,
    records_received: AtomicU64,
}

impl RelayState {
    /// Create a new idle state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection phase.
    pub fn set_phase(&self, phase: RelayPhase) {
        *self.phase.write() = phase;
        if phase == RelayPhase::Streaming {
            *self.last_connected_at.write() = Some(Utc::now());
            self.reconnect_attempts.store(0, Ordering::Relaxed);
            *self.error_message.write() = None;
        }
    }

    /// Record the last error seen by the relay.
    pub fn set_error(&self, message: String) {
        *self.error_message.write() = Some(message);
    }

    /// Increment reconnect attempts.
    pub fn increment_reconnect_attempts(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment records received counter.
    pub fn increment_records(&self) {
        self.records_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current phase.
    #[must_use]
    pub fn phase(&self) -> RelayPhase {
        *self.phase.read()
    }

    /// Get the last time the relay reached the streaming phase.
    #[must_use]
    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        *self.last_connected_at.read()
    }

    /// Get the last error message.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.error_message.read().clone()
    }

    /// Get reconnect attempts since the last successful connection.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Get records received count.
    #[must_use]
    pub fn records_received(&self) -> u64 {
        self.records_received.load(Ordering::Relaxed)
    }
}
