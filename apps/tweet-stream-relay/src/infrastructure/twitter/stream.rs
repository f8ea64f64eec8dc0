//! Filtered-Stream Relay
//!
//! Holds the one long-lived connection to the provider's filtered stream,
//! decodes its body into records and hands them on as [`RelayEvent`]s.
//!
//! # Lifecycle
//!
//! ```text
//! Connecting ──► Streaming ──► Disconnected ──(backoff)──► Connecting
//!      │                             │
//!      └──── max attempts ───────────┴──► Stopped
//! ```
//!
//! A connection counts as lost when the body ends, the transport fails or
//! no bytes arrive within the stall timeout.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::{Client, Response, StatusCode};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::codec::{ParseError, RecordDecoder};
use super::error::TransportError;
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::rules::USER_AGENT;
use crate::application::ports::RelayLauncher;
use crate::domain::streaming::StreamRecord;
use crate::infrastructure::config::{Credentials, RelayConfig};
use crate::infrastructure::metrics::{self, DiscardReason};

/// Header carrying the epoch second at which the rate-limit window resets.
const RATE_LIMIT_RESET_HEADER: &str = "x-rate-limit-reset";

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end one streaming connection.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The request or body read failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The provider answered 429.
    #[error("rate limited by provider")]
    RateLimited {
        /// Epoch second at which the window resets, if the provider said.
        reset_epoch_secs: Option<i64>,
    },

    /// No bytes arrived within the stall timeout.
    #[error("stream stalled for {0:?}")]
    Stalled(Duration),

    /// The provider closed the response body.
    #[error("stream ended by provider")]
    Ended,

    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,

    /// Shutdown was requested before the connection opened.
    #[error("stream relay cancelled")]
    Cancelled,
}

impl RelayError {
    /// Metric label for the error.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Transport(TransportError::Status { .. }) => "status",
            Self::Transport(_) => "transport",
            Self::RateLimited { .. } => "rate_limited",
            Self::Stalled(_) => "stalled",
            Self::Ended => "ended",
            Self::MaxReconnectAttemptsExceeded => "max_attempts",
            Self::Cancelled => "cancelled",
        }
    }
}

// =============================================================================
// Relay Events
// =============================================================================

/// Events emitted by the stream relay.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// Opening the streaming connection.
    Connecting,
    /// The provider accepted the connection.
    Connected,
    /// One decoded record.
    Record(StreamRecord),
    /// The connection was lost.
    Disconnected {
        /// Why the connection ended.
        reason: String,
    },
    /// Waiting before the next connection attempt.
    Reconnecting {
        /// Reconnection attempt number.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// The relay stopped for good.
    Stopped,
}

// =============================================================================
// Relay Configuration
// =============================================================================

/// Configuration for the stream relay.
#[derive(Debug, Clone)]
pub struct StreamRelayConfig {
    /// Streaming endpoint without query parameters.
    pub url: String,
    /// Query parameters, encoded when the request is built.
    pub query: Vec<(String, String)>,
    /// Bearer credential.
    pub credentials: Credentials,
    /// Timeout for establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Longest silence before the connection counts as lost.
    pub stall_timeout: Duration,
    /// Largest record the decoder will buffer.
    pub max_record_bytes: usize,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
}

impl StreamRelayConfig {
    /// Build the relay configuration from the process configuration.
    #[must_use]
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            url: config.stream_url(),
            query: config.stream_query(),
            credentials: config.credentials.clone(),
            connect_timeout: config.api.request_timeout,
            stall_timeout: config.stream.stall_timeout,
            max_record_bytes: config.stream.max_record_bytes,
            reconnect: ReconnectConfig::from(&config.stream),
        }
    }
}

// =============================================================================
// Stream Relay
// =============================================================================

/// Filtered-stream client with supervised reconnection.
#[derive(Debug)]
pub struct StreamRelay {
    config: StreamRelayConfig,
    client: Client,
    event_tx: mpsc::Sender<RelayEvent>,
    cancel: CancellationToken,
}

impl StreamRelay {
    /// Create a new stream relay.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ClientInit`] if the HTTP client cannot be built.
    pub fn new(
        config: StreamRelayConfig,
        event_tx: mpsc::Sender<RelayEvent>,
        cancel: CancellationToken,
    ) -> Result<Self, TransportError> {
        // No overall timeout: the response body stays open indefinitely.
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| TransportError::ClientInit(e.to_string()))?;

        Ok(Self {
            config,
            client,
            event_tx,
            cancel,
        })
    }

    /// Run the relay until cancelled or out of reconnection attempts.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::MaxReconnectAttemptsExceeded`] once the
    /// reconnection policy gives up.
    pub async fn run(self: Arc<Self>) -> Result<(), RelayError> {
        let result = self.supervise().await;
        metrics::set_stream_connected(false);
        let _ = self.event_tx.send(RelayEvent::Stopped).await;
        result
    }

    async fn supervise(&self) -> Result<(), RelayError> {
        let mut reconnect_policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Stream relay cancelled");
                return Ok(());
            }

            let error = match self.connect_and_pump(&mut reconnect_policy).await {
                Ok(()) | Err(RelayError::Cancelled) => continue,
                Err(e) => e,
            };

            tracing::warn!(error = %error, kind = error.kind(), "Filtered stream disconnected");
            metrics::set_stream_connected(false);
            metrics::record_stream_error(error.kind());
            let _ = self
                .event_tx
                .send(RelayEvent::Disconnected {
                    reason: error.to_string(),
                })
                .await;

            let delay = match &error {
                RelayError::RateLimited { reset_epoch_secs } => reconnect_policy
                    .next_rate_limited_delay(*reset_epoch_secs, chrono::Utc::now().timestamp()),
                _ => reconnect_policy.next_delay(),
            };
            let Some(delay) = delay else {
                tracing::error!(
                    attempts = reconnect_policy.attempt_count(),
                    "Giving up on the filtered stream"
                );
                return Err(RelayError::MaxReconnectAttemptsExceeded);
            };

            let attempt = reconnect_policy.attempt_count();
            tracing::info!(
                attempt,
                delay_ms = delay.as_millis(),
                "Reconnecting to filtered stream"
            );
            metrics::record_reconnect();
            let _ = self
                .event_tx
                .send(RelayEvent::Reconnecting { attempt, delay })
                .await;

            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("Stream relay cancelled during reconnect delay");
                    return Ok(());
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One connection: open, then forward records until it ends.
    async fn connect_and_pump(&self, policy: &mut ReconnectPolicy) -> Result<(), RelayError> {
        let _ = self.event_tx.send(RelayEvent::Connecting).await;
        let response = self.open().await?;

        tracing::info!("Connected to filtered stream");
        policy.reset();
        metrics::set_stream_connected(true);
        let _ = self.event_tx.send(RelayEvent::Connected).await;

        let event_tx = self.event_tx.clone();
        self.pump(response, move |record| {
            let event_tx = event_tx.clone();
            async move {
                let _ = event_tx.send(RelayEvent::Record(record)).await;
            }
        })
        .await
    }

    /// Open one connection and invoke `on_record` for every decoded record.
    ///
    /// Malformed input is skipped. Returns `Ok(())` only when cancelled.
    ///
    /// # Errors
    ///
    /// Returns the [`RelayError`] that ended the connection.
    pub async fn stream_records<F, Fut>(&self, on_record: F) -> Result<(), RelayError>
    where
        F: FnMut(StreamRecord) -> Fut + Send,
        Fut: Future<Output = ()> + Send,
    {
        let response = match self.open().await {
            Ok(response) => response,
            Err(RelayError::Cancelled) => return Ok(()),
            Err(e) => return Err(e),
        };
        self.pump(response, on_record).await
    }

    async fn open(&self) -> Result<Response, RelayError> {
        let request = self
            .client
            .get(&self.config.url)
            .query(&self.config.query)
            .bearer_auth(self.config.credentials.bearer_token())
            .send();

        let response = tokio::select! {
            () = self.cancel.cancelled() => return Err(RelayError::Cancelled),
            sent = tokio::time::timeout(self.config.stall_timeout, request) => match sent {
                Ok(result) => result.map_err(TransportError::from)?,
                Err(_) => return Err(RelayError::Stalled(self.config.stall_timeout)),
            },
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(RelayError::RateLimited {
                reset_epoch_secs: rate_limit_reset(&response),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        Ok(response)
    }

    async fn pump<F, Fut>(&self, response: Response, mut on_record: F) -> Result<(), RelayError>
    where
        F: FnMut(StreamRecord) -> Fut + Send,
        Fut: Future<Output = ()> + Send,
    {
        let mut decoder = RecordDecoder::new(self.config.max_record_bytes);
        let mut body = response.bytes_stream();

        loop {
            let next = tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                next = tokio::time::timeout(self.config.stall_timeout, body.next()) => next,
            };

            let chunk = match next {
                Err(_) => return Err(RelayError::Stalled(self.config.stall_timeout)),
                Ok(None) => return Err(RelayError::Ended),
                Ok(Some(chunk)) => chunk.map_err(TransportError::from)?,
            };

            for outcome in decoder.push(&chunk) {
                match outcome {
                    Ok(record) => {
                        metrics::record_record_received();
                        on_record(record).await;
                    }
                    Err(e) => {
                        tracing::trace!(error = %e, "Discarding stream chunk");
                        metrics::record_record_discarded(match e {
                            ParseError::Json(_) => DiscardReason::Malformed,
                            ParseError::Oversized { .. } => DiscardReason::Oversized,
                        });
                    }
                }
            }
        }
    }
}

fn rate_limit_reset(response: &Response) -> Option<i64> {
    response
        .headers()
        .get(RATE_LIMIT_RESET_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

// =============================================================================
// Start-Once Handle
// =============================================================================

/// Starts the relay task at most once per process.
#[derive(Debug)]
pub struct RelayHandle {
    relay: Arc<StreamRelay>,
    launched: AtomicBool,
}

impl RelayHandle {
    /// Wrap a relay that has not been started yet.
    #[must_use]
    pub const fn new(relay: Arc<StreamRelay>) -> Self {
        Self {
            relay,
            launched: AtomicBool::new(false),
        }
    }
}

impl RelayLauncher for RelayHandle {
    fn launch(&self) -> bool {
        if self
            .launched
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Stream relay already running");
            return false;
        }

        let relay = Arc::clone(&self.relay);
        tokio::spawn(async move {
            if let Err(e) = relay.run().await {
                tracing::error!(error = %e, "Stream relay stopped");
            }
        });
        tracing::info!("Stream relay started");
        true
    }

    fn is_launched(&self) -> bool {
        self.launched.load(Ordering::Acquire)
    }
}

// =============================================================================
// Tests
// =============================================================================
