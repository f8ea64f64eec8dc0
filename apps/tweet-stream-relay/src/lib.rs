#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Tweet Stream Relay - Filtered Stream Fan-out
//!
//! Resets the provider's filtered-stream rules to a configured list, holds
//! a single connection to the filtered stream and pushes every record to
//! connected browsers over Server-Sent Events.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `rules`: Filter rules, desired rule lists, provider snapshots
//!   - `streaming`: Stream records and relay connection state
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Interfaces for the rule API and the relay launcher
//!   - `services`: Session bootstrap, relay event fan-out
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `twitter`: Rule client, stream relay, record codec, backoff
//!   - `broadcast`: Channel-based record distribution
//!   - `http`: Client page, SSE push channel, health and metrics
//!   - `config`: Environment configuration
//!
//! # Data Flow
//!
//! ```text
//!                    list / delete / add
//!  Session Bootstrap ───────────────────► Rule endpoint
//!         │ launch once
//!         ▼
//!   Stream Relay ──► Fan-out ──► Broadcast Hub ──► SSE /stream ──► Browser 1
//!  (filtered stream)                            └──► SSE /stream ──► Browser N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core relay types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::rules::{DesiredRules, Rule, RuleSet};
pub use domain::streaming::{RelayPhase, RelayState, StreamRecord};

// Application services
pub use application::ports::{RelayLauncher, RulesPort};
pub use application::services::{
    BootstrapError, BootstrapPhase, ReconcileReport, SessionBootstrap, forward_relay_events,
};

// Infrastructure config
pub use infrastructure::config::{
    ApiSettings, BroadcastSettings, ConfigError, Credentials, ReconcileMode, RelayConfig,
    ServerSettings, StreamSettings,
};

// Provider clients
pub use infrastructure::twitter::{
    RelayError, RelayEvent, RelayHandle, RulesClient, StreamRelay, StreamRelayConfig,
    TransportError,
};

// HTTP server
pub use infrastructure::http::{AppState, ClientPage, HttpServer, HttpServerError, TWEET_EVENT};

// Broadcast hub (for integration tests)
pub use infrastructure::broadcast::{
    BroadcastConfig, BroadcastHub, BroadcastStats, SharedBroadcastHub,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
