//! Tweet Stream Relay Binary
//!
//! Starts the filtered-stream relay and its HTTP server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin tweet-stream-relay
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `TWITTER_BEARER_TOKEN`: Provider bearer token
//!
//! ## Optional
//! - `PORT`: HTTP port (default: 3000)
//! - `STREAM_RULES`: `;`-separated rules, `value::tag` sets a tag (default: cars)
//! - `RECONCILE_MODE`: connection | startup (default: connection)
//! - `TWITTER_API_BASE_URL`: Provider base URL (default: <https://api.twitter.com>)
//! - `STREAM_TWEET_FIELDS`: `tweet.fields` query value (default: public_metrics)
//! - `STREAM_EXPANSIONS`: `expansions` query value (default: author_id)
//! - `CLIENT_PAGE_PATH`: HTML file served at `/` instead of the built-in page
//! - `RELAY_*`: Timeouts, backoff and buffer sizes
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: tweet-stream-relay)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tweet_stream_relay::infrastructure::telemetry;
use tweet_stream_relay::{
    AppState, BroadcastConfig, BroadcastHub, ClientPage, HttpServer, ReconcileMode, RelayConfig,
    RelayEvent, RelayHandle, RelayState, RulesClient, SessionBootstrap, StreamRelay,
    StreamRelayConfig, forward_relay_events, init_metrics,
};

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Relay event channel capacity.
const RELAY_EVENT_BUFFER: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        bail!("failed to install rustls crypto provider");
    }

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting tweet stream relay");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = RelayConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let client_page = ClientPage::load(config.server.client_page_path.as_deref()).await?;

    let shutdown_token = CancellationToken::new();
    let fatal_token = CancellationToken::new();

    // Fan-out side
    let broadcast_hub = Arc::new(BroadcastHub::new(BroadcastConfig::from(
        config.broadcast.clone(),
    )));
    let relay_state = Arc::new(RelayState::new());

    // Stream relay, started once by the bootstrap
    let (relay_tx, relay_rx) = mpsc::channel::<RelayEvent>(RELAY_EVENT_BUFFER);
    let relay = StreamRelay::new(
        StreamRelayConfig::from_config(&config),
        relay_tx,
        shutdown_token.clone(),
    )
    .context("failed to build stream client")?;
    let relay_handle = Arc::new(RelayHandle::new(Arc::new(relay)));

    let rules_client = Arc::new(RulesClient::new(&config).context("failed to build rules client")?);
    let bootstrap = Arc::new(SessionBootstrap::new(
        rules_client,
        relay_handle,
        config.rules.clone(),
        config.reconcile_mode,
        fatal_token.clone(),
    ));

    // Spawn relay event handler
    let fanout_hub = Arc::clone(&broadcast_hub);
    let fanout_state = Arc::clone(&relay_state);
    tokio::spawn(async move {
        forward_relay_events(relay_rx, fanout_hub, fanout_state).await;
    });

    // Spawn HTTP server
    let app_state = Arc::new(AppState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&broadcast_hub),
        Arc::clone(&relay_state),
        Arc::clone(&bootstrap),
        client_page,
        shutdown_token.clone(),
    ));
    let http_server = HttpServer::new(config.server.port, app_state, shutdown_token.clone());
    let server_fatal = fatal_token.clone();
    let server_task = tokio::spawn(async move {
        if let Err(e) = http_server.run().await {
            tracing::error!(error = %e, "HTTP server error");
            server_fatal.cancel();
        }
    });

    if config.reconcile_mode == ReconcileMode::Startup {
        let startup = Arc::clone(&bootstrap);
        tokio::spawn(async move {
            // Failures are logged and cancel the fatal token.
            let _ = startup.run().await;
        });
    }

    tracing::info!(port = config.server.port, "Tweet stream relay ready");

    let failed = tokio::select! {
        () = await_shutdown() => false,
        () = fatal_token.cancelled() => true,
    };

    shutdown_token.cancel();
    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, server_task)
        .await
        .is_err()
    {
        tracing::warn!("HTTP server did not stop in time");
    }

    if failed {
        bail!("fatal error, relay stopped");
    }

    tracing::info!("Tweet stream relay stopped");
    Ok(())
}

/// Load `.env` from the working directory or the nearest ancestor.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    let rules: Vec<&str> = config.rules.rules().iter().map(|r| r.value.as_str()).collect();
    tracing::info!(
        port = config.server.port,
        reconcile_mode = config.reconcile_mode.as_str(),
        rules = ?rules,
        broadcast_capacity = config.broadcast.capacity,
        "Configuration loaded"
    );
    tracing::debug!(
        rules_url = %config.rules_url(),
        stream_url = %config.stream_url(),
        "Provider endpoints"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
