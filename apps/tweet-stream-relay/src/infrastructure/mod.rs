//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Filtered-stream provider clients (rules, stream, codec).
pub mod twitter;

/// Broadcast channel adapter for record distribution.
pub mod broadcast;

/// Configuration loading.
pub mod config;

/// HTTP server: client page, SSE push channel, health and metrics.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
