//! Configuration Module
//!
//! Configuration loading for the relay service.

mod settings;

pub use settings::{
    ApiSettings, BroadcastSettings, ConfigError, Credentials, DEFAULT_API_BASE_URL,
    ReconcileMode, RelayConfig, ServerSettings, StreamSettings,
};
