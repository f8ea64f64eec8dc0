//! Relay Configuration Settings
//!
//! Configuration types for the relay, loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::domain::rules::DesiredRules;

/// Default provider API base URL.
pub const DEFAULT_API_BASE_URL: &str = "https://api.twitter.com";

/// When the remote rule set is reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconcileMode {
    /// Reconcile on every new subscriber connection.
    #[default]
    PerConnection,
    /// Reconcile once at process start.
    Startup,
}

impl ReconcileMode {
    /// Parse mode from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "startup" => Self::Startup,
            _ => Self::PerConnection,
        }
    }

    /// Get the mode name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PerConnection => "connection",
            Self::Startup => "startup",
        }
    }
}

/// Provider API credentials.
#[derive(Clone)]
pub struct Credentials {
    bearer_token: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(bearer_token: String) -> Self {
        Self { bearer_token }
    }

    /// Get the bearer token.
    #[must_use]
    pub fn bearer_token(&self) -> &str {
        &self.bearer_token
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("bearer_token", &"[REDACTED]")
            .finish()
    }
}

/// Provider API settings.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    /// Base URL of the provider API.
    pub base_url: String,
    /// `tweet.fields` requested on the stream.
    pub tweet_fields: String,
    /// `expansions` requested on the stream.
    pub expansions: String,
    /// Timeout for rule-management calls.
    pub request_timeout: Duration,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            tweet_fields: "public_metrics".to_string(),
            expansions: "author_id".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Stream connection settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Longest silence on the stream before the connection counts as lost.
    pub stall_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Largest record the decoder will buffer.
    pub max_record_bytes: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            stall_timeout: Duration::from_secs(60),
            reconnect_delay_initial: Duration::from_millis(1000),
            reconnect_delay_max: Duration::from_secs(64),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0, // Unlimited
            max_record_bytes: 1024 * 1024,
        }
    }
}

/// Broadcast channel settings.
#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    /// Capacity of the record broadcast channel.
    pub capacity: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// HTTP listen port.
    pub port: u16,
    /// Client page to serve instead of the embedded one.
    pub client_page_path: Option<PathBuf>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 3000,
            client_page_path: None,
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// API credentials.
    pub credentials: Credentials,
    /// Rule list the remote rule set is reset to.
    pub rules: DesiredRules,
    /// When reconciliation runs.
    pub reconcile_mode: ReconcileMode,
    /// Provider API settings.
    pub api: ApiSettings,
    /// Stream connection settings.
    pub stream: StreamSettings,
    /// Broadcast channel settings.
    pub broadcast: BroadcastSettings,
    /// HTTP server settings.
    pub server: ServerSettings,
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the bearer token is missing or empty, or if
    /// `STREAM_RULES` is set but holds no rule.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bearer_token = lookup("TWITTER_BEARER_TOKEN")
            .ok_or_else(|| ConfigError::MissingEnvVar("TWITTER_BEARER_TOKEN".to_string()))?;

        if bearer_token.trim().is_empty() {
            return Err(ConfigError::EmptyValue("TWITTER_BEARER_TOKEN".to_string()));
        }

        let rules = match lookup("STREAM_RULES") {
            Some(raw) => DesiredRules::parse(&raw)
                .ok_or_else(|| ConfigError::InvalidRules(raw))?,
            None => DesiredRules::default(),
        };

        let reconcile_mode = lookup("RECONCILE_MODE")
            .map(|s| ReconcileMode::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let api_defaults = ApiSettings::default();
        let api = ApiSettings {
            base_url: lookup("TWITTER_API_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(api_defaults.base_url),
            tweet_fields: lookup("STREAM_TWEET_FIELDS").unwrap_or(api_defaults.tweet_fields),
            expansions: lookup("STREAM_EXPANSIONS").unwrap_or(api_defaults.expansions),
            request_timeout: parse_duration_secs(
                &lookup,
                "RELAY_REQUEST_TIMEOUT_SECS",
                api_defaults.request_timeout,
            ),
        };

        let stream_defaults = StreamSettings::default();
        let stream = StreamSettings {
            stall_timeout: parse_duration_secs(
                &lookup,
                "RELAY_STALL_TIMEOUT_SECS",
                stream_defaults.stall_timeout,
            ),
            reconnect_delay_initial: parse_duration_millis(
                &lookup,
                "RELAY_RECONNECT_DELAY_INITIAL_MS",
                stream_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_duration_secs(
                &lookup,
                "RELAY_RECONNECT_DELAY_MAX_SECS",
                stream_defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_or(
                &lookup,
                "RELAY_RECONNECT_DELAY_MULTIPLIER",
                stream_defaults.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: parse_or(
                &lookup,
                "RELAY_MAX_RECONNECT_ATTEMPTS",
                stream_defaults.max_reconnect_attempts,
            ),
            max_record_bytes: parse_or(
                &lookup,
                "RELAY_MAX_RECORD_BYTES",
                stream_defaults.max_record_bytes,
            ),
        };

        let broadcast = BroadcastSettings {
            capacity: parse_or(
                &lookup,
                "RELAY_BROADCAST_CAPACITY",
                BroadcastSettings::default().capacity,
            )
            .max(1),
        };

        let server = ServerSettings {
            port: parse_or(&lookup, "PORT", ServerSettings::default().port),
            client_page_path: lookup("CLIENT_PAGE_PATH")
                .filter(|path| !path.trim().is_empty())
                .map(PathBuf::from),
        };

        Ok(Self {
            credentials: Credentials::new(bearer_token),
            rules,
            reconcile_mode,
            api,
            stream,
            broadcast,
            server,
        })
    }

    /// Get the rule-management endpoint URL.
    #[must_use]
    pub fn rules_url(&self) -> String {
        format!("{}/2/tweets/search/stream/rules", self.api.base_url)
    }

    /// Get the filtered-stream endpoint URL.
    #[must_use]
    pub fn stream_url(&self) -> String {
        format!("{}/2/tweets/search/stream", self.api.base_url)
    }

    /// Get the field selection sent with the stream request, unencoded.
    #[must_use]
    pub fn stream_query(&self) -> Vec<(String, String)> {
        vec![
            ("tweet.fields".to_string(), self.api.tweet_fields.clone()),
            ("expansions".to_string(), self.api.expansions.clone()),
        ]
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Rule list holds no usable rule.
    #[error("STREAM_RULES holds no rule: {0:?}")]
    InvalidRules(String),
    /// `CLIENT_PAGE_PATH` cannot be read.
    #[error("cannot read client page {path}: {reason}")]
    ClientPage {
        /// Configured path.
        path: PathBuf,
        /// I/O error text.
        reason: String,
    },
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_duration_secs<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
