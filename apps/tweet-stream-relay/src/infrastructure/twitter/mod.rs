//! Filtered-Stream Provider Adapters
//!
//! HTTP clients for the provider's rule-management and streaming endpoints.
//!
//! # Components
//!
//! - `rules`: list, delete and add filter rules
//! - `stream`: long-lived streaming connection with reconnection
//! - `codec`: newline-delimited JSON record decoding
//! - `reconnect`: exponential backoff policy
//! - `error`: transport errors shared by both clients

pub mod codec;
pub mod error;
pub mod reconnect;
pub mod rules;
pub mod stream;

pub use codec::{ParseError, RecordDecoder};
pub use error::TransportError;
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use rules::RulesClient;
pub use stream::{RelayError, RelayEvent, RelayHandle, StreamRelay, StreamRelayConfig};
