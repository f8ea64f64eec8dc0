//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `SessionBootstrap`: rule reconciliation and one-time relay start
//! - `forward_relay_events`: relay events into relay state and the broadcast hub

pub mod bootstrap;
pub mod fanout;

pub use bootstrap::{BootstrapError, BootstrapPhase, ReconcileReport, SessionBootstrap};
pub use fanout::forward_relay_events;
