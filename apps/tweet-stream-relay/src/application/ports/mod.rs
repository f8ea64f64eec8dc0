//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `RulesPort`: the provider's rule-management endpoint
//! - `RelayLauncher`: starts the single filtered-stream relay

use async_trait::async_trait;

use crate::domain::rules::{DesiredRules, RuleSet};
use crate::infrastructure::twitter::TransportError;

/// Rule-management operations against the stream provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RulesPort: Send + Sync {
    /// Fetch the rules currently registered with the provider.
    async fn list_rules(&self) -> Result<RuleSet, TransportError>;

    /// Delete every rule in `rule_set` with one batch request.
    ///
    /// Returns `Ok(None)` without contacting the provider when the snapshot
    /// carries no rule list.
    async fn delete_rules(&self, rule_set: &RuleSet) -> Result<Option<RuleSet>, TransportError>;

    /// Register the desired rules with one batch request.
    async fn add_rules(&self, desired: &DesiredRules) -> Result<RuleSet, TransportError>;
}

/// Starts the stream relay.
#[cfg_attr(test, mockall::automock)]
pub trait RelayLauncher: Send + Sync {
    /// Start the relay if it is not running yet.
    ///
    /// Returns `true` only for the call that actually started it.
    fn launch(&self) -> bool;

    /// Whether the relay has been started.
    fn is_launched(&self) -> bool;
}
