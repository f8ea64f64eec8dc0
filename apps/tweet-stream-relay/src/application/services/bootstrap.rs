//! Session Bootstrap
//!
//! Resets the provider's rule set to the configured rules and then starts
//! the stream relay.
//!
//! ```text
//! Idle ──► Listing ──► Deleting ──► Adding ──► Streaming
//!             │           │           │
//!             └───────────┴───────────┴──► Fatal
//! ```
//!
//! Reconciliations run one at a time behind an async mutex, so two
//! subscribers connecting together never interleave rule calls. A failed
//! step is not retried: the fatal token is cancelled and the process exits.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{RelayLauncher, RulesPort};
use crate::domain::rules::DesiredRules;
use crate::infrastructure::config::ReconcileMode;
use crate::infrastructure::metrics::{self, ReconcileOutcome};
use crate::infrastructure::twitter::TransportError;

/// Where the bootstrap currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BootstrapPhase {
    /// No reconciliation has run yet.
    #[default]
    Idle,
    /// Fetching the registered rules.
    Listing,
    /// Deleting the registered rules.
    Deleting,
    /// Adding the configured rules.
    Adding,
    /// Rules reconciled and relay started.
    Streaming,
    /// A rule call failed; the process is shutting down.
    Fatal,
}

impl BootstrapPhase {
    /// Get the phase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listing => "listing",
            Self::Deleting => "deleting",
            Self::Adding => "adding",
            Self::Streaming => "streaming",
            Self::Fatal => "fatal",
        }
    }
}

/// A rule call failed during reconciliation.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    /// Listing the registered rules failed.
    #[error("failed to list stream rules: {0}")]
    List(#[source] TransportError),

    /// Deleting the registered rules failed.
    #[error("failed to delete stream rules: {0}")]
    Delete(#[source] TransportError),

    /// Adding the configured rules failed.
    #[error("failed to add stream rules: {0}")]
    Add(#[source] TransportError),

    /// An earlier reconciliation failed; no rule calls were made.
    #[error("reconciliation halted after an earlier failure")]
    Halted,
}

impl BootstrapError {
    /// The phase that failed.
    #[must_use]
    pub const fn phase(&self) -> BootstrapPhase {
        match self {
            Self::List(_) => BootstrapPhase::Listing,
            Self::Delete(_) => BootstrapPhase::Deleting,
            Self::Add(_) => BootstrapPhase::Adding,
            Self::Halted => BootstrapPhase::Fatal,
        }
    }
}

/// Outcome of one successful reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Rules found and deleted.
    pub deleted: usize,
    /// Rules the provider reports as added.
    pub added: usize,
    /// Whether this reconciliation started the relay.
    pub relay_started: bool,
    /// Wall time of the three rule calls.
    pub duration: Duration,
}

/// Rule reconciliation followed by a one-time relay start.
pub struct SessionBootstrap {
    rules: Arc<dyn RulesPort>,
    relay: Arc<dyn RelayLauncher>,
    desired: DesiredRules,
    mode: ReconcileMode,
    gate: Mutex<()>,
    phase: parking_lot::RwLock<BootstrapPhase>,
    fatal: CancellationToken,
}

impl SessionBootstrap {
    /// Create a bootstrap. `fatal` is cancelled when a rule call fails.
    #[must_use]
    pub fn new(
        rules: Arc<dyn RulesPort>,
        relay: Arc<dyn RelayLauncher>,
        desired: DesiredRules,
        mode: ReconcileMode,
        fatal: CancellationToken,
    ) -> Self {
        Self {
            rules,
            relay,
            desired,
            mode,
            gate: Mutex::new(()),
            phase: parking_lot::RwLock::new(BootstrapPhase::Idle),
            fatal,
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> BootstrapPhase {
        *self.phase.read()
    }

    /// Configured reconcile mode.
    #[must_use]
    pub const fn mode(&self) -> ReconcileMode {
        self.mode
    }

    /// Token cancelled on a fatal failure.
    #[must_use]
    pub fn fatal_token(&self) -> CancellationToken {
        self.fatal.clone()
    }

    /// Hook for a newly connected subscriber.
    ///
    /// Reconciles in per-connection mode; does nothing in startup mode or
    /// once a previous reconciliation has failed.
    ///
    /// # Errors
    ///
    /// Returns the [`BootstrapError`] of a failed reconciliation.
    pub async fn on_subscriber_connected(&self) -> Result<Option<ReconcileReport>, BootstrapError> {
        if self.mode == ReconcileMode::Startup {
            return Ok(None);
        }
        match self.run().await {
            Ok(report) => Ok(Some(report)),
            Err(BootstrapError::Halted) => {
                tracing::debug!("Skipping reconciliation after fatal failure");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// List, delete and add rules, then start the relay if needed.
    ///
    /// # Errors
    ///
    /// Returns a [`BootstrapError`] naming the failed step. The fatal token
    /// is cancelled before returning. Returns [`BootstrapError::Halted`]
    /// without any rule call once the fatal token is cancelled, including
    /// when it was cancelled while this call waited for the gate.
    pub async fn run(&self) -> Result<ReconcileReport, BootstrapError> {
        let _guard = self.gate.lock().await;
        if self.fatal.is_cancelled() {
            return Err(BootstrapError::Halted);
        }
        let started = Instant::now();

        match self.reconcile(started).await {
            Ok(report) => {
                metrics::record_reconciliation(ReconcileOutcome::Success, report.duration);
                tracing::info!(
                    deleted = report.deleted,
                    added = report.added,
                    relay_started = report.relay_started,
                    duration_ms = report.duration.as_millis(),
                    "Stream rules reconciled"
                );
                Ok(report)
            }
            Err(e) => {
                metrics::record_reconciliation(ReconcileOutcome::Failure, started.elapsed());
                self.set_phase(BootstrapPhase::Fatal);
                tracing::error!(error = %e, phase = e.phase().as_str(), "Rule reconciliation failed");
                self.fatal.cancel();
                Err(e)
            }
        }
    }

    async fn reconcile(&self, started: Instant) -> Result<ReconcileReport, BootstrapError> {
        self.set_phase(BootstrapPhase::Listing);
        let current = self.rules.list_rules().await.map_err(BootstrapError::List)?;
        let deleted = current.rule_ids().map_or(0, |ids| ids.len());

        self.set_phase(BootstrapPhase::Deleting);
        self.rules
            .delete_rules(&current)
            .await
            .map_err(BootstrapError::Delete)?;

        self.set_phase(BootstrapPhase::Adding);
        let added = self
            .rules
            .add_rules(&self.desired)
            .await
            .map_err(BootstrapError::Add)?;
        let duration = started.elapsed();

        let relay_started = self.relay.launch();
        self.set_phase(BootstrapPhase::Streaming);

        Ok(ReconcileReport {
            deleted,
            added: added.rule_count(),
            relay_started,
            duration,
        })
    }

    fn set_phase(&self, phase: BootstrapPhase) {
        tracing::debug!(phase = phase.as_str(), "Bootstrap phase");
        *self.phase.write() = phase;
    }
}

impl std::fmt::Debug for SessionBootstrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBootstrap")
            .field("desired", &self.desired)
            .field("mode", &self.mode)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use mockall::Sequence;

    use super::*;
    use crate::application::ports::{MockRelayLauncher, MockRulesPort};
    use crate::domain::rules::{Rule, RuleSet};

    fn stale_rules() -> RuleSet {
        let mut rule = Rule::new("old");
        rule.id = Some("1".to_string());
        RuleSet::with_rules(vec![rule])
    }

    fn bootstrap(
        rules: impl RulesPort + 'static,
        relay: impl RelayLauncher + 'static,
        mode: ReconcileMode,
    ) -> SessionBootstrap {
        SessionBootstrap::new(
            Arc::new(rules),
            Arc::new(relay),
            DesiredRules::default(),
            mode,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn reconciles_in_order_then_starts_relay_once() {
        let mut seq = Sequence::new();
        let mut rules = MockRulesPort::new();
        let mut relay = MockRelayLauncher::new();

        rules
            .expect_list_rules()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(stale_rules()));
        rules
            .expect_delete_rules()
            .withf(|rule_set| rule_set.rule_ids() == Some(vec!["1".to_string()]))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Some(RuleSet::default())));
        rules
            .expect_add_rules()
            .withf(|desired| desired.rules() == [Rule::new("cars")])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(RuleSet::with_rules(vec![Rule::new("cars")])));
        relay
            .expect_launch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| true);

        let bootstrap = bootstrap(rules, relay, ReconcileMode::PerConnection);
        let report = bootstrap.on_subscriber_connected().await.unwrap().unwrap();

        assert_eq!(report.deleted, 1);
        assert_eq!(report.added, 1);
        assert!(report.relay_started);
        assert_eq!(bootstrap.phase(), BootstrapPhase::Streaming);
        assert!(!bootstrap.fatal_token().is_cancelled());
    }

    #[tokio::test]
    async fn list_failure_is_fatal_and_stops_there() {
        let mut rules = MockRulesPort::new();
        let mut relay = MockRelayLauncher::new();

        rules.expect_list_rules().times(1).returning(|| {
            Err(TransportError::Status {
                status: 401,
                body: "Unauthorized".to_string(),
            })
        });
        rules.expect_delete_rules().never();
        rules.expect_add_rules().never();
        relay.expect_launch().never();

        let bootstrap = bootstrap(rules, relay, ReconcileMode::PerConnection);
        let err = bootstrap.run().await.unwrap_err();

        assert!(matches!(err, BootstrapError::List(_)));
        assert_eq!(err.phase(), BootstrapPhase::Listing);
        assert_eq!(bootstrap.phase(), BootstrapPhase::Fatal);
        assert!(bootstrap.fatal_token().is_cancelled());
    }

    #[tokio::test]
    async fn add_failure_does_not_start_relay() {
        let mut rules = MockRulesPort::new();
        let mut relay = MockRelayLauncher::new();

        rules
            .expect_list_rules()
            .returning(|| Ok(RuleSet::default()));
        rules.expect_delete_rules().returning(|_| Ok(None));
        rules
            .expect_add_rules()
            .returning(|_| Err(TransportError::Network("connection reset".to_string())));
        relay.expect_launch().never();

        let bootstrap = bootstrap(rules, relay, ReconcileMode::PerConnection);
        let err = bootstrap.run().await.unwrap_err();
        assert_eq!(err.phase(), BootstrapPhase::Adding);
        assert!(bootstrap.fatal_token().is_cancelled());
    }

    #[tokio::test]
    async fn no_reconciliation_after_fatal() {
        let mut rules = MockRulesPort::new();
        rules
            .expect_list_rules()
            .times(1)
            .returning(|| Err(TransportError::Decode("bad".to_string())));

        let bootstrap = bootstrap(rules, MockRelayLauncher::new(), ReconcileMode::PerConnection);
        assert!(bootstrap.on_subscriber_connected().await.is_err());
        assert!(bootstrap.on_subscriber_connected().await.unwrap().is_none());
        assert!(matches!(bootstrap.run().await, Err(BootstrapError::Halted)));
        assert_eq!(bootstrap.phase(), BootstrapPhase::Fatal);
    }

    /// Rule port whose listing fails after a delay and counts every call.
    #[derive(Default)]
    struct SlowFailingRules {
        lists: AtomicUsize,
        other_calls: AtomicUsize,
    }

    #[async_trait]
    impl RulesPort for Arc<SlowFailingRules> {
        async fn list_rules(&self) -> Result<RuleSet, TransportError> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err(TransportError::Status {
                status: 500,
                body: "boom".to_string(),
            })
        }

        async fn delete_rules(&self, _: &RuleSet) -> Result<Option<RuleSet>, TransportError> {
            self.other_calls.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }

        async fn add_rules(&self, _: &DesiredRules) -> Result<RuleSet, TransportError> {
            self.other_calls.fetch_add(1, Ordering::SeqCst);
            Ok(RuleSet::default())
        }
    }

    #[tokio::test]
    async fn subscriber_queued_behind_failure_makes_no_rule_calls() {
        let rules = Arc::new(SlowFailingRules::default());
        let launcher = Arc::new(OnceLauncher(AtomicBool::new(false)));
        let bootstrap = Arc::new(SessionBootstrap::new(
            Arc::new(Arc::clone(&rules)),
            Arc::clone(&launcher) as Arc<dyn RelayLauncher>,
            DesiredRules::default(),
            ReconcileMode::PerConnection,
            CancellationToken::new(),
        ));

        let first = tokio::spawn({
            let bootstrap = Arc::clone(&bootstrap);
            async move { bootstrap.on_subscriber_connected().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = tokio::spawn({
            let bootstrap = Arc::clone(&bootstrap);
            async move { bootstrap.on_subscriber_connected().await }
        });

        assert!(matches!(first.await.unwrap(), Err(BootstrapError::List(_))));
        assert!(second.await.unwrap().unwrap().is_none());

        assert_eq!(rules.lists.load(Ordering::SeqCst), 1);
        assert_eq!(rules.other_calls.load(Ordering::SeqCst), 0);
        assert!(!launcher.is_launched());
        assert_eq!(bootstrap.phase(), BootstrapPhase::Fatal);
    }

    #[tokio::test]
    async fn startup_mode_ignores_subscribers() {
        let mut rules = MockRulesPort::new();
        rules.expect_list_rules().never();

        let bootstrap = bootstrap(rules, MockRelayLauncher::new(), ReconcileMode::Startup);
        assert!(bootstrap.on_subscriber_connected().await.unwrap().is_none());
        assert_eq!(bootstrap.phase(), BootstrapPhase::Idle);
    }

    /// Rule port that records how many calls overlap.
    #[derive(Default)]
    struct OverlapProbe {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
    }

    impl OverlapProbe {
        async fn call(&self) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl RulesPort for Arc<OverlapProbe> {
        async fn list_rules(&self) -> Result<RuleSet, TransportError> {
            self.call().await;
            Ok(stale_rules())
        }

        async fn delete_rules(&self, _: &RuleSet) -> Result<Option<RuleSet>, TransportError> {
            self.call().await;
            Ok(Some(RuleSet::default()))
        }

        async fn add_rules(&self, _: &DesiredRules) -> Result<RuleSet, TransportError> {
            self.call().await;
            Ok(RuleSet::default())
        }
    }

    struct OnceLauncher(AtomicBool);

    impl RelayLauncher for OnceLauncher {
        fn launch(&self) -> bool {
            !self.0.swap(true, Ordering::SeqCst)
        }

        fn is_launched(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn concurrent_reconciliations_never_interleave() {
        let probe = Arc::new(OverlapProbe::default());
        let bootstrap = Arc::new(bootstrap(
            Arc::clone(&probe),
            OnceLauncher(AtomicBool::new(false)),
            ReconcileMode::PerConnection,
        ));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let bootstrap = Arc::clone(&bootstrap);
                tokio::spawn(async move { bootstrap.on_subscriber_connected().await })
            })
            .collect();

        let mut started = 0;
        for task in tasks {
            let report = task.await.unwrap().unwrap().unwrap();
            if report.relay_started {
                started += 1;
            }
        }

        assert_eq!(started, 1);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 12);
        assert_eq!(probe.max_in_flight.load(Ordering::SeqCst), 1);
    }
}
