//! Readiness scheduler - bounded polling for tour step targets.
//!
//! Each resolution cycle moves from `Polling(attempt)` to `Settled`:
//! - every attempt checks all step targets through the injected lookup
//! - all targets present settles immediately
//! - otherwise waits a fixed delay and polls again, up to `max_attempts` checks
//! - on exhaustion settles with whatever was found
//!
//! Cycles are numbered. Starting a cycle supersedes the previous one; a
//! superseded cycle drops its pending delay and never settles.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::lookup::DomLookup;
use crate::steps::{Placement, StepSpec};

/// Default number of existence checks per cycle
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default wait between checks
pub const DEFAULT_DELAY: Duration = Duration::from_millis(500);

/// Fixed-interval retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    /// Existence checks per cycle, at least 1
    pub max_attempts: u32,
    pub delay: Duration,
}

impl ReadinessPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_DELAY)
    }
}

/// A step with the outcome of its target lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedStep {
    pub lookup_query: String,
    pub text: String,
    pub placement: Placement,
    pub source_id: String,
    pub target_found: bool,
}

/// How a cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementOutcome {
    /// Every target was present
    AllFound,
    /// Attempts ran out with some targets present
    Partial,
    /// Attempts ran out with no target present
    NoneFound,
    /// There were no steps to resolve
    Empty,
}

/// Terminal result of a resolution cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settlement {
    pub steps: Vec<ResolvedStep>,
    /// Existence checks performed
    pub attempts: u32,
    pub outcome: SettlementOutcome,
}

impl Settlement {
    fn from_snapshot(specs: &[StepSpec], found: &[bool], attempts: u32) -> Self {
        let steps: Vec<ResolvedStep> = specs
            .iter()
            .zip(found)
            .map(|(spec, &target_found)| ResolvedStep {
                lookup_query: spec.lookup_query.clone(),
                text: spec.text.clone(),
                placement: spec.placement,
                source_id: spec.source_id.clone(),
                target_found,
            })
            .collect();

        let found_count = found.iter().filter(|f| **f).count();
        let outcome = if steps.is_empty() {
            SettlementOutcome::Empty
        } else if found_count == steps.len() {
            SettlementOutcome::AllFound
        } else if found_count == 0 {
            SettlementOutcome::NoneFound
        } else {
            SettlementOutcome::Partial
        };

        Self {
            steps,
            attempts,
            outcome,
        }
    }

    /// Whether the tour entry point should be enabled
    pub fn tour_enabled(&self) -> bool {
        self.steps.iter().any(|s| s.target_found)
    }

    pub fn found_count(&self) -> usize {
        self.steps.iter().filter(|s| s.target_found).count()
    }
}

/// Identifies one resolution cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CycleToken(u64);

impl CycleToken {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Errors from a resolution cycle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadinessError {
    #[error("resolution cycle {cycle} was superseded by cycle {current}")]
    Superseded { cycle: u64, current: u64 },
}

enum CycleState {
    Polling(u32),
    Settled(Settlement),
}

/// Polls step targets until they are present or attempts run out
pub struct ReadinessScheduler {
    lookup: Arc<dyn DomLookup>,
    policy: ReadinessPolicy,
    /// Most recently started cycle
    cycle: watch::Sender<u64>,
}

impl ReadinessScheduler {
    pub fn new(lookup: Arc<dyn DomLookup>, policy: ReadinessPolicy) -> Self {
        let (cycle, _) = watch::channel(0);
        Self {
            lookup,
            policy,
            cycle,
        }
    }

    pub fn lookup(&self) -> &Arc<dyn DomLookup> {
        &self.lookup
    }

    /// Id of the most recently started (or cancelled) cycle
    pub fn current_cycle(&self) -> u64 {
        *self.cycle.borrow()
    }

    pub fn is_current(&self, token: CycleToken) -> bool {
        self.current_cycle() == token.0
    }

    /// Start a new cycle, superseding any cycle in flight
    pub fn begin_cycle(&self) -> CycleToken {
        let mut started = 0;
        self.cycle.send_modify(|current| {
            *current += 1;
            started = *current;
        });
        CycleToken(started)
    }

    /// Invalidate the cycle in flight without starting a new one
    pub fn cancel(&self) {
        self.cycle.send_modify(|current| *current += 1);
        debug!(cycle = self.current_cycle(), "Resolution cancelled");
    }

    /// Start a cycle and run it to settlement
    pub async fn resolve(&self, specs: &[StepSpec]) -> Result<Settlement, ReadinessError> {
        let token = self.begin_cycle();
        self.run_cycle(token, specs).await
    }

    /// Run a previously started cycle
    pub async fn run_cycle(
        &self,
        token: CycleToken,
        specs: &[StepSpec],
    ) -> Result<Settlement, ReadinessError> {
        let mut cycle_rx = self.cycle.subscribe();
        let mut state = CycleState::Polling(0);

        loop {
            self.ensure_current(token)?;

            state = match state {
                CycleState::Polling(attempt) => {
                    let found = self.probe(specs);
                    let checks = attempt + 1;
                    let found_count = found.iter().filter(|f| **f).count();

                    if found_count == specs.len() {
                        CycleState::Settled(Settlement::from_snapshot(specs, &found, checks))
                    } else if checks >= self.policy.max_attempts {
                        warn!(
                            cycle = token.0,
                            found = found_count,
                            total = specs.len(),
                            "Tour targets still missing after {} attempts",
                            checks
                        );
                        CycleState::Settled(Settlement::from_snapshot(specs, &found, checks))
                    } else {
                        debug!(
                            cycle = token.0,
                            found = found_count,
                            total = specs.len(),
                            "Retrying tour target lookup (attempt {}/{})",
                            checks + 1,
                            self.policy.max_attempts
                        );
                        if !self.wait_for_retry(token, &mut cycle_rx).await {
                            return Err(self.superseded(token));
                        }
                        CycleState::Polling(checks)
                    }
                }
                CycleState::Settled(settlement) => {
                    info!(
                        cycle = token.0,
                        attempts = settlement.attempts,
                        found = settlement.found_count(),
                        total = settlement.steps.len(),
                        outcome = ?settlement.outcome,
                        "Tour steps settled"
                    );
                    return Ok(settlement);
                }
            };
        }
    }

    /// One existence check per spec; lookup failures count as not found
    fn probe(&self, specs: &[StepSpec]) -> Vec<bool> {
        specs
            .iter()
            .map(|spec| {
                if !spec.is_resolvable() {
                    return false;
                }
                match self.lookup.exists(&spec.lookup_query) {
                    Ok(found) => found,
                    Err(e) => {
                        debug!(query = %spec.lookup_query, error = %e, "Target lookup failed");
                        false
                    }
                }
            })
            .collect()
    }

    /// Sleep for the policy delay. Returns false as soon as the cycle is superseded.
    async fn wait_for_retry(&self, token: CycleToken, cycle_rx: &mut watch::Receiver<u64>) -> bool {
        let sleep = tokio::time::sleep(self.policy.delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = &mut sleep => return self.is_current(token),
                changed = cycle_rx.changed() => {
                    if changed.is_err() || !self.is_current(token) {
                        return false;
                    }
                }
            }
        }
    }

    fn ensure_current(&self, token: CycleToken) -> Result<(), ReadinessError> {
        if self.is_current(token) {
            Ok(())
        } else {
            Err(self.superseded(token))
        }
    }

    fn superseded(&self, token: CycleToken) -> ReadinessError {
        let current = self.current_cycle();
        debug!(cycle = token.0, current, "Resolution cycle superseded");
        ReadinessError::Superseded {
            cycle: token.0,
            current,
        }
    }
}
