//! Agent registry and per-agent circuit breakers

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::config::CoordinationConfig;
use crate::types::{AgentRole, Domain};

/// Circuit breaker state for one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls flow normally
    Closed,
    /// Calls are suppressed until the recovery timeout elapses
    Open,
    /// One probe call is in flight after the recovery timeout
    HalfOpen,
}

/// Per-agent failure tracking state machine.
///
/// Transitions: `Closed` opens after `failure_threshold` consecutive
/// failures; `Open` admits exactly one probe (becoming `HalfOpen`) once
/// `recovery_timeout` has elapsed since the last failure; further calls
/// are suppressed until the probe's outcome is recorded. A `HalfOpen`
/// success closes the breaker, a failure re-opens it and resets the clock.
#[derive(Debug)]
struct Breaker {
    state: BreakerState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
}

impl Breaker {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            probe_in_flight: false,
        }
    }

    fn record_success(&mut self) {
        self.state = BreakerState::Closed;
        self.consecutive_failures = 0;
        self.last_failure = None;
        self.probe_in_flight = false;
    }

    fn record_failure(&mut self, threshold: u32) {
        self.consecutive_failures += 1;
        self.last_failure = Some(Instant::now());
        self.probe_in_flight = false;
        match self.state {
            BreakerState::Closed if self.consecutive_failures >= threshold => {
                self.state = BreakerState::Open;
            }
            BreakerState::HalfOpen => {
                // Probe failed; re-open and restart the recovery clock
                self.state = BreakerState::Open;
            }
            _ => {}
        }
    }

    /// Whether a call may proceed right now, transitioning `Open` to
    /// `HalfOpen` when the recovery window has elapsed. At most one probe
    /// is admitted per half-open period.
    fn allow_call(&mut self, recovery: Duration) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => {
                if self.probe_in_flight {
                    false
                } else {
                    self.probe_in_flight = true;
                    true
                }
            }
            BreakerState::Open => {
                let elapsed = self
                    .last_failure
                    .map(|at| at.elapsed() >= recovery)
                    .unwrap_or(true);
                if elapsed {
                    self.state = BreakerState::HalfOpen;
                    self.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
        }
    }
}

struct AgentEntry {
    display_name: String,
    domains: HashSet<Domain>,
    breaker: Mutex<Breaker>,
}

/// Registry of known agents, their capability domains and breaker state.
///
/// Breakers for different agents are independent: each lives behind its
/// own lock, so concurrent dispatch calls never contend across agents.
pub struct AgentRegistry {
    agents: RwLock<HashMap<AgentRole, AgentEntry>>,
    failure_threshold: u32,
    recovery_timeout: Duration,
}

impl AgentRegistry {
    /// Create an empty registry using the config's breaker tunables.
    pub fn new(config: &CoordinationConfig) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            failure_threshold: config.breaker_failure_threshold,
            recovery_timeout: config.breaker_recovery(),
        }
    }

    /// Create a registry seeded with every known role and its default
    /// display name and domain set.
    pub fn with_default_agents(config: &CoordinationConfig) -> Self {
        let registry = Self::new(config);
        registry.register(AgentRole::Nexus, "NEXUS", [Domain::Coordination]);
        registry.register(AgentRole::Nutrition, "Nutrition Coach", [Domain::Nutrition]);
        registry.register(AgentRole::Training, "Training Coach", [Domain::Training]);
        registry.register(AgentRole::Genetics, "Genetics Advisor", [Domain::Genetics]);
        registry.register(AgentRole::Wellness, "Wellness Guide", [Domain::Wellness]);
        registry.register(AgentRole::Recovery, "Recovery Coach", [Domain::Recovery]);
        registry
    }

    /// Register an agent. Idempotent: re-registering replaces the display
    /// name and domain set but preserves existing breaker state.
    pub fn register(
        &self,
        role: AgentRole,
        display_name: impl Into<String>,
        domains: impl IntoIterator<Item = Domain>,
    ) {
        let mut agents = self.agents.write();
        let domains: HashSet<Domain> = domains.into_iter().collect();
        match agents.get_mut(&role) {
            Some(entry) => {
                entry.display_name = display_name.into();
                entry.domains = domains;
            }
            None => {
                debug!(agent = %role, "Registering agent");
                agents.insert(
                    role,
                    AgentEntry {
                        display_name: display_name.into(),
                        domains,
                        breaker: Mutex::new(Breaker::new()),
                    },
                );
            }
        }
    }

    /// Whether the role is registered.
    pub fn contains(&self, role: AgentRole) -> bool {
        self.agents.read().contains_key(&role)
    }

    /// Capability domains for an agent. Empty for unknown agents.
    pub fn get_domains(&self, role: AgentRole) -> HashSet<Domain> {
        self.agents
            .read()
            .get(&role)
            .map(|entry| entry.domains.clone())
            .unwrap_or_default()
    }

    /// Human-facing name for attribution. Falls back to the role id.
    pub fn display_name(&self, role: AgentRole) -> String {
        self.agents
            .read()
            .get(&role)
            .map(|entry| entry.display_name.clone())
            .unwrap_or_else(|| role.to_string())
    }

    /// Record a successful call, closing the agent's breaker.
    pub fn record_success(&self, role: AgentRole) {
        if let Some(entry) = self.agents.read().get(&role) {
            entry.breaker.lock().record_success();
        }
    }

    /// Record a failed call, possibly opening the agent's breaker.
    pub fn record_failure(&self, role: AgentRole) {
        if let Some(entry) = self.agents.read().get(&role) {
            let mut breaker = entry.breaker.lock();
            breaker.record_failure(self.failure_threshold);
            if breaker.state == BreakerState::Open {
                warn!(agent = %role, failures = breaker.consecutive_failures,
                    "Circuit breaker open");
            }
        }
    }

    /// Whether a call to this agent may proceed. An open breaker past its
    /// recovery window transitions to half-open and admits one probe.
    /// Unregistered agents are never gated.
    pub fn allow_call(&self, role: AgentRole) -> bool {
        match self.agents.read().get(&role) {
            Some(entry) => entry.breaker.lock().allow_call(self.recovery_timeout),
            None => true,
        }
    }

    /// Current breaker state, if the agent is registered.
    pub fn breaker_state(&self, role: AgentRole) -> Option<BreakerState> {
        self.agents
            .read()
            .get(&role)
            .map(|entry| entry.breaker.lock().state)
    }

    /// Static compatibility score for an ordered handoff pair.
    ///
    /// Complementary-domain pairs score 0.95, natural conversation flows
    /// 0.85, and every other pair (including unregistered agents) 0.65.
    /// The specific values are hand-tuned content, not derived policy.
    pub fn compatibility_score(&self, from: AgentRole, to: AgentRole) -> f64 {
        use AgentRole::*;
        const COMPLEMENTARY: &[(AgentRole, AgentRole)] = &[
            (Nutrition, Training),
            (Training, Nutrition),
            (Genetics, Nutrition),
            (Genetics, Training),
            (Wellness, Recovery),
            (Recovery, Wellness),
        ];
        const NATURAL_FLOW: &[(AgentRole, AgentRole)] = &[
            (Nexus, Nutrition),
            (Nexus, Training),
            (Nexus, Wellness),
            (Nutrition, Wellness),
            (Training, Recovery),
            (Genetics, Wellness),
        ];
        let pair = (from, to);
        if COMPLEMENTARY.contains(&pair) {
            0.95
        } else if NATURAL_FLOW.contains(&pair) {
            0.85
        } else {
            0.65
        }
    }
}
