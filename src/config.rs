//! Tunable coordination limits and thresholds

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::AgentRole;

/// Runtime tunables for dispatch and circuit breaking.
///
/// Every field has a default so a config file only needs to name the
/// values it overrides. The keyword/compatibility tables are content,
/// not policy, and live as static tables next to the code that uses them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    /// Maximum concurrent agent calls within one dispatch
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_agents: usize,

    /// Per-agent call timeout, in seconds
    #[serde(default = "default_agent_timeout_secs")]
    pub agent_timeout_secs: u64,

    /// Consecutive failures before an agent's breaker opens
    #[serde(default = "default_failure_threshold")]
    pub breaker_failure_threshold: u32,

    /// Seconds an open breaker waits before allowing a probe call
    #[serde(default = "default_recovery_secs")]
    pub breaker_recovery_secs: u64,

    /// Agent substituted when classification yields no usable routing
    #[serde(default = "default_fallback_agent")]
    pub fallback_agent: AgentRole,
}

impl CoordinationConfig {
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    pub fn breaker_recovery(&self) -> Duration {
        Duration::from_secs(self.breaker_recovery_secs)
    }
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_agents: default_max_concurrent(),
            agent_timeout_secs: default_agent_timeout_secs(),
            breaker_failure_threshold: default_failure_threshold(),
            breaker_recovery_secs: default_recovery_secs(),
            fallback_agent: default_fallback_agent(),
        }
    }
}

fn default_max_concurrent() -> usize {
    5
}

fn default_agent_timeout_secs() -> u64 {
    30
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_recovery_secs() -> u64 {
    60
}

fn default_fallback_agent() -> AgentRole {
    AgentRole::Nexus
}
