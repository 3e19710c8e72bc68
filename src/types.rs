//! Shared data model for the coordination core

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoordinationError;

/// Conversation/user context passed between components.
///
/// Keys are free-form; values are arbitrary JSON. Components only ever
/// read a fixed set of well-known keys and treat the rest as opaque.
pub type Context = HashMap<String, serde_json::Value>;

/// The closed set of known agents.
///
/// Free-form agent id strings are rejected at the parse boundary; every
/// component downstream works with this enum only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Central orchestrator / coordinator
    Nexus,
    /// Nutrition specialist
    Nutrition,
    /// Training specialist
    Training,
    /// Genetics specialist
    Genetics,
    /// Wellness specialist
    Wellness,
    /// Recovery specialist
    Recovery,
}

impl AgentRole {
    /// All known roles, in registration order.
    pub const ALL: [AgentRole; 6] = [
        AgentRole::Nexus,
        AgentRole::Nutrition,
        AgentRole::Training,
        AgentRole::Genetics,
        AgentRole::Wellness,
        AgentRole::Recovery,
    ];

    /// Stable string id used in logs, maps and config files.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Nexus => "nexus",
            AgentRole::Nutrition => "nutrition",
            AgentRole::Training => "training",
            AgentRole::Genetics => "genetics",
            AgentRole::Wellness => "wellness",
            AgentRole::Recovery => "recovery",
        }
    }

    /// Whether this role acts as the coordinator in a collaboration team.
    pub fn is_coordinator(&self) -> bool {
        matches!(self, AgentRole::Nexus)
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = CoordinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "nexus" | "coordinator" | "orchestrator" => Ok(AgentRole::Nexus),
            "nutrition" | "nutritionist" => Ok(AgentRole::Nutrition),
            "training" | "trainer" => Ok(AgentRole::Training),
            "genetics" | "geneticist" => Ok(AgentRole::Genetics),
            "wellness" => Ok(AgentRole::Wellness),
            "recovery" => Ok(AgentRole::Recovery),
            other => Err(CoordinationError::UnknownAgent(other.to_string())),
        }
    }
}

/// Capability domain an agent can cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Nutrition,
    Training,
    Genetics,
    Wellness,
    Recovery,
    Coordination,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Nutrition => "nutrition",
            Domain::Training => "training",
            Domain::Genetics => "genetics",
            Domain::Wellness => "wellness",
            Domain::Recovery => "recovery",
            Domain::Coordination => "coordination",
        }
    }

    /// The specialist agent naturally responsible for this domain.
    pub fn specialist(&self) -> AgentRole {
        match self {
            Domain::Nutrition => AgentRole::Nutrition,
            Domain::Training => AgentRole::Training,
            Domain::Genetics => AgentRole::Genetics,
            Domain::Wellness => AgentRole::Wellness,
            Domain::Recovery => AgentRole::Recovery,
            Domain::Coordination => AgentRole::Nexus,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Urgency of a classified request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

impl Default for Urgency {
    fn default() -> Self {
        Urgency::Medium
    }
}
