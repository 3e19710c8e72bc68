//! Coordination error types
//!
//! Only caller programming errors surface here. Runtime faults (network
//! errors, timeouts, malformed upstream output) are absorbed by each
//! component and reported through result metadata instead.

use thiserror::Error;

use crate::types::AgentRole;

/// Errors rejected synchronously at component boundaries
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// Handoff source and target are the same agent
    #[error("Cannot hand off from {0} to itself")]
    SelfHandoff(AgentRole),

    /// Agent id string not in the closed role set
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),
}
