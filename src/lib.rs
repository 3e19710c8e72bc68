//! # Conclave
//!
//! Multi-agent coordination and handoff core - the deliberating circle.
//!
//! This crate implements the coordination layer of a multi-specialist AI
//! assistant: deciding which agents a request needs, fanning it out to
//! them, merging what comes back, and transferring conversations between
//! agents without losing context.
//!
//! ## Architecture
//!
//! ```text
//!   request
//!      │
//!      ▼
//! ┌──────────────────┐     ┌──────────────────────┐
//! │ IntentClassifier │────▶│ CollaborationAdvisor │
//! └──────────────────┘     └──────────┬───────────┘
//!                              solo?  │  team?
//!                           ┌─────────┴──────────┐
//!                           ▼                    ▼
//!                    (single agent)   ┌─────────────────────┐
//!                                     │ DispatchCoordinator │
//!                                     │  parallel │ seq │   │
//!                                     │       priority      │
//!                                     └──────────┬──────────┘
//!                                                ▼
//!                                     ┌─────────────────────┐
//!                                     │ ResponseSynthesizer │
//!                                     └─────────────────────┘
//!
//!   at any point: ┌───────────────┐
//!     agent A ───▶│ HandoffEngine │───▶ agent B (with briefing)
//!                 └───────────────┘
//! ```
//!
//! All of it leans on [`AgentRegistry`], which owns the known agents,
//! their capability domains, per-agent circuit breakers and the handoff
//! compatibility table.
//!
//! ## Key Concepts
//!
//! - **Agent**: a specialized downstream responder with capability domains
//! - **Dispatch**: a 1:N fan-out of one user turn to an agent team
//! - **Handoff**: a 1:1 transfer of an in-progress conversation
//! - **Fail soft**: runtime faults degrade to structured partial results;
//!   only caller programming errors surface as [`CoordinationError`]

pub mod collaboration;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handoff;
pub mod intent;
pub mod provider;
pub mod registry;
pub mod synthesis;
pub mod types;

pub use collaboration::{CollaborationAdvisor, CollaborationMode, CollaborationSuggestion};
pub use config::CoordinationConfig;
pub use dispatch::{
    DispatchCoordinator, DispatchRequest, DispatchResult, DispatchStrategy, TeamMemberSpec,
};
pub use error::CoordinationError;
pub use handoff::{
    ContextualBriefing, HandoffEngine, HandoffQuality, HandoffRequest, HandoffResult,
    HandoffStrategy, HandoffTrigger,
};
pub use intent::{ClassificationMethod, IntentClassifier, IntentResult};
pub use provider::{AgentClient, AgentReply, TextGenerator};
pub use registry::{AgentRegistry, BreakerState};
pub use synthesis::{ResponseSynthesizer, SynthesisStrategy, SynthesizedResponse};
pub use types::{AgentRole, Context, Domain, Urgency};
