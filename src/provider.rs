//! External capability interfaces
//!
//! The coordination core never talks to a vendor API directly. It routes
//! through these two seams, which the surrounding platform implements.
//! Faults are opaque `anyhow::Error` values; every component absorbs them
//! at its own boundary rather than propagating them to the caller.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::types::{AgentRole, Context};

/// Payload returned by a successful agent call.
#[derive(Debug, Clone)]
pub struct AgentReply {
    /// Text the agent produced for the user
    pub content: String,
    /// Structured output, when the agent provided any
    pub data: Value,
}

impl AgentReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            data: Value::Null,
        }
    }
}

/// Calls a downstream specialized agent.
///
/// Must be safe to call concurrently for distinct roles. The `timeout`
/// is the caller's remaining budget; transports may use it to bound the
/// underlying request.
#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn call(
        &self,
        role: AgentRole,
        request: &str,
        context: &Context,
        timeout: Duration,
    ) -> anyhow::Result<AgentReply>;
}

/// Stateless text generation capability.
///
/// Used by intent classification (phase two) and by the intelligent and
/// consensus synthesis strategies. Each call is independent; no
/// conversation state is carried between calls.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, temperature: f32) -> anyhow::Result<String>;
}

#[cfg(test)]
pub mod mock {
    //! Scripted capability doubles for component tests

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;

    /// Per-role scripted behavior for [`MockAgentClient`].
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Reply with the given text after an optional delay
        Reply { content: String, delay: Duration },
        /// Fail with the given message
        Fail(String),
    }

    impl MockBehavior {
        pub fn reply(content: &str) -> Self {
            MockBehavior::Reply {
                content: content.to_string(),
                delay: Duration::ZERO,
            }
        }

        pub fn slow_reply(content: &str, delay: Duration) -> Self {
            MockBehavior::Reply {
                content: content.to_string(),
                delay,
            }
        }
    }

    /// Agent client double with per-role scripts and a call counter.
    pub struct MockAgentClient {
        scripts: HashMap<AgentRole, MockBehavior>,
        calls: AtomicUsize,
    }

    impl MockAgentClient {
        pub fn new() -> Self {
            Self {
                scripts: HashMap::new(),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn with(mut self, role: AgentRole, behavior: MockBehavior) -> Self {
            self.scripts.insert(role, behavior);
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AgentClient for MockAgentClient {
        async fn call(
            &self,
            role: AgentRole,
            _request: &str,
            _context: &Context,
            _timeout: Duration,
        ) -> anyhow::Result<AgentReply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.scripts.get(&role) {
                Some(MockBehavior::Reply { content, delay }) => {
                    if !delay.is_zero() {
                        tokio::time::sleep(*delay).await;
                    }
                    Ok(AgentReply::text(content.clone()))
                }
                Some(MockBehavior::Fail(message)) => Err(anyhow::anyhow!(message.clone())),
                None => Ok(AgentReply::text(format!("{} default reply", role))),
            }
        }
    }

    /// Text generator double returning queued responses in order.
    pub struct MockGenerator {
        responses: Mutex<Vec<String>>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl MockGenerator {
        /// Always returns `response`.
        pub fn fixed(response: &str) -> Self {
            Self {
                responses: Mutex::new(vec![response.to_string()]),
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        /// Returns each queued response once, then repeats the last.
        pub fn queued(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().map(String::from).collect()),
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        /// Fails every call.
        pub fn failing() -> Self {
            Self {
                responses: Mutex::new(Vec::new()),
                fail: true,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TextGenerator for MockGenerator {
        async fn generate(&self, _prompt: &str, _temperature: f32) -> anyhow::Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("generation unavailable");
            }
            let responses = self.responses.lock();
            let idx = n.min(responses.len().saturating_sub(1));
            responses
                .get(idx)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no scripted response"))
        }
    }
}
