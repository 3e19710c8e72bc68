//! Dispatch coordinator - 1:N fan-out of one turn to an agent team

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::config::CoordinationConfig;
use crate::provider::{AgentClient, AgentReply};
use crate::registry::AgentRegistry;
use crate::types::{AgentRole, Context};

/// Failure reason recorded when a call exceeds its per-agent timeout.
pub const TIMEOUT_REASON: &str = "Request timed out";
/// Failure reason recorded when the circuit breaker suppresses a call.
pub const BREAKER_OPEN_REASON: &str = "Agent temporarily unavailable (circuit breaker open)";

/// Execution strategy for one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStrategy {
    /// All agents concurrently, bounded by the concurrency limit
    Parallel,
    /// One at a time in team order, insights flowing forward
    Sequential,
    /// Priority groups in ascending order, parallel within each group
    Priority,
}

/// One team entry as supplied by the caller. Loosely structured on
/// purpose: the orchestrator builds these from upstream suggestions and
/// may omit fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamMemberSpec {
    /// Entries without a role are dropped during validation
    pub role: Option<AgentRole>,
    /// 1 is highest; defaults to 3
    pub priority: Option<u8>,
    /// Defaults to the shared request text
    pub specific_request: Option<String>,
    pub expected_output: Option<String>,
    /// In the sequential strategy, a failing critical member aborts the
    /// remainder of the sequence
    #[serde(default)]
    pub critical: bool,
}

impl TeamMemberSpec {
    pub fn for_role(role: AgentRole) -> Self {
        Self {
            role: Some(role),
            ..Default::default()
        }
    }
}

/// A dispatch call: team, strategy and the shared request/context.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub team: Vec<TeamMemberSpec>,
    pub strategy: DispatchStrategy,
    pub shared_request: String,
    pub shared_context: Context,
}

/// Validated team entry.
#[derive(Debug, Clone)]
struct TeamMember {
    role: AgentRole,
    priority: u8,
    request: String,
    critical: bool,
}

/// Aggregate facts about one dispatch execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchMetadata {
    pub strategy: DispatchStrategy,
    /// Size of the validated team, including members never called
    pub total_agents: usize,
    pub successful_agents: usize,
    pub failed_agents: usize,
    pub elapsed_ms: u64,
    /// Agents actually attempted, in no particular order
    pub called: Vec<AgentRole>,
}

/// Outcome of one dispatch.
///
/// Every called team member appears in exactly one of `successes` or
/// `failures`; members skipped by an early sequential abort appear in
/// neither, while `metadata.total_agents` still counts them.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub success: bool,
    pub successes: HashMap<AgentRole, AgentReply>,
    pub failures: HashMap<AgentRole, String>,
    pub metadata: DispatchMetadata,
}

/// Fans one user turn out to a team of agents under concurrency, timeout
/// and circuit-breaker constraints.
pub struct DispatchCoordinator {
    registry: Arc<AgentRegistry>,
    client: Arc<dyn AgentClient>,
    max_concurrent: usize,
    call_timeout: Duration,
}

impl DispatchCoordinator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        client: Arc<dyn AgentClient>,
        config: &CoordinationConfig,
    ) -> Self {
        Self {
            registry,
            client,
            max_concurrent: config.max_concurrent_agents,
            call_timeout: config.agent_timeout(),
        }
    }

    #[instrument(skip(self, request), fields(strategy = ?request.strategy))]
    pub async fn dispatch(&self, request: DispatchRequest) -> DispatchResult {
        let started = Instant::now();
        let team = validate_team(&request.team, &request.shared_request);

        if team.is_empty() {
            warn!("Dispatch requested with no valid team members");
            return DispatchResult {
                success: false,
                successes: HashMap::new(),
                failures: HashMap::new(),
                metadata: DispatchMetadata {
                    strategy: request.strategy,
                    total_agents: 0,
                    successful_agents: 0,
                    failed_agents: 0,
                    elapsed_ms: 0,
                    called: Vec::new(),
                },
            };
        }

        let total = team.len();
        let (successes, failures, called) = match request.strategy {
            DispatchStrategy::Parallel => {
                self.run_parallel(team, &request.shared_context).await
            }
            DispatchStrategy::Sequential => {
                self.run_sequential(team, request.shared_context).await
            }
            DispatchStrategy::Priority => self.run_priority(team, request.shared_context).await,
        };

        let metadata = DispatchMetadata {
            strategy: request.strategy,
            total_agents: total,
            successful_agents: successes.len(),
            failed_agents: failures.len(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            called,
        };

        info!(
            total = metadata.total_agents,
            ok = metadata.successful_agents,
            failed = metadata.failed_agents,
            elapsed_ms = metadata.elapsed_ms,
            "Dispatch complete"
        );

        DispatchResult {
            success: !successes.is_empty(),
            successes,
            failures,
            metadata,
        }
    }

    /// All members concurrently, gated by the shared semaphore. A timed
    /// out or failed sibling never cancels the others.
    async fn run_parallel(
        &self,
        team: Vec<TeamMember>,
        context: &Context,
    ) -> (HashMap<AgentRole, AgentReply>, HashMap<AgentRole, String>, Vec<AgentRole>) {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let context = Arc::new(context.clone());
        let mut join_set = JoinSet::new();

        for member in team {
            let semaphore = Arc::clone(&semaphore);
            let registry = Arc::clone(&self.registry);
            let client = Arc::clone(&self.client);
            let context = Arc::clone(&context);
            let call_timeout = self.call_timeout;
            join_set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (member.role, Err("Dispatch aborted".to_string())),
                };
                let outcome =
                    call_agent(&registry, &client, call_timeout, member.role, &member.request, &context)
                        .await;
                (member.role, outcome)
            });
        }

        let mut successes = HashMap::new();
        let mut failures = HashMap::new();
        let mut called = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((role, Ok(reply))) => {
                    called.push(role);
                    successes.insert(role, reply);
                }
                Ok((role, Err(reason))) => {
                    called.push(role);
                    failures.insert(role, reason);
                }
                Err(join_error) => warn!(error = %join_error, "Dispatch task panicked"),
            }
        }
        (successes, failures, called)
    }

    /// Strict team order; each success contributes insights to the
    /// context the next member sees. A failing critical member stops the
    /// sequence, leaving the remaining members uncalled.
    async fn run_sequential(
        &self,
        team: Vec<TeamMember>,
        mut context: Context,
    ) -> (HashMap<AgentRole, AgentReply>, HashMap<AgentRole, String>, Vec<AgentRole>) {
        let mut successes = HashMap::new();
        let mut failures = HashMap::new();
        let mut called = Vec::new();

        for member in team {
            called.push(member.role);
            let outcome = call_agent(
                &self.registry,
                &self.client,
                self.call_timeout,
                member.role,
                &member.request,
                &context,
            )
            .await;

            match outcome {
                Ok(reply) => {
                    context.insert(
                        format!("{}_insights", member.role),
                        json!(truncate(&reply.content, 500)),
                    );
                    successes.insert(member.role, reply);
                }
                Err(reason) => {
                    failures.insert(member.role, reason);
                    if member.critical {
                        warn!(agent = %member.role, "Critical agent failed, aborting sequence");
                        break;
                    }
                }
            }
        }
        (successes, failures, called)
    }

    /// Ascending priority groups; each group is a barrier. Results from
    /// priority 1 and 2 groups feed the context of later groups.
    async fn run_priority(
        &self,
        team: Vec<TeamMember>,
        mut context: Context,
    ) -> (HashMap<AgentRole, AgentReply>, HashMap<AgentRole, String>, Vec<AgentRole>) {
        let mut groups: BTreeMap<u8, Vec<TeamMember>> = BTreeMap::new();
        for member in team {
            groups.entry(member.priority).or_default().push(member);
        }

        let mut successes = HashMap::new();
        let mut failures = HashMap::new();
        let mut called = Vec::new();

        for (priority, group) in groups {
            let (group_ok, group_failed, group_called) =
                self.run_parallel(group, &context).await;

            if priority <= 2 {
                for (role, reply) in &group_ok {
                    context.insert(
                        format!("{}_response", role),
                        json!(truncate(&reply.content, 500)),
                    );
                }
            }
            successes.extend(group_ok);
            failures.extend(group_failed);
            called.extend(group_called);
        }
        (successes, failures, called)
    }
}

/// One guarded agent call: breaker gate, timeout, breaker bookkeeping.
async fn call_agent(
    registry: &AgentRegistry,
    client: &Arc<dyn AgentClient>,
    call_timeout: Duration,
    role: AgentRole,
    request: &str,
    context: &Context,
) -> Result<AgentReply, String> {
    if !registry.allow_call(role) {
        debug!(agent = %role, "Call suppressed by open circuit breaker");
        return Err(BREAKER_OPEN_REASON.to_string());
    }

    match timeout(call_timeout, client.call(role, request, context, call_timeout)).await {
        Ok(Ok(reply)) => {
            registry.record_success(role);
            Ok(reply)
        }
        Ok(Err(error)) => {
            registry.record_failure(role);
            Err(error.to_string())
        }
        Err(_) => {
            registry.record_failure(role);
            warn!(agent = %role, "Agent call timed out");
            Err(TIMEOUT_REASON.to_string())
        }
    }
}

/// Drop entries without a role, default priority to 3 and the request to
/// the shared text, and keep only the first entry per role.
fn validate_team(specs: &[TeamMemberSpec], shared_request: &str) -> Vec<TeamMember> {
    let mut seen = Vec::new();
    let mut team = Vec::new();
    for spec in specs {
        let Some(role) = spec.role else {
            debug!("Dropping team entry without an agent role");
            continue;
        };
        if seen.contains(&role) {
            debug!(agent = %role, "Dropping duplicate team entry");
            continue;
        }
        seen.push(role);
        team.push(TeamMember {
            role,
            priority: spec.priority.unwrap_or(3),
            request: spec
                .specific_request
                .clone()
                .unwrap_or_else(|| shared_request.to_string()),
            critical: spec.critical,
        });
    }
    team
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
