//! Handoff engine - 1:1 conversation transfer between agents
//!
//! A handoff moves an in-progress conversation from one agent to another:
//! build a briefing for the receiver, adapt the context, grade how much of
//! it survived the transfer, and keep per-user rolling metrics. Runtime
//! faults never escape `execute`; the caller always gets a usable
//! briefing/result pair.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::CoordinationError;
use crate::registry::AgentRegistry;
use crate::types::{AgentRole, Context};

/// Why a handoff was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffTrigger {
    UserRequest,
    ExpertiseMismatch,
    CapabilityNeeded,
    LoadBalancing,
    Escalation,
    ConversationFlow,
    Emergency,
}

/// How the transfer is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffStrategy {
    Immediate,
    Gradual,
    Consultation,
    EscalationTree,
    RoundRobin,
    ExpertiseWeighted,
}

impl HandoffStrategy {
    /// Baseline transfer time in seconds, before context adjustments.
    fn base_secs(self) -> u64 {
        match self {
            HandoffStrategy::Immediate => 2,
            HandoffStrategy::Gradual => 30,
            HandoffStrategy::Consultation => 15,
            HandoffStrategy::EscalationTree => 10,
            HandoffStrategy::RoundRobin => 5,
            HandoffStrategy::ExpertiseWeighted => 8,
        }
    }
}

/// Fixed trigger to strategy selection.
fn strategy_for_trigger(trigger: HandoffTrigger) -> HandoffStrategy {
    match trigger {
        HandoffTrigger::UserRequest => HandoffStrategy::Immediate,
        HandoffTrigger::ExpertiseMismatch => HandoffStrategy::ExpertiseWeighted,
        HandoffTrigger::CapabilityNeeded => HandoffStrategy::Consultation,
        HandoffTrigger::LoadBalancing => HandoffStrategy::RoundRobin,
        HandoffTrigger::Escalation => HandoffStrategy::EscalationTree,
        HandoffTrigger::ConversationFlow => HandoffStrategy::Gradual,
        HandoffTrigger::Emergency => HandoffStrategy::Immediate,
    }
}

/// Transfer fidelity grade, best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffQuality {
    Seamless,
    Smooth,
    Visible,
    Abrupt,
    Failed,
}

/// Tolerance for f64 rounding at tier boundaries: a score assembled from
/// 0.4 + 0.3 + 0.2 lands just below 0.9 in binary floating point.
const TIER_EPSILON: f64 = 1e-9;

impl HandoffQuality {
    fn from_score(score: f64, success: bool) -> Self {
        if !success {
            return HandoffQuality::Failed;
        }
        if score >= 0.9 - TIER_EPSILON {
            HandoffQuality::Seamless
        } else if score >= 0.75 - TIER_EPSILON {
            HandoffQuality::Smooth
        } else if score >= 0.6 - TIER_EPSILON {
            HandoffQuality::Visible
        } else if score >= 0.4 - TIER_EPSILON {
            HandoffQuality::Abrupt
        } else {
            HandoffQuality::Failed
        }
    }
}

/// An accepted transfer order. Immutable once built by [`HandoffEngine::request`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffRequest {
    pub id: Uuid,
    pub from_agent: AgentRole,
    pub to_agent: AgentRole,
    pub trigger: HandoffTrigger,
    pub strategy: HandoffStrategy,
    pub context: Context,
    pub user_id: String,
    /// 1 is most urgent; clamped to 1..=10
    pub priority: u8,
    pub reason: String,
    pub expected_duration_secs: u64,
    pub success_criteria: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// The receiving agent's starting package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextualBriefing {
    pub id: Uuid,
    pub target_agent: AgentRole,
    /// Profile subset extracted from the full context
    pub user_context: Context,
    /// Most recent first, at most 10 entries
    pub conversation_history: Vec<Value>,
    pub current_objectives: Vec<String>,
    /// Target-agent-relevant slice of the context
    pub relevant_data: Context,
    pub suggested_approach: String,
    pub potential_challenges: Vec<String>,
    pub success_metrics: Vec<String>,
    pub handoff_context: String,
    /// At most 5, highest priority first
    pub priority_items: Vec<String>,
}

/// Terminal record of one executed handoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffResult {
    pub handoff_id: Uuid,
    pub success: bool,
    pub quality: HandoffQuality,
    pub execution_time_secs: f64,
    /// Fraction of critical context carried over intact, in [0,1]
    pub context_preservation: f64,
    pub user_satisfaction: Option<f64>,
    pub issues: Vec<String>,
    pub lessons_learned: Vec<String>,
    pub performance_metrics: HashMap<String, f64>,
    pub completed_at: DateTime<Utc>,
}

/// Rolling per-user view over the bounded handoff history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserHandoffMetrics {
    pub total_handoffs: usize,
    pub successful_handoffs: usize,
    pub average_quality_score: f64,
    pub average_execution_secs: f64,
}

const MAX_HISTORY_ENTRIES: usize = 10;
const MAX_PRIORITY_ITEMS: usize = 5;
const MAX_CHALLENGES: usize = 5;
const HISTORY_CAP_PER_USER: usize = 50;
const LOW_COMPATIBILITY_WARNING: f64 = 0.5;
const COMPATIBILITY_PENALTY_BELOW: f64 = 0.7;
const GRADUAL_OVERLAP_SECS: f64 = 30.0;

/// Critical fields checked for context preservation.
const CRITICAL_FIELDS: [&str; 6] = [
    "user_id",
    "session_id",
    "goals",
    "preferences",
    "current_conversation",
    "user_state",
];

/// Profile fields copied into the briefing's user-context subset.
const PROFILE_FIELDS: [&str; 8] = [
    "user_id",
    "name",
    "age",
    "goals",
    "preferences",
    "user_state",
    "expertise_level",
    "communication_style",
];

/// Agent-relevant data keys, per receiving agent.
fn relevant_keys(role: AgentRole) -> &'static [&'static str] {
    match role {
        AgentRole::Nexus => &["goals", "preferences", "session_history"],
        AgentRole::Nutrition => &[
            "dietary_restrictions",
            "meal_history",
            "nutrition_goals",
            "supplements",
        ],
        AgentRole::Training => &["training_history", "injuries", "equipment", "fitness_level"],
        AgentRole::Genetics => &["genetic_data", "heritage", "risk_factors"],
        AgentRole::Wellness => &["stress_level", "mood", "sleep_quality", "habits"],
        AgentRole::Recovery => &[
            "sleep_quality",
            "injuries",
            "recovery_metrics",
            "training_history",
        ],
    }
}

/// Transitions known to confuse users when made abruptly.
const DIFFICULT_TRANSITIONS: &[(AgentRole, AgentRole)] = &[
    (AgentRole::Genetics, AgentRole::Recovery),
    (AgentRole::Recovery, AgentRole::Genetics),
    (AgentRole::Nutrition, AgentRole::Genetics),
];

/// Executes 1:1 context transfers and keeps per-user rolling metrics.
pub struct HandoffEngine {
    registry: Arc<AgentRegistry>,
    /// Bounded per-user history; one lock also serializes the rolling
    /// metric arithmetic for concurrent handoffs of the same user
    history: Mutex<HashMap<String, VecDeque<HandoffResult>>>,
    #[cfg(test)]
    inject_failure: std::sync::atomic::AtomicBool,
}

impl HandoffEngine {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self {
            registry,
            history: Mutex::new(HashMap::new()),
            #[cfg(test)]
            inject_failure: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Validate and package a transfer order. Rejects self-handoffs; every
    /// other condition (low compatibility included) is advisory only.
    #[instrument(skip(self, context, user_id, reason), fields(from = %from, to = %to))]
    pub fn request(
        &self,
        from: AgentRole,
        to: AgentRole,
        trigger: HandoffTrigger,
        context: Context,
        user_id: impl Into<String>,
        reason: impl Into<String>,
        priority: u8,
    ) -> Result<HandoffRequest, CoordinationError> {
        if from == to {
            return Err(CoordinationError::SelfHandoff(from));
        }

        let compatibility = self.registry.compatibility_score(from, to);
        if compatibility < LOW_COMPATIBILITY_WARNING {
            warn!(compatibility, "Low-compatibility handoff requested");
        }

        let strategy = strategy_for_trigger(trigger);
        let expected_duration_secs = estimate_duration(strategy, &context, compatibility);
        let success_criteria = success_criteria(trigger, &context);

        debug!(?strategy, expected_duration_secs, "Handoff request accepted");
        Ok(HandoffRequest {
            id: Uuid::new_v4(),
            from_agent: from,
            to_agent: to,
            trigger,
            strategy,
            context,
            user_id: user_id.into(),
            priority: priority.clamp(1, 10),
            reason: reason.into(),
            expected_duration_secs,
            success_criteria,
            created_at: Utc::now(),
        })
    }

    /// Run a transfer to completion.
    ///
    /// Only a self-handoff is rejected, before any briefing work starts.
    /// Every runtime fault inside the transfer is absorbed into a
    /// `Failed`-quality result plus a minimal fallback briefing.
    #[instrument(skip(self, request), fields(handoff = %request.id, to = %request.to_agent))]
    pub async fn execute(
        &self,
        request: &HandoffRequest,
    ) -> Result<(ContextualBriefing, HandoffResult), CoordinationError> {
        if request.from_agent == request.to_agent {
            return Err(CoordinationError::SelfHandoff(request.from_agent));
        }

        let started = Instant::now();
        let outcome = self.run_transfer(request);
        let execution_time_secs = started.elapsed().as_secs_f64();

        let (briefing, result) = match outcome {
            Ok((briefing, adapted, issues, mut metrics)) => {
                let preservation = context_preservation(&request.context, &adapted);
                let score = quality_score(true, preservation, execution_time_secs, issues.len());
                metrics.insert("quality_score".to_string(), score);
                metrics.insert("compatibility".to_string(),
                    self.registry.compatibility_score(request.from_agent, request.to_agent));

                let quality = HandoffQuality::from_score(score, true);
                info!(?quality, preservation, "Handoff complete");
                let result = HandoffResult {
                    handoff_id: request.id,
                    success: true,
                    quality,
                    execution_time_secs,
                    context_preservation: preservation,
                    user_satisfaction: None,
                    issues,
                    lessons_learned: lessons_for(quality, preservation),
                    performance_metrics: metrics,
                    completed_at: Utc::now(),
                };
                (briefing, result)
            }
            Err(error) => {
                warn!(error = %error, "Handoff failed, building fallback briefing");
                let briefing = self.fallback_briefing(request);
                let result = HandoffResult {
                    handoff_id: request.id,
                    success: false,
                    quality: HandoffQuality::Failed,
                    execution_time_secs,
                    context_preservation: 0.0,
                    user_satisfaction: None,
                    issues: vec![format!("Handoff execution failed: {}", error)],
                    lessons_learned: vec![
                        "Verify context integrity before initiating a transfer".to_string(),
                    ],
                    performance_metrics: HashMap::from([("quality_score".to_string(), 0.0)]),
                    completed_at: Utc::now(),
                };
                (briefing, result)
            }
        };

        self.record(&request.user_id, result.clone());
        Ok((briefing, result))
    }

    /// Rolling metrics, for one user or for every user seen so far.
    pub fn get_analytics(&self, user_id: Option<&str>) -> HashMap<String, UserHandoffMetrics> {
        let history = self.history.lock();
        history
            .iter()
            .filter(|(id, _)| user_id.map_or(true, |wanted| wanted == id.as_str()))
            .map(|(id, results)| (id.clone(), summarize(results)))
            .collect()
    }

    /// The fallible middle of `execute`: briefing, adaptation, strategy.
    fn run_transfer(
        &self,
        request: &HandoffRequest,
    ) -> anyhow::Result<(ContextualBriefing, Context, Vec<String>, HashMap<String, f64>)> {
        #[cfg(test)]
        if self.inject_failure.load(std::sync::atomic::Ordering::SeqCst) {
            anyhow::bail!("injected briefing failure");
        }

        let briefing = self.build_briefing(request)?;
        let adapted = self.adapt_context(request);
        let issues = detect_issues(&request.context);
        let metrics = self.execute_strategy(request);
        Ok((briefing, adapted, issues, metrics))
    }

    fn build_briefing(&self, request: &HandoffRequest) -> anyhow::Result<ContextualBriefing> {
        let context = &request.context;

        let user_context: Context = PROFILE_FIELDS
            .iter()
            .filter_map(|key| context.get(*key).map(|value| (key.to_string(), value.clone())))
            .collect();

        // Most recent first, bounded
        let conversation_history: Vec<Value> = context
            .get("current_conversation")
            .and_then(Value::as_array)
            .map(|turns| turns.iter().rev().take(MAX_HISTORY_ENTRIES).cloned().collect())
            .unwrap_or_default();

        let relevant_data: Context = relevant_keys(request.to_agent)
            .iter()
            .filter_map(|key| context.get(*key).map(|value| (key.to_string(), value.clone())))
            .collect();

        Ok(ContextualBriefing {
            id: Uuid::new_v4(),
            target_agent: request.to_agent,
            user_context,
            conversation_history,
            current_objectives: self.infer_objectives(request),
            relevant_data,
            suggested_approach: self.suggest_approach(request),
            potential_challenges: self.identify_challenges(request),
            success_metrics: request.success_criteria.clone(),
            handoff_context: format!(
                "{} is handing this conversation to {}: {}",
                self.registry.display_name(request.from_agent),
                self.registry.display_name(request.to_agent),
                request.reason,
            ),
            priority_items: self.priority_items(request),
        })
    }

    fn infer_objectives(&self, request: &HandoffRequest) -> Vec<String> {
        let mut objectives = vec![match request.trigger {
            HandoffTrigger::UserRequest => "Address the user's explicit request for this agent",
            HandoffTrigger::ExpertiseMismatch => "Apply the specialized expertise the topic needs",
            HandoffTrigger::CapabilityNeeded => "Provide the capability the prior agent lacked",
            HandoffTrigger::LoadBalancing => "Continue the conversation without losing momentum",
            HandoffTrigger::Escalation => "Resolve the issue the prior agent escalated",
            HandoffTrigger::ConversationFlow => "Pick up the conversation's natural next topic",
            HandoffTrigger::Emergency => "Stabilize the situation before anything else",
        }
        .to_string()];

        if let Some(goals) = request.context.get("goals").and_then(Value::as_array) {
            for goal in goals.iter().take(2) {
                if let Some(text) = goal.as_str() {
                    objectives.push(format!("Support the user's goal: {}", text));
                }
            }
        }
        objectives
    }

    fn suggest_approach(&self, request: &HandoffRequest) -> String {
        let context = &request.context;
        let expertise = context
            .get("expertise_level")
            .and_then(Value::as_str)
            .unwrap_or("intermediate");
        let style = context
            .get("communication_style")
            .and_then(Value::as_str)
            .unwrap_or("balanced");

        let depth = match expertise {
            "beginner" => "Explain concepts from first principles and avoid jargon",
            "advanced" => "Go straight to specifics; the user knows the fundamentals",
            _ => "Mix practical guidance with brief explanations",
        };
        let tone = match style {
            "direct" => "keep answers short and actionable",
            "detailed" => "include the reasoning behind each recommendation",
            "supportive" => "acknowledge progress and frame advice encouragingly",
            _ => "match the user's established tone",
        };
        format!(
            "{}. As {}, {}.",
            depth,
            self.registry.display_name(request.to_agent),
            tone
        )
    }

    fn identify_challenges(&self, request: &HandoffRequest) -> Vec<String> {
        let mut challenges = Vec::new();
        let compatibility =
            self.registry.compatibility_score(request.from_agent, request.to_agent);

        if compatibility < COMPATIBILITY_PENALTY_BELOW {
            challenges.push(format!(
                "Low domain overlap between {} and {}; restate shared context early",
                self.registry.display_name(request.from_agent),
                self.registry.display_name(request.to_agent),
            ));
        }
        if request.context.len() > 15 {
            challenges.push(
                "Large context to absorb; prioritize the briefing's relevant data".to_string(),
            );
        }
        if DIFFICULT_TRANSITIONS.contains(&(request.from_agent, request.to_agent)) {
            challenges.push(
                "This transition historically confuses users; announce the change clearly"
                    .to_string(),
            );
        }
        if let Some(state) = request.context.get("user_state").and_then(Value::as_str) {
            if matches!(state, "frustrated" | "confused" | "upset") {
                challenges.push(format!(
                    "User is currently {}; acknowledge before redirecting",
                    state
                ));
            }
        }
        if matches!(request.trigger, HandoffTrigger::Emergency) {
            challenges.push("Emergency transfer; skip pleasantries".to_string());
        }
        challenges.truncate(MAX_CHALLENGES);
        challenges
    }

    fn priority_items(&self, request: &HandoffRequest) -> Vec<String> {
        let mut items = Vec::new();
        if matches!(request.trigger, HandoffTrigger::Emergency | HandoffTrigger::Escalation) {
            items.push("Address the escalated issue immediately".to_string());
        }
        items.push(format!("Review the handoff reason: {}", request.reason));
        if let Some(goals) = request.context.get("goals").and_then(Value::as_array) {
            if let Some(text) = goals.first().and_then(Value::as_str) {
                items.push(format!("Keep the primary goal in focus: {}", text));
            }
        }
        items.push("Confirm with the user that the transition makes sense".to_string());
        items.truncate(MAX_PRIORITY_ITEMS);
        items
    }

    /// Attach handoff metadata and receiving-agent guidance to a copy of
    /// the context. The original snapshot stays untouched for the
    /// preservation comparison.
    fn adapt_context(&self, request: &HandoffRequest) -> Context {
        let mut adapted = request.context.clone();
        let expertise: Vec<String> = self
            .registry
            .get_domains(request.to_agent)
            .iter()
            .map(|domain| domain.to_string())
            .collect();
        adapted.insert(
            "handoff_metadata".to_string(),
            json!({
                "transferred_from": request.from_agent.as_str(),
                "timestamp": Utc::now().to_rfc3339(),
                "target_expertise": expertise,
                "reason": request.reason,
            }),
        );
        adapted.insert(
            "agent_guidance".to_string(),
            json!(self.suggest_approach(request)),
        );
        adapted
    }

    /// Strategies differ only in recorded execution parameters; the
    /// actual transport is the external collaborator's concern.
    fn execute_strategy(&self, request: &HandoffRequest) -> HashMap<String, f64> {
        let mut metrics = HashMap::new();
        match request.strategy {
            HandoffStrategy::Immediate => {
                metrics.insert("transfer_steps".to_string(), 1.0);
            }
            HandoffStrategy::Gradual => {
                metrics.insert("overlap_window_secs".to_string(), GRADUAL_OVERLAP_SECS);
            }
            HandoffStrategy::Consultation => {
                metrics.insert("consultation_rounds".to_string(), 1.0);
            }
            HandoffStrategy::EscalationTree => {
                metrics.insert("escalation_levels".to_string(), 1.0);
            }
            HandoffStrategy::RoundRobin => {
                metrics.insert("rotation_step".to_string(), 1.0);
            }
            HandoffStrategy::ExpertiseWeighted => {
                metrics.insert(
                    "expertise_weight".to_string(),
                    self.registry
                        .compatibility_score(request.from_agent, request.to_agent),
                );
            }
        }
        metrics
    }

    /// Minimal briefing used when the real one could not be built. The
    /// receiving agent always gets at least one actionable item.
    fn fallback_briefing(&self, request: &HandoffRequest) -> ContextualBriefing {
        ContextualBriefing {
            id: Uuid::new_v4(),
            target_agent: request.to_agent,
            user_context: Context::new(),
            conversation_history: Vec::new(),
            current_objectives: vec![
                "Re-establish context with the user".to_string(),
                "Continue assisting with their original request".to_string(),
            ],
            relevant_data: Context::new(),
            suggested_approach: "Ask the user to briefly recap where the conversation left off"
                .to_string(),
            potential_challenges: vec!["Context was lost during the transfer".to_string()],
            success_metrics: request.success_criteria.clone(),
            handoff_context: format!(
                "Transfer from {} did not complete cleanly; context may be incomplete",
                self.registry.display_name(request.from_agent),
            ),
            priority_items: vec!["Recover the conversation context from the user".to_string()],
        }
    }

    fn record(&self, user_id: &str, result: HandoffResult) {
        let mut history = self.history.lock();
        let results = history.entry(user_id.to_string()).or_default();
        results.push_back(result);
        while results.len() > HISTORY_CAP_PER_USER {
            results.pop_front();
        }
    }
}

/// Strategy base time, context-size adjustment, compatibility penalty.
fn estimate_duration(strategy: HandoffStrategy, context: &Context, compatibility: f64) -> u64 {
    let mut secs = strategy.base_secs();
    if context.len() > 20 {
        secs += 5;
    } else if context.len() > 10 {
        secs += 2;
    }
    if compatibility < COMPATIBILITY_PENALTY_BELOW {
        secs += 10;
    }
    secs
}

/// 3 to 5 criteria derived from the trigger plus the user's goals.
fn success_criteria(trigger: HandoffTrigger, context: &Context) -> Vec<String> {
    let mut criteria = vec![
        match trigger {
            HandoffTrigger::UserRequest => "User confirms the new agent meets their request",
            HandoffTrigger::ExpertiseMismatch => "Topic is answered with appropriate depth",
            HandoffTrigger::CapabilityNeeded => "Previously unavailable capability is applied",
            HandoffTrigger::LoadBalancing => "No visible interruption to the user",
            HandoffTrigger::Escalation => "Escalated issue reaches resolution",
            HandoffTrigger::ConversationFlow => "Conversation continues without repetition",
            HandoffTrigger::Emergency => "Urgent situation is acknowledged within one turn",
        }
        .to_string(),
        "Conversation continuity is maintained".to_string(),
        "User does not need to repeat established information".to_string(),
    ];
    if let Some(goals) = context.get("goals").and_then(Value::as_array) {
        for goal in goals.iter().take(2) {
            if let Some(text) = goal.as_str() {
                criteria.push(format!("Progress continues on: {}", text));
            }
        }
    }
    criteria.truncate(5);
    criteria
}

/// Issues observable before the transfer; each one costs quality.
fn detect_issues(context: &Context) -> Vec<String> {
    let mut issues = Vec::new();
    if !context.contains_key("user_id") {
        issues.push("Context carries no user identity".to_string());
    }
    if !context.contains_key("current_conversation") {
        issues.push("No conversation history available to transfer".to_string());
    }
    issues
}

/// Fraction of critical fields carried over intact, with bonuses for the
/// adaptation artifacts. Fields absent from the original are excluded
/// from the denominator; an original with none of them scores base 1.0.
fn context_preservation(original: &Context, adapted: &Context) -> f64 {
    let present: Vec<&str> = CRITICAL_FIELDS
        .iter()
        .copied()
        .filter(|field| original.contains_key(*field))
        .collect();

    let mut score = if present.is_empty() {
        1.0
    } else {
        let matched = present
            .iter()
            .filter(|field| original.get(**field) == adapted.get(**field))
            .count();
        matched as f64 / present.len() as f64
    };

    if adapted.contains_key("handoff_metadata") {
        score += 0.1;
    }
    if adapted.contains_key("agent_guidance") {
        score += 0.05;
    }
    score.min(1.0)
}

fn quality_score(success: bool, preservation: f64, execution_secs: f64, issue_count: usize) -> f64 {
    let success_term = if success { 0.4 } else { 0.0 };
    let time_bonus = if execution_secs > 3.0 {
        -0.1
    } else if execution_secs < 1.0 {
        0.2
    } else {
        0.1
    };
    success_term + 0.3 * preservation + time_bonus - 0.1 * issue_count as f64
}

fn lessons_for(quality: HandoffQuality, preservation: f64) -> Vec<String> {
    let mut lessons = Vec::new();
    if preservation < 0.8 {
        lessons.push("Capture more critical context fields before transferring".to_string());
    }
    if matches!(quality, HandoffQuality::Abrupt | HandoffQuality::Visible) {
        lessons.push("Smooth the transition with an explicit introduction".to_string());
    }
    lessons
}

fn summarize(results: &VecDeque<HandoffResult>) -> UserHandoffMetrics {
    let total = results.len();
    let successful = results.iter().filter(|result| result.success).count();
    let quality_sum: f64 = results
        .iter()
        .filter_map(|result| result.performance_metrics.get("quality_score"))
        .sum();
    let time_sum: f64 = results.iter().map(|result| result.execution_time_secs).sum();
    UserHandoffMetrics {
        total_handoffs: total,
        successful_handoffs: successful,
        average_quality_score: if total > 0 { quality_sum / total as f64 } else { 0.0 },
        average_execution_secs: if total > 0 { time_sum / total as f64 } else { 0.0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use tokio_test::assert_ok;

    use crate::config::CoordinationConfig;

    fn engine() -> HandoffEngine {
        let registry = Arc::new(AgentRegistry::with_default_agents(
            &CoordinationConfig::default(),
        ));
        HandoffEngine::new(registry)
    }

    fn rich_context() -> Context {
        Context::from([
            ("user_id".to_string(), json!("user-7")),
            ("session_id".to_string(), json!("session-42")),
            ("goals".to_string(), json!(["gain muscle", "sleep better"])),
            ("preferences".to_string(), json!({"units": "metric"})),
            (
                "current_conversation".to_string(),
                json!([
                    {"role": "user", "text": "how much protein do I need?"},
                    {"role": "agent", "text": "depends on your training load"},
                ]),
            ),
            ("user_state".to_string(), json!("engaged")),
            ("expertise_level".to_string(), json!("beginner")),
            ("training_history".to_string(), json!(["5x5 program"])),
        ])
    }

    // === Request Tests ===

    #[test]
    fn test_self_handoff_rejected() {
        let engine = engine();
        let error = engine
            .request(
                AgentRole::Training,
                AgentRole::Training,
                HandoffTrigger::UserRequest,
                Context::new(),
                "user-7",
                "loop",
                5,
            )
            .unwrap_err();
        assert!(matches!(error, CoordinationError::SelfHandoff(AgentRole::Training)));
    }

    #[test]
    fn test_strategy_table() {
        assert_eq!(
            strategy_for_trigger(HandoffTrigger::Emergency),
            HandoffStrategy::Immediate
        );
        assert_eq!(
            strategy_for_trigger(HandoffTrigger::Escalation),
            HandoffStrategy::EscalationTree
        );
        assert_eq!(
            strategy_for_trigger(HandoffTrigger::ConversationFlow),
            HandoffStrategy::Gradual
        );
        assert_eq!(
            strategy_for_trigger(HandoffTrigger::ExpertiseMismatch),
            HandoffStrategy::ExpertiseWeighted
        );
    }

    #[test]
    fn test_duration_estimate_adjustments() {
        // Small context, compatible pair: base time only
        assert_eq!(estimate_duration(HandoffStrategy::Immediate, &Context::new(), 0.95), 2);

        // 11 keys adds 2s; low compatibility adds 10s
        let mut medium = Context::new();
        for n in 0..11 {
            medium.insert(format!("key_{n}"), json!(n));
        }
        assert_eq!(estimate_duration(HandoffStrategy::Immediate, &medium, 0.65), 14);

        // 21 keys adds 5s instead
        let mut large = Context::new();
        for n in 0..21 {
            large.insert(format!("key_{n}"), json!(n));
        }
        assert_eq!(estimate_duration(HandoffStrategy::Gradual, &large, 0.95), 35);
    }

    #[test]
    fn test_success_criteria_bounds() {
        let with_goals = success_criteria(HandoffTrigger::Escalation, &rich_context());
        assert!(with_goals.len() >= 3 && with_goals.len() <= 5);

        let without_goals = success_criteria(HandoffTrigger::UserRequest, &Context::new());
        assert_eq!(without_goals.len(), 3);
    }

    #[test]
    fn test_priority_clamped() {
        let engine = engine();
        let request = engine
            .request(
                AgentRole::Nexus,
                AgentRole::Training,
                HandoffTrigger::UserRequest,
                Context::new(),
                "user-7",
                "wants a trainer",
                0,
            )
            .unwrap();
        assert_eq!(request.priority, 1);
    }

    // === Execute Tests ===

    #[tokio::test]
    async fn test_clean_transfer_is_seamless() {
        let engine = engine();
        let request = engine
            .request(
                AgentRole::Nutrition,
                AgentRole::Training,
                HandoffTrigger::ConversationFlow,
                rich_context(),
                "user-7",
                "conversation moved to programming",
                5,
            )
            .unwrap();

        let (briefing, result) = assert_ok!(engine.execute(&request).await);

        assert!(result.success);
        // All critical fields intact plus both adaptation bonuses
        assert_eq!(result.context_preservation, 1.0);
        assert_eq!(result.quality, HandoffQuality::Seamless);
        assert!(result.issues.is_empty());

        assert_eq!(briefing.target_agent, AgentRole::Training);
        assert!(briefing.user_context.contains_key("goals"));
        assert!(briefing.relevant_data.contains_key("training_history"));
        assert_eq!(briefing.conversation_history.len(), 2);
        assert!(!briefing.priority_items.is_empty());
        assert_eq!(briefing.success_metrics, request.success_criteria);
    }

    #[tokio::test]
    async fn test_history_trimmed_most_recent_first() {
        let engine = engine();
        let turns: Vec<Value> = (0..15).map(|n| json!({"turn": n})).collect();
        let mut context = rich_context();
        context.insert("current_conversation".to_string(), json!(turns));

        let request = engine
            .request(
                AgentRole::Nexus,
                AgentRole::Wellness,
                HandoffTrigger::ConversationFlow,
                context,
                "user-7",
                "flow",
                5,
            )
            .unwrap();
        let (briefing, _) = engine.execute(&request).await.unwrap();

        assert_eq!(briefing.conversation_history.len(), 10);
        assert_eq!(briefing.conversation_history[0], json!({"turn": 14}));
    }

    #[tokio::test]
    async fn test_execute_rejects_self_handoff_before_briefing() {
        let engine = engine();
        let mut request = engine
            .request(
                AgentRole::Nexus,
                AgentRole::Training,
                HandoffTrigger::UserRequest,
                rich_context(),
                "user-7",
                "test",
                5,
            )
            .unwrap();
        request.to_agent = AgentRole::Nexus;

        let error = engine.execute(&request).await.unwrap_err();
        assert!(matches!(error, CoordinationError::SelfHandoff(AgentRole::Nexus)));
        assert!(engine.get_analytics(Some("user-7")).is_empty());
    }

    #[tokio::test]
    async fn test_injected_failure_yields_failed_result_and_fallback_briefing() {
        let engine = engine();
        engine.inject_failure.store(true, Ordering::SeqCst);

        let request = engine
            .request(
                AgentRole::Nutrition,
                AgentRole::Genetics,
                HandoffTrigger::CapabilityNeeded,
                rich_context(),
                "user-7",
                "needs genetic analysis",
                5,
            )
            .unwrap();
        let (briefing, result) = engine.execute(&request).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.quality, HandoffQuality::Failed);
        assert_eq!(result.context_preservation, 0.0);
        assert!(!result.issues.is_empty());
        assert!(!briefing.priority_items.is_empty());
        assert_eq!(briefing.target_agent, AgentRole::Genetics);
    }

    #[tokio::test]
    async fn test_missing_context_still_succeeds_with_issues() {
        let engine = engine();
        let request = engine
            .request(
                AgentRole::Nexus,
                AgentRole::Wellness,
                HandoffTrigger::LoadBalancing,
                Context::new(),
                "user-9",
                "balancing load",
                5,
            )
            .unwrap();
        let (_, result) = engine.execute(&request).await.unwrap();

        assert!(result.success);
        // No user_id and no conversation history in the context
        assert_eq!(result.issues.len(), 2);
        // Empty denominator: base 1.0, bonuses capped
        assert_eq!(result.context_preservation, 1.0);
    }

    // === Scoring Tests ===

    #[test]
    fn test_preservation_detects_mutation() {
        let original = rich_context();
        let mut adapted = original.clone();
        adapted.insert("goals".to_string(), json!(["different goal"]));
        adapted.insert("handoff_metadata".to_string(), json!({}));
        adapted.insert("agent_guidance".to_string(), json!("guidance"));

        // 5 of 6 critical fields match, plus both bonuses
        let score = context_preservation(&original, &adapted);
        assert!((score - (5.0 / 6.0 + 0.15)).abs() < 1e-9);
    }

    #[test]
    fn test_preservation_bounds() {
        let original = rich_context();
        let score = context_preservation(&original, &Context::new());
        assert!((0.0..=1.0).contains(&score));
        assert_eq!(score, 0.0);

        let untouched = context_preservation(&original, &original.clone());
        assert!((0.0..=1.0).contains(&untouched));
    }

    #[test]
    fn test_quality_thresholds() {
        assert_eq!(HandoffQuality::from_score(0.95, true), HandoffQuality::Seamless);
        assert_eq!(HandoffQuality::from_score(0.8, true), HandoffQuality::Smooth);
        assert_eq!(HandoffQuality::from_score(0.65, true), HandoffQuality::Visible);
        assert_eq!(HandoffQuality::from_score(0.45, true), HandoffQuality::Abrupt);
        assert_eq!(HandoffQuality::from_score(0.2, true), HandoffQuality::Failed);
        // Failure forces the bottom tier regardless of score
        assert_eq!(HandoffQuality::from_score(0.95, false), HandoffQuality::Failed);
        // Tiers are ordered best to worst
        assert!(HandoffQuality::Seamless < HandoffQuality::Failed);
    }

    #[test]
    fn test_perfect_score_grades_seamless_despite_rounding() {
        // 0.4 + 0.3 + 0.2 sits just under 0.9 in binary floating point;
        // the tier boundary must still grade it Seamless
        let score = quality_score(true, 1.0, 0.5, 0);
        assert!(score < 0.9);
        assert_eq!(HandoffQuality::from_score(score, true), HandoffQuality::Seamless);
    }

    #[test]
    fn test_quality_score_formula() {
        // Full success, perfect preservation, sub-second, no issues
        assert!((quality_score(true, 1.0, 0.5, 0) - 0.9).abs() < 1e-9);
        // Slow transfer costs 0.1, each issue costs 0.1
        assert!((quality_score(true, 1.0, 4.0, 2) - 0.4).abs() < 1e-9);
    }

    // === Analytics Tests ===

    #[tokio::test]
    async fn test_analytics_rolls_up_per_user() {
        let engine = engine();
        for _ in 0..3 {
            let request = engine
                .request(
                    AgentRole::Nexus,
                    AgentRole::Nutrition,
                    HandoffTrigger::UserRequest,
                    rich_context(),
                    "user-7",
                    "diet question",
                    5,
                )
                .unwrap();
            engine.execute(&request).await.unwrap();
        }

        let analytics = engine.get_analytics(Some("user-7"));
        let metrics = analytics.get("user-7").unwrap();
        assert_eq!(metrics.total_handoffs, 3);
        assert_eq!(metrics.successful_handoffs, 3);
        assert!(metrics.average_quality_score > 0.8);

        assert!(engine.get_analytics(Some("nobody")).is_empty());
        assert_eq!(engine.get_analytics(None).len(), 1);
    }

    #[tokio::test]
    async fn test_history_capped_at_fifty() {
        let engine = engine();
        for _ in 0..55 {
            let request = engine
                .request(
                    AgentRole::Nexus,
                    AgentRole::Training,
                    HandoffTrigger::LoadBalancing,
                    Context::new(),
                    "user-busy",
                    "rotation",
                    5,
                )
                .unwrap();
            engine.execute(&request).await.unwrap();
        }

        let analytics = engine.get_analytics(Some("user-busy"));
        assert_eq!(analytics.get("user-busy").unwrap().total_handoffs, 50);
    }
}
