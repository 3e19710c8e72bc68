//! Response synthesizer - merges fan-out results into one reply

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::dispatch::DispatchResult;
use crate::provider::TextGenerator;
use crate::registry::AgentRegistry;
use crate::types::{AgentRole, Context};

/// How multiple agent responses should be combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisStrategy {
    /// Attributed concatenation, fully local
    Simple,
    /// One generation call over all responses plus profile context
    Intelligent,
    /// Per-agent key-point extraction, then a merging generation call
    Consensus,
}

impl Default for SynthesisStrategy {
    fn default() -> Self {
        SynthesisStrategy::Intelligent
    }
}

/// What actually produced the final content. Differs from the requested
/// strategy when the input shape or a generation fault forced another path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisType {
    NoResponses,
    SingleAgent,
    Simple,
    Intelligent,
    Consensus,
    /// Local truncated concatenation after a generation fault
    Fallback,
}

/// Final merged reply for one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesizedResponse {
    pub content: String,
    pub success: bool,
    pub synthesis_type: SynthesisType,
    /// Agents whose responses contributed, in stable id order
    pub agents_consulted: Vec<AgentRole>,
}

/// Merges a [`DispatchResult`] into one user-facing response.
///
/// Never returns an error: generation faults degrade to a locally built
/// concatenation, and an empty result degrades to a failure response.
pub struct ResponseSynthesizer {
    registry: Arc<AgentRegistry>,
    generator: Arc<dyn TextGenerator>,
}

const SYNTHESIS_TEMPERATURE: f32 = 0.7;
/// Per-response cap in the local fallback path.
const FALLBACK_SNIPPET_CHARS: usize = 300;

impl ResponseSynthesizer {
    pub fn new(registry: Arc<AgentRegistry>, generator: Arc<dyn TextGenerator>) -> Self {
        Self { registry, generator }
    }

    #[instrument(skip(self, result, original_request, context), fields(strategy = ?strategy))]
    pub async fn synthesize(
        &self,
        result: &DispatchResult,
        original_request: &str,
        context: &Context,
        strategy: SynthesisStrategy,
    ) -> SynthesizedResponse {
        // Stable ordering keeps output deterministic across runs
        let mut responses: Vec<(AgentRole, &str)> = result
            .successes
            .iter()
            .map(|(role, reply)| (*role, reply.content.as_str()))
            .collect();
        responses.sort_by_key(|(role, _)| role.as_str());

        match responses.len() {
            0 => {
                warn!(
                    failed = result.metadata.failed_agents,
                    "No successful agent responses to synthesize"
                );
                SynthesizedResponse {
                    content: "None of the consulted agents could respond right now. \
                              Please try again in a moment."
                        .to_string(),
                    success: false,
                    synthesis_type: SynthesisType::NoResponses,
                    agents_consulted: Vec::new(),
                }
            }
            1 => self.single_agent(responses[0]),
            _ => match strategy {
                SynthesisStrategy::Simple => self.simple(&responses),
                SynthesisStrategy::Intelligent => {
                    self.intelligent(&responses, original_request, context).await
                }
                SynthesisStrategy::Consensus => {
                    self.consensus(&responses, original_request).await
                }
            },
        }
    }

    /// One responder: attribute and pass through. No generation call.
    fn single_agent(&self, (role, content): (AgentRole, &str)) -> SynthesizedResponse {
        SynthesizedResponse {
            content: format!("**{}**\n\n{}", self.registry.display_name(role), content),
            success: true,
            synthesis_type: SynthesisType::SingleAgent,
            agents_consulted: vec![role],
        }
    }

    fn simple(&self, responses: &[(AgentRole, &str)]) -> SynthesizedResponse {
        let sections: Vec<String> = responses
            .iter()
            .map(|(role, content)| {
                format!("## {}\n\n{}", self.registry.display_name(*role), content)
            })
            .collect();
        SynthesizedResponse {
            content: sections.join("\n\n"),
            success: true,
            synthesis_type: SynthesisType::Simple,
            agents_consulted: roles_of(responses),
        }
    }

    /// Single generation pass over everything, then guarantee the two
    /// sections downstream rendering relies on.
    async fn intelligent(
        &self,
        responses: &[(AgentRole, &str)],
        original_request: &str,
        context: &Context,
    ) -> SynthesizedResponse {
        let prompt = self.build_synthesis_prompt(responses, original_request, context);
        match self.generator.generate(&prompt, SYNTHESIS_TEMPERATURE).await {
            Ok(generated) => {
                let content = self.ensure_structure(generated, responses);
                SynthesizedResponse {
                    content,
                    success: true,
                    synthesis_type: SynthesisType::Intelligent,
                    agents_consulted: roles_of(responses),
                }
            }
            Err(error) => {
                warn!(error = %error, "Synthesis generation failed, using local fallback");
                self.fallback(responses)
            }
        }
    }

    /// One extraction call per agent, then a merge call emphasizing
    /// agreement and resolving conflicts.
    async fn consensus(
        &self,
        responses: &[(AgentRole, &str)],
        original_request: &str,
    ) -> SynthesizedResponse {
        let mut key_points = Vec::with_capacity(responses.len());
        for (role, content) in responses {
            let prompt = format!(
                "Extract the 3 most important points from this response by {}. \
                 One line each, no preamble.\n\nResponse:\n{}",
                self.registry.display_name(*role),
                content,
            );
            match self.generator.generate(&prompt, 0.3).await {
                Ok(points) => key_points.push((*role, points)),
                Err(error) => {
                    warn!(agent = %role, error = %error,
                        "Key point extraction failed, using local fallback");
                    return self.fallback(responses);
                }
            }
        }

        let point_block: Vec<String> = key_points
            .iter()
            .map(|(role, points)| {
                format!("{}:\n{}", self.registry.display_name(*role), points)
            })
            .collect();
        let merge_prompt = format!(
            "The user asked: \"{}\"\n\n\
             Several specialists weighed in; their key points follow. Write one \
             coherent answer that emphasizes where they agree and explicitly \
             resolves any conflicting advice.\n\n{}",
            original_request,
            point_block.join("\n\n"),
        );
        match self.generator.generate(&merge_prompt, SYNTHESIS_TEMPERATURE).await {
            Ok(merged) => SynthesizedResponse {
                content: self.ensure_structure(merged, responses),
                success: true,
                synthesis_type: SynthesisType::Consensus,
                agents_consulted: roles_of(responses),
            },
            Err(error) => {
                warn!(error = %error, "Consensus merge failed, using local fallback");
                self.fallback(responses)
            }
        }
    }

    /// Truncated attributed concatenation; the last resort when the
    /// generation capability is down mid-synthesis.
    fn fallback(&self, responses: &[(AgentRole, &str)]) -> SynthesizedResponse {
        let sections: Vec<String> = responses
            .iter()
            .map(|(role, content)| {
                let snippet: String = content.chars().take(FALLBACK_SNIPPET_CHARS).collect();
                format!("**{}**: {}", self.registry.display_name(*role), snippet)
            })
            .collect();
        SynthesizedResponse {
            content: sections.join("\n\n"),
            success: true,
            synthesis_type: SynthesisType::Fallback,
            agents_consulted: roles_of(responses),
        }
    }

    fn build_synthesis_prompt(
        &self,
        responses: &[(AgentRole, &str)],
        original_request: &str,
        context: &Context,
    ) -> String {
        let mut prompt = format!(
            "The user asked: \"{}\"\n\nSpecialist responses:\n\n",
            original_request
        );
        for (role, content) in responses {
            prompt.push_str(&format!(
                "--- {} ---\n{}\n\n",
                self.registry.display_name(*role),
                content
            ));
        }
        for key in ["goals", "preferences", "user_state"] {
            if let Some(value) = context.get(key) {
                prompt.push_str(&format!("User {}: {}\n", key, value));
            }
        }
        prompt.push_str(
            "\nMerge these into one coherent, well-organized answer. Credit each \
             specialist where their advice appears and end with concrete next steps.",
        );
        prompt
    }

    /// Post-process generated text: guarantee the attribution footer and a
    /// next-steps section even when the model omitted them.
    fn ensure_structure(&self, mut content: String, responses: &[(AgentRole, &str)]) -> String {
        let lower = content.to_lowercase();
        let has_attribution = responses
            .iter()
            .all(|(role, _)| lower.contains(&self.registry.display_name(*role).to_lowercase()));
        if !has_attribution {
            let names: Vec<String> = responses
                .iter()
                .map(|(role, _)| self.registry.display_name(*role))
                .collect();
            debug!("Generated synthesis missing attribution, appending footer");
            content.push_str(&format!("\n\n---\n*Insights from: {}*", names.join(", ")));
        }
        if !lower.contains("next steps") {
            content.push_str(
                "\n\n**Next steps**: review the guidance above and tell me which part \
                 you want to act on first.",
            );
        }
        content
    }
}

fn roles_of(responses: &[(AgentRole, &str)]) -> Vec<AgentRole> {
    responses.iter().map(|(role, _)| *role).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::config::CoordinationConfig;
    use crate::dispatch::{DispatchMetadata, DispatchStrategy};
    use crate::provider::mock::MockGenerator;
    use crate::provider::AgentReply;

    fn synthesizer(generator: MockGenerator) -> (ResponseSynthesizer, Arc<MockGenerator>) {
        let registry = Arc::new(AgentRegistry::with_default_agents(
            &CoordinationConfig::default(),
        ));
        let generator = Arc::new(generator);
        (
            ResponseSynthesizer::new(registry, generator.clone()),
            generator,
        )
    }

    fn dispatch_result(successes: Vec<(AgentRole, &str)>) -> DispatchResult {
        let called: Vec<AgentRole> = successes.iter().map(|(role, _)| *role).collect();
        DispatchResult {
            success: !successes.is_empty(),
            successes: successes
                .into_iter()
                .map(|(role, content)| (role, AgentReply::text(content)))
                .collect(),
            failures: HashMap::new(),
            metadata: DispatchMetadata {
                strategy: DispatchStrategy::Parallel,
                total_agents: called.len(),
                successful_agents: called.len(),
                failed_agents: 0,
                elapsed_ms: 10,
                called,
            },
        }
    }

    #[tokio::test]
    async fn test_no_responses_is_failure() {
        let (synthesizer, generator) = synthesizer(MockGenerator::fixed("unused"));
        let result = dispatch_result(Vec::new());

        let response = synthesizer
            .synthesize(&result, "help me", &Context::new(), SynthesisStrategy::Intelligent)
            .await;

        assert!(!response.success);
        assert_eq!(response.synthesis_type, SynthesisType::NoResponses);
        assert!(response.agents_consulted.is_empty());
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_single_response_skips_generation() {
        let (synthesizer, generator) = synthesizer(MockGenerator::fixed("unused"));
        let result = dispatch_result(vec![(AgentRole::Training, "lift three times a week")]);

        let response = synthesizer
            .synthesize(&result, "plan", &Context::new(), SynthesisStrategy::Intelligent)
            .await;

        assert!(response.success);
        assert_eq!(response.synthesis_type, SynthesisType::SingleAgent);
        assert!(response.content.contains("Training Coach"));
        assert!(response.content.contains("lift three times a week"));
        assert_eq!(response.agents_consulted, vec![AgentRole::Training]);
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_simple_strategy_is_local() {
        let (synthesizer, generator) = synthesizer(MockGenerator::fixed("unused"));
        let result = dispatch_result(vec![
            (AgentRole::Nutrition, "more protein"),
            (AgentRole::Training, "more squats"),
        ]);

        let response = synthesizer
            .synthesize(&result, "plan", &Context::new(), SynthesisStrategy::Simple)
            .await;

        assert_eq!(response.synthesis_type, SynthesisType::Simple);
        assert!(response.content.contains("## Nutrition Coach"));
        assert!(response.content.contains("## Training Coach"));
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_intelligent_appends_missing_sections() {
        // Generated text names neither agent and has no next steps
        let (synthesizer, generator) =
            synthesizer(MockGenerator::fixed("Eat well and train consistently."));
        let result = dispatch_result(vec![
            (AgentRole::Nutrition, "more protein"),
            (AgentRole::Training, "more squats"),
        ]);

        let response = synthesizer
            .synthesize(&result, "plan", &Context::new(), SynthesisStrategy::Intelligent)
            .await;

        assert_eq!(response.synthesis_type, SynthesisType::Intelligent);
        assert!(response.content.contains("Insights from: Nutrition Coach, Training Coach"));
        assert!(response.content.contains("Next steps"));
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_generation_failure_degrades_to_fallback() {
        let (synthesizer, generator) = synthesizer(MockGenerator::failing());
        let long_reply = "x".repeat(500);
        let result = dispatch_result(vec![
            (AgentRole::Nutrition, long_reply.as_str()),
            (AgentRole::Wellness, "breathe"),
        ]);

        let response = synthesizer
            .synthesize(&result, "plan", &Context::new(), SynthesisStrategy::Intelligent)
            .await;

        assert!(response.success);
        assert_eq!(response.synthesis_type, SynthesisType::Fallback);
        assert!(response.content.contains("**Nutrition Coach**"));
        // Long responses are truncated in the fallback path
        assert!(response.content.len() < 500 + 100);
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_consensus_makes_one_call_per_agent_plus_merge() {
        let (synthesizer, generator) = synthesizer(MockGenerator::queued(vec![
            "point a",
            "point b",
            "Nutrition Coach and Training Coach agree. Next steps: start today.",
        ]));
        let result = dispatch_result(vec![
            (AgentRole::Nutrition, "more protein"),
            (AgentRole::Training, "more squats"),
        ]);

        let response = synthesizer
            .synthesize(&result, "plan", &Context::new(), SynthesisStrategy::Consensus)
            .await;

        assert_eq!(response.synthesis_type, SynthesisType::Consensus);
        assert_eq!(generator.calls(), 3);
    }
}
