//! Intent classification - routing a request to candidate agents

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::provider::TextGenerator;
use crate::registry::AgentRegistry;
use crate::types::{AgentRole, Context, Domain, Urgency};

/// How the classification was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMethod {
    /// Deterministic keyword table matched with high confidence
    PatternMatch,
    /// External generative classification
    Generative,
    /// Neither phase produced usable output
    Fallback,
}

/// Classified intent for one incoming request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentResult {
    pub primary_intent: String,
    pub secondary_intents: Vec<String>,
    /// Confidence in [0, 1]
    pub confidence: f64,
    pub urgency: Urgency,
    pub reasoning: String,
    /// Validated against the registry; never empty
    pub recommended_agents: Vec<AgentRole>,
    pub method: ClassificationMethod,
}

/// Per-domain keyword table for the fast deterministic phase.
///
/// User-facing content in this platform is bilingual, so both Spanish
/// and English forms appear.
const DOMAIN_KEYWORDS: &[(Domain, &[&str])] = &[
    (
        Domain::Nutrition,
        &[
            "nutricion", "nutrición", "dieta", "comida", "alimentación", "alimentacion",
            "proteina", "proteína", "calorias", "calorías", "macros", "nutrition", "diet",
            "meal",
        ],
    ),
    (
        Domain::Training,
        &[
            "entrenamiento", "entrenar", "rutina", "ejercicio", "fuerza", "gimnasio", "gym",
            "cardio", "series", "repeticiones", "training", "workout",
        ],
    ),
    (
        Domain::Genetics,
        &[
            "genetica", "genética", "adn", "genes", "polimorfismo", "genetic", "dna",
            "biomarcador",
        ],
    ),
    (
        Domain::Wellness,
        &[
            "bienestar", "estres", "estrés", "animo", "ánimo", "meditacion", "meditación",
            "habitos", "hábitos", "wellness", "stress", "mindfulness",
        ],
    ),
    (
        Domain::Recovery,
        &[
            "recuperacion", "recuperación", "descanso", "dormir", "sueño", "lesion", "lesión",
            "dolor", "recovery", "sleep", "injury",
        ],
    ),
];

/// Score above which the pattern phase short-circuits the generative one.
const PATTERN_CONFIDENCE_GATE: f64 = 0.8;

/// Shape the generative capability is asked to produce.
#[derive(Debug, Deserialize)]
struct RawIntent {
    primary_intent: String,
    #[serde(default)]
    secondary_intents: Vec<String>,
    #[serde(default)]
    urgency: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    recommended_agents: Vec<String>,
}

/// Two-phase intent classifier.
///
/// Phase one is a deterministic keyword match; phase two delegates to the
/// generative capability and degrades through a plain-text heuristic down
/// to a fixed fallback. Never returns an error.
pub struct IntentClassifier {
    registry: Arc<AgentRegistry>,
    generator: Arc<dyn TextGenerator>,
    fallback_agent: AgentRole,
}

impl IntentClassifier {
    pub fn new(
        registry: Arc<AgentRegistry>,
        generator: Arc<dyn TextGenerator>,
        fallback_agent: AgentRole,
    ) -> Self {
        Self {
            registry,
            generator,
            fallback_agent,
        }
    }

    #[instrument(skip(self, text, _context))]
    pub async fn classify(&self, text: &str, _context: &Context) -> IntentResult {
        let hits = keyword_hits(text);
        let urgency = detect_urgency(text);

        // Phase one: deterministic keyword match
        if let Some((top_domain, top_hits)) = hits.first().copied() {
            let score = pattern_score(top_hits);
            if score > PATTERN_CONFIDENCE_GATE {
                debug!(domain = %top_domain, hits = top_hits, "Pattern match");
                let secondary = hits
                    .iter()
                    .skip(1)
                    .map(|(domain, _)| domain.to_string())
                    .collect();
                return self.validated(IntentResult {
                    primary_intent: top_domain.to_string(),
                    secondary_intents: secondary,
                    confidence: score,
                    urgency,
                    reasoning: format!("Matched {} {} keywords", top_hits, top_domain),
                    recommended_agents: vec![top_domain.specialist()],
                    method: ClassificationMethod::PatternMatch,
                });
            }
        }

        // Phase two: generative classification with layered fallbacks
        let prompt = classification_prompt(text);
        match self.generator.generate(&prompt, 0.2).await {
            Ok(output) => {
                let result = self
                    .parse_structured(&output, &hits, urgency)
                    .or_else(|| self.parse_heuristic(&output, urgency));
                match result {
                    Some(result) => self.validated(result),
                    None => {
                        warn!("Unparsable classification output, using fallback");
                        self.fallback_result(urgency)
                    }
                }
            }
            Err(error) => {
                warn!(error = %error, "Generative classification failed");
                self.fallback_result(urgency)
            }
        }
    }

    /// Parse the expected JSON object, tolerating code fences.
    fn parse_structured(
        &self,
        output: &str,
        hits: &[(Domain, usize)],
        urgency: Urgency,
    ) -> Option<IntentResult> {
        let stripped = strip_code_fences(output);
        let raw: RawIntent = serde_json::from_str(stripped.trim()).ok()?;

        let recommended = raw
            .recommended_agents
            .iter()
            .filter_map(|id| id.parse::<AgentRole>().ok())
            .collect();
        let urgency = raw
            .urgency
            .as_deref()
            .and_then(parse_urgency)
            .unwrap_or(urgency);
        let confidence = weighted_confidence(&raw.primary_intent, hits, urgency);

        Some(IntentResult {
            primary_intent: raw.primary_intent,
            secondary_intents: raw.secondary_intents,
            confidence,
            urgency,
            reasoning: raw.reasoning.unwrap_or_default(),
            recommended_agents: recommended,
            method: ClassificationMethod::Generative,
        })
    }

    /// Secondary plain-text parse: look for a known domain name anywhere
    /// in the generated output.
    fn parse_heuristic(&self, output: &str, urgency: Urgency) -> Option<IntentResult> {
        let lowered = output.to_lowercase();
        let domain = DOMAIN_KEYWORDS
            .iter()
            .map(|(domain, _)| *domain)
            .find(|domain| lowered.contains(domain.as_str()))?;

        Some(IntentResult {
            primary_intent: domain.to_string(),
            secondary_intents: Vec::new(),
            confidence: weighted_confidence(domain.as_str(), &[], urgency),
            urgency,
            reasoning: "Recovered intent from unstructured output".to_string(),
            recommended_agents: vec![domain.specialist()],
            method: ClassificationMethod::Generative,
        })
    }

    fn fallback_result(&self, urgency: Urgency) -> IntentResult {
        IntentResult {
            primary_intent: "general".to_string(),
            secondary_intents: Vec::new(),
            confidence: 0.3,
            urgency,
            reasoning: "Classification unavailable, routing to fallback agent".to_string(),
            recommended_agents: vec![self.fallback_agent],
            method: ClassificationMethod::Fallback,
        }
    }

    /// Drop recommended agents the registry does not know; substitute the
    /// fallback agent when nothing survives.
    fn validated(&self, mut result: IntentResult) -> IntentResult {
        result
            .recommended_agents
            .retain(|role| self.registry.contains(*role));
        if result.recommended_agents.is_empty() {
            result.recommended_agents.push(self.fallback_agent);
        }
        result
    }
}

/// Keyword hit counts per domain, sorted by hits descending.
fn keyword_hits(text: &str) -> Vec<(Domain, usize)> {
    let lowered = text.to_lowercase();
    let mut hits: Vec<(Domain, usize)> = DOMAIN_KEYWORDS
        .iter()
        .map(|(domain, keywords)| {
            let count = keywords.iter().filter(|kw| lowered.contains(*kw)).count();
            (*domain, count)
        })
        .filter(|(_, count)| *count > 0)
        .collect();
    hits.sort_by(|a, b| b.1.cmp(&a.1));
    hits
}

fn pattern_score(hits: usize) -> f64 {
    (0.55 + 0.15 * hits as f64).min(0.95)
}

fn detect_urgency(text: &str) -> Urgency {
    let lowered = text.to_lowercase();
    const HIGH: &[&str] = &["urgente", "urgent", "emergencia", "ahora mismo", "ya mismo", "asap"];
    const LOW: &[&str] = &["cuando puedas", "sin prisa", "no hay prisa", "algun dia", "someday"];
    if HIGH.iter().any(|kw| lowered.contains(kw)) {
        Urgency::High
    } else if LOW.iter().any(|kw| lowered.contains(kw)) {
        Urgency::Low
    } else {
        Urgency::Medium
    }
}

fn parse_urgency(s: &str) -> Option<Urgency> {
    match s.to_lowercase().as_str() {
        "low" | "baja" => Some(Urgency::Low),
        "medium" | "media" => Some(Urgency::Medium),
        "high" | "alta" => Some(Urgency::High),
        _ => None,
    }
}

/// Confidence heuristic for the generative phase: base 0.5, bumped by
/// signal agreement, capped at 0.95.
fn weighted_confidence(primary: &str, hits: &[(Domain, usize)], urgency: Urgency) -> f64 {
    let mut confidence: f64 = 0.5;
    if primary != "general" {
        confidence += 0.2;
    }
    if hits.iter().map(|(_, n)| n).sum::<usize>() >= 3 {
        confidence += 0.1;
    }
    if matches!(urgency, Urgency::High | Urgency::Low) {
        confidence += 0.1;
    }
    if hits
        .first()
        .map(|(domain, _)| domain.as_str() == primary)
        .unwrap_or(false)
    {
        confidence += 0.1;
    }
    confidence.min(0.95)
}

fn classification_prompt(text: &str) -> String {
    format!(
        "Classify the user request below for a health coaching platform.\n\
         Respond with a single JSON object with fields: primary_intent (one of \
         nutrition, training, genetics, wellness, recovery, general), \
         secondary_intents (array of strings), urgency (low|medium|high), \
         reasoning (string), recommended_agents (array of agent ids from: \
         nexus, nutrition, training, genetics, wellness, recovery).\n\n\
         Request: {text}"
    )
}

fn strip_code_fences(output: &str) -> &str {
    let trimmed = output.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open.strip_suffix("```").unwrap_or(without_open)
}
