//! Collaboration advisor - deciding solo vs. multi-agent handling

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::registry::AgentRegistry;
use crate::types::{AgentRole, Context, Domain};

/// What prompted a collaboration recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    MultiDomain,
    ComplexCase,
    ConflictingGoals,
    DebateRequest,
    ComprehensivePlan,
    EducationalDepth,
    UncertaintyHigh,
}

/// How strongly collaboration is indicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaborationUrgency {
    Optional,
    Recommended,
    Essential,
}

/// Interaction style for a multi-agent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaborationMode {
    Debate,
    Workshop,
    Teaching,
    CaseStudy,
    Podcast,
}

impl CollaborationMode {
    /// Base session length in minutes, before the per-member adjustment.
    pub fn base_minutes(&self) -> u32 {
        match self {
            CollaborationMode::Debate => 10,
            CollaborationMode::Workshop => 15,
            CollaborationMode::Teaching => 12,
            CollaborationMode::CaseStudy => 20,
            CollaborationMode::Podcast => 8,
        }
    }
}

/// One member of a proposed collaboration team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamSlot {
    pub role: AgentRole,
    /// Function within the session ("lead", "specialist", "coordinator")
    pub team_role: String,
}

/// Outcome of evaluating whether a request warrants collaboration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborationSuggestion {
    pub should_collaborate: bool,
    /// Highest-priority trigger that fired, when collaborating
    pub trigger: Option<TriggerType>,
    pub urgency: CollaborationUrgency,
    pub mode: Option<CollaborationMode>,
    /// At most [`MAX_TEAM_SIZE`] members, current agent first
    pub team: Vec<TeamSlot>,
    pub reasoning: String,
    pub estimated_minutes: u32,
    pub expected_outcomes: Vec<String>,
    /// Set when the request should stay with the current agent
    pub individual_fallback: bool,
}

/// Hard cap on collaboration team size.
pub const MAX_TEAM_SIZE: usize = 4;

/// Necessity score at or above which collaboration is recommended.
const COLLABORATION_THRESHOLD: u32 = 3;

const MAX_OUTCOMES: usize = 5;

struct DomainProfile {
    domain: Domain,
    keywords: &'static [&'static str],
    /// Phrases that signal a complex request within the domain (weight 3)
    complexity_indicators: &'static [&'static str],
}

static DOMAIN_PROFILES: &[DomainProfile] = &[
    DomainProfile {
        domain: Domain::Nutrition,
        keywords: &[
            "nutricion", "nutrición", "dieta", "comida", "proteina", "proteína", "calorias",
            "calorías", "macros", "nutrition", "diet",
        ],
        complexity_indicators: &[
            "deficit calorico", "déficit calórico", "recomposicion corporal",
            "recomposición corporal", "plan nutricional",
        ],
    },
    DomainProfile {
        domain: Domain::Training,
        keywords: &[
            "entrenamiento", "entrenar", "rutina", "ejercicio", "fuerza", "gimnasio", "gym",
            "cardio", "training", "workout",
        ],
        complexity_indicators: &[
            "periodizacion", "periodización", "sobrecarga progresiva", "plan de entrenamiento",
        ],
    },
    DomainProfile {
        domain: Domain::Genetics,
        keywords: &["genetica", "genética", "adn", "genes", "genetic", "dna"],
        complexity_indicators: &["polimorfismo", "predisposicion genetica", "predisposición genética"],
    },
    DomainProfile {
        domain: Domain::Wellness,
        keywords: &[
            "bienestar", "estres", "estrés", "animo", "ánimo", "habitos", "hábitos", "wellness",
            "stress",
        ],
        complexity_indicators: &["burnout", "ansiedad cronica", "ansiedad crónica"],
    },
    DomainProfile {
        domain: Domain::Recovery,
        keywords: &[
            "recuperacion", "recuperación", "descanso", "dormir", "sueño", "lesion", "lesión",
            "recovery", "sleep",
        ],
        complexity_indicators: &["lesion recurrente", "lesión recurrente", "insomnio cronico", "insomnio crónico"],
    },
];

struct TriggerPattern {
    trigger: TriggerType,
    urgency: CollaborationUrgency,
    pattern: Regex,
}

static TRIGGER_PATTERNS: Lazy<Vec<TriggerPattern>> = Lazy::new(|| {
    let compile = |pattern: &str| Regex::new(pattern).expect("static trigger pattern");
    vec![
        TriggerPattern {
            trigger: TriggerType::ComprehensivePlan,
            urgency: CollaborationUrgency::Recommended,
            pattern: compile(
                r"(?i)plan\s+(completo|integral)|programa\s+(completo|integral)|comprehensive\s+plan",
            ),
        },
        TriggerPattern {
            trigger: TriggerType::UncertaintyHigh,
            urgency: CollaborationUrgency::Recommended,
            pattern: compile(
                r"(?i)no\s+s[eé]\s+(por\s+d[oó]nde|qu[eé]|c[oó]mo)|estoy\s+perdid|confundid|not\s+sure\s+where",
            ),
        },
        TriggerPattern {
            trigger: TriggerType::DebateRequest,
            urgency: CollaborationUrgency::Recommended,
            pattern: compile(
                r"(?i)qu[eé]\s+opinan|debat[ae]|pros\s+y\s+contras|segunda\s+opini[oó]n|second\s+opinion",
            ),
        },
        TriggerPattern {
            trigger: TriggerType::ConflictingGoals,
            urgency: CollaborationUrgency::Essential,
            pattern: compile(
                r"(?i)perder\s+grasa.{0,40}ganar\s+m[uú]sculo|ganar\s+m[uú]sculo.{0,40}perder\s+grasa|objetivos?\s+contradictori",
            ),
        },
        TriggerPattern {
            trigger: TriggerType::ComplexCase,
            urgency: CollaborationUrgency::Essential,
            pattern: compile(
                r"(?i)diabetes|hipertensi[oó]n|tiroides|embarazo|lesi[oó]n\s+cr[oó]nica|medicaci[oó]n|medical\s+condition",
            ),
        },
        TriggerPattern {
            trigger: TriggerType::EducationalDepth,
            urgency: CollaborationUrgency::Recommended,
            pattern: compile(
                r"(?i)expl[ií]came\s+(en\s+detalle|a\s+fondo)|c[oó]mo\s+funciona|quiero\s+entender|teach\s+me",
            ),
        },
    ]
});

/// Decides whether a request is better served by a team of agents.
pub struct CollaborationAdvisor {
    registry: Arc<AgentRegistry>,
}

impl CollaborationAdvisor {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self { registry }
    }

    /// Full evaluation producing a complete suggestion. Purely local and
    /// deterministic; degraded inputs produce the solo fallback rather
    /// than an error.
    #[instrument(skip(self, user_input, _context))]
    pub fn evaluate(
        &self,
        user_input: &str,
        current_agent: AgentRole,
        _context: &Context,
    ) -> CollaborationSuggestion {
        let detected = detect_domains(user_input);
        let triggers = detect_triggers(user_input);

        let covered = self.registry.get_domains(current_agent);
        let uncovered: Vec<Domain> = detected
            .iter()
            .map(|(domain, _)| *domain)
            .filter(|domain| !covered.contains(domain))
            .collect();

        let score = necessity_score(&uncovered, &detected, &triggers);
        let urgency = escalate_urgency(&uncovered, &triggers);

        debug!(
            score,
            domains = detected.len(),
            triggers = triggers.len(),
            "Collaboration necessity evaluated"
        );

        if score < COLLABORATION_THRESHOLD {
            return solo_suggestion(urgency);
        }

        let trigger = primary_trigger(&detected, &triggers);
        let mode = mode_for_trigger(trigger);
        let team = self.assemble_team(current_agent, &detected);
        let estimated_minutes = mode.base_minutes() + 3 * (team.len() as u32 - 1);
        let expected_outcomes = expected_outcomes(mode, &detected);
        let reasoning = format!(
            "Detected {} domain(s) beyond {}'s coverage and {} trigger(s); necessity score {}",
            uncovered.len(),
            current_agent,
            triggers.len(),
            score
        );

        CollaborationSuggestion {
            should_collaborate: true,
            trigger: Some(trigger),
            urgency,
            mode: Some(mode),
            team,
            reasoning,
            estimated_minutes,
            expected_outcomes,
            individual_fallback: false,
        }
    }

    /// Cheap yes/no check without building the full suggestion.
    pub fn quick_check(&self, user_input: &str) -> bool {
        detect_domains(user_input).len() >= 2 || !detect_triggers(user_input).is_empty()
    }

    /// Current agent leads; one specialist per detected domain; a
    /// coordinator joins once the team reaches three members; capped at
    /// [`MAX_TEAM_SIZE`].
    fn assemble_team(&self, current: AgentRole, detected: &[(Domain, u32)]) -> Vec<TeamSlot> {
        let mut team = vec![TeamSlot {
            role: current,
            team_role: "lead".to_string(),
        }];

        for (domain, _) in detected {
            let specialist = domain.specialist();
            if team.iter().any(|slot| slot.role == specialist) {
                continue;
            }
            if team.len() >= MAX_TEAM_SIZE {
                break;
            }
            team.push(TeamSlot {
                role: specialist,
                team_role: "specialist".to_string(),
            });
        }

        if team.len() >= 3
            && team.len() < MAX_TEAM_SIZE
            && !team.iter().any(|slot| slot.role.is_coordinator())
        {
            team.push(TeamSlot {
                role: AgentRole::Nexus,
                team_role: "coordinator".to_string(),
            });
        }

        team.truncate(MAX_TEAM_SIZE);
        team
    }
}

/// Domains whose weighted keyword score reaches 1, with their scores.
/// Keywords weigh 1, complexity indicator phrases weigh 3.
fn detect_domains(input: &str) -> Vec<(Domain, u32)> {
    let lowered = input.to_lowercase();
    let mut detected: Vec<(Domain, u32)> = DOMAIN_PROFILES
        .iter()
        .map(|profile| {
            let keyword_hits = profile
                .keywords
                .iter()
                .filter(|kw| lowered.contains(*kw))
                .count() as u32;
            let complexity_hits = profile
                .complexity_indicators
                .iter()
                .filter(|phrase| lowered.contains(*phrase))
                .count() as u32;
            (profile.domain, keyword_hits + 3 * complexity_hits)
        })
        .filter(|(_, score)| *score >= 1)
        .collect();
    detected.sort_by(|a, b| b.1.cmp(&a.1));
    detected
}

fn detect_triggers(input: &str) -> Vec<(TriggerType, CollaborationUrgency)> {
    TRIGGER_PATTERNS
        .iter()
        .filter(|entry| entry.pattern.is_match(input))
        .map(|entry| (entry.trigger, entry.urgency))
        .collect()
}

/// Monotone in both uncovered-domain count and trigger urgency.
fn necessity_score(
    uncovered: &[Domain],
    detected: &[(Domain, u32)],
    triggers: &[(TriggerType, CollaborationUrgency)],
) -> u32 {
    let trigger_points: u32 = triggers
        .iter()
        .map(|(_, urgency)| match urgency {
            CollaborationUrgency::Essential => 5,
            CollaborationUrgency::Recommended => 3,
            CollaborationUrgency::Optional => 0,
        })
        .sum();
    2 * uncovered.len() as u32 + trigger_points + query_complexity(detected, triggers)
}

fn query_complexity(
    detected: &[(Domain, u32)],
    triggers: &[(TriggerType, CollaborationUrgency)],
) -> u32 {
    let domain_part = match detected.len() {
        0 | 1 => 0,
        2 => 1,
        _ => 2,
    };
    let trigger_part = if triggers.len() >= 2 { 1 } else { 0 };
    domain_part + trigger_part
}

fn escalate_urgency(
    uncovered: &[Domain],
    triggers: &[(TriggerType, CollaborationUrgency)],
) -> CollaborationUrgency {
    if triggers
        .iter()
        .any(|(_, urgency)| *urgency == CollaborationUrgency::Essential)
    {
        CollaborationUrgency::Essential
    } else if uncovered.len() >= 2 || !triggers.is_empty() {
        CollaborationUrgency::Recommended
    } else {
        CollaborationUrgency::Optional
    }
}

/// Trigger priority: debate > educational depth > comprehensive plan >
/// complex case; multi-domain when only domain spread caused the score.
fn primary_trigger(
    detected: &[(Domain, u32)],
    triggers: &[(TriggerType, CollaborationUrgency)],
) -> TriggerType {
    const PRIORITY: &[TriggerType] = &[
        TriggerType::DebateRequest,
        TriggerType::EducationalDepth,
        TriggerType::ComprehensivePlan,
        TriggerType::ComplexCase,
        TriggerType::ConflictingGoals,
        TriggerType::UncertaintyHigh,
    ];
    for candidate in PRIORITY {
        if triggers.iter().any(|(trigger, _)| trigger == candidate) {
            return *candidate;
        }
    }
    if detected.len() >= 2 {
        TriggerType::MultiDomain
    } else {
        TriggerType::ComplexCase
    }
}

fn mode_for_trigger(trigger: TriggerType) -> CollaborationMode {
    match trigger {
        TriggerType::DebateRequest => CollaborationMode::Debate,
        TriggerType::EducationalDepth => CollaborationMode::Teaching,
        TriggerType::ComprehensivePlan => CollaborationMode::Workshop,
        TriggerType::ComplexCase | TriggerType::ConflictingGoals => CollaborationMode::CaseStudy,
        _ => CollaborationMode::Workshop,
    }
}

fn expected_outcomes(mode: CollaborationMode, detected: &[(Domain, u32)]) -> Vec<String> {
    let mut outcomes = vec![match mode {
        CollaborationMode::Debate => "Contrasted viewpoints with a clear recommendation",
        CollaborationMode::Workshop => "Coordinated action plan across specialists",
        CollaborationMode::Teaching => "Step-by-step explanation of the underlying concepts",
        CollaborationMode::CaseStudy => "In-depth review of the case with expert input",
        CollaborationMode::Podcast => "Conversational deep dive into the topic",
    }
    .to_string()];

    for (domain, _) in detected {
        let outcome = match domain {
            Domain::Nutrition => "Personalized nutrition plan",
            Domain::Training => "Structured training program",
            Domain::Genetics => "Genetics-informed adjustments",
            Domain::Wellness => "Stress and habit management strategy",
            Domain::Recovery => "Recovery and sleep protocol",
            Domain::Coordination => continue,
        };
        outcomes.push(outcome.to_string());
        if outcomes.len() == MAX_OUTCOMES {
            break;
        }
    }
    outcomes
}

fn solo_suggestion(urgency: CollaborationUrgency) -> CollaborationSuggestion {
    CollaborationSuggestion {
        should_collaborate: false,
        trigger: None,
        urgency,
        mode: None,
        team: Vec::new(),
        reasoning: "Request is well covered by the current agent".to_string(),
        estimated_minutes: 0,
        expected_outcomes: Vec::new(),
        individual_fallback: true,
    }
}
