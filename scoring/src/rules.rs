use serde::{Deserialize, Serialize};
use strum_macros::{Display as EnumDisplay, EnumString};

use crate::model::{Component, RiskLevel, SubScores};

/// What a rule sees: the final numbers plus which components ran degraded.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleInput {
    pub sub_scores: SubScores,
    pub composite: f64,
    pub confidence: i32,
    pub risk_level: RiskLevel,
    pub degraded: Vec<Component>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "predicate", content = "args", rename_all = "snake_case")]
pub enum Predicate {
    CompositeAtLeast(f64),
    ConfidenceAtLeast(i32),
    ComponentAtLeast(Component, f64),
    RiskLevelIs(RiskLevel),
    Degraded(Component),
    AnyDegraded,
}

impl Predicate {
    pub fn holds(&self, input: &RuleInput) -> bool {
        match self {
            Predicate::CompositeAtLeast(min) => input.composite >= *min,
            Predicate::ConfidenceAtLeast(min) => input.confidence >= *min,
            Predicate::ComponentAtLeast(component, min) => input.sub_scores.get(*component) >= *min,
            Predicate::RiskLevelIs(level) => input.risk_level == *level,
            Predicate::Degraded(component) => input.degraded.contains(component),
            Predicate::AnyDegraded => !input.degraded.is_empty(),
        }
    }
}

/// Boolean tree over predicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Leaf(Predicate),
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn evaluate(&self, input: &RuleInput) -> bool {
        match self {
            Condition::Leaf(predicate) => predicate.holds(input),
            Condition::All(children) => children.iter().all(|c| c.evaluate(input)),
            Condition::Any(children) => children.iter().any(|c| c.evaluate(input)),
            Condition::Not(inner) => !inner.evaluate(input),
        }
    }

    fn leaf(predicate: Predicate) -> Self {
        Condition::Leaf(predicate)
    }

    fn not(inner: Condition) -> Self {
        Condition::Not(Box::new(inner))
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumDisplay,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecommendedAction {
    Block,
    Review,
    Monitor,
    Accept,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: RecommendedAction,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationRule {
    pub name: String,
    pub condition: Condition,
    pub recommendation: Recommendation,
}

impl RecommendationRule {
    fn new(name: &str, condition: Condition, action: RecommendedAction, message: &str) -> Self {
        Self {
            name: name.to_string(),
            condition,
            recommendation: Recommendation {
                action,
                message: message.to_string(),
            },
        }
    }
}

/// Every matching rule contributes, in rule order, duplicates removed.
pub fn evaluate_rules(rules: &[RecommendationRule], input: &RuleInput) -> Vec<Recommendation> {
    let mut out: Vec<Recommendation> = Vec::new();
    for rule in rules.iter().filter(|r| r.condition.evaluate(input)) {
        if !out.contains(&rule.recommendation) {
            out.push(rule.recommendation.clone());
        }
    }
    out
}

pub fn default_recommendation_rules() -> Vec<RecommendationRule> {
    use Predicate::*;
    use RecommendedAction::*;

    let block = Condition::Any(vec![
        Condition::leaf(CompositeAtLeast(85.0)),
        Condition::All(vec![
            Condition::leaf(CompositeAtLeast(70.0)),
            Condition::leaf(ConfidenceAtLeast(70)),
        ]),
    ]);
    let below_medium = Condition::not(Condition::leaf(CompositeAtLeast(40.0)));

    vec![
        RecommendationRule::new(
            "block_high_confidence_fraud",
            block.clone(),
            Block,
            "Reject the feedback and flag the phone identity for fraud investigation",
        ),
        RecommendationRule::new(
            "manual_review",
            Condition::All(vec![Condition::leaf(CompositeAtLeast(40.0)), Condition::not(block)]),
            Review,
            "Hold the feedback for manual review before publishing",
        ),
        RecommendationRule::new(
            "degraded_review",
            Condition::leaf(AnyDegraded),
            Review,
            "Some analyzers were unavailable; re-score or review manually",
        ),
        RecommendationRule::new(
            "monitor_low_risk",
            Condition::All(vec![Condition::leaf(CompositeAtLeast(20.0)), below_medium.clone()]),
            Monitor,
            "Accept but monitor further feedback from this identity",
        ),
        RecommendationRule::new(
            "monitor_behavior",
            Condition::All(vec![
                Condition::leaf(ComponentAtLeast(Component::Behavioral, 20.0)),
                below_medium,
            ]),
            Monitor,
            "Repeated behavioral anomalies; watch call activity from this identity",
        ),
        RecommendationRule::new(
            "accept",
            Condition::All(vec![
                Condition::not(Condition::leaf(CompositeAtLeast(20.0))),
                Condition::not(Condition::leaf(ComponentAtLeast(Component::Behavioral, 20.0))),
                Condition::not(Condition::leaf(AnyDegraded)),
            ]),
            Accept,
            "No significant fraud indicators; accept the feedback",
        ),
    ]
}
