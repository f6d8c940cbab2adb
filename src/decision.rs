//! Rule-based recommendations and the confidence-gated decision tier.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::DecisionConfig;
use crate::event::{Event, PayloadValue};
use crate::nanobot::ActionType;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Equals,
    GreaterThan,
    LessThan,
    Contains,
    InSet,
    Matches,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ConditionValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Set(Vec<String>),
}

/// A single condition over a dotted path into the event (`payload.<key>`
/// or one of `threat_score`, `confidence`, `kind`, `tags`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Condition {
    pub field_path: String,
    pub operator: Operator,
    pub value: ConditionValue,
}

impl Condition {
    fn field_value<'a>(&self, event: &'a Event) -> Option<PayloadValue> {
        match self.field_path.as_str() {
            "threat_score" => event.threat_score.map(PayloadValue::Float),
            "confidence" => event.confidence.map(PayloadValue::Float),
            path => path
                .strip_prefix("payload.")
                .and_then(|key| event.payload.get(key))
                .cloned(),
        }
    }

    fn matches(&self, event: &Event) -> bool {
        if self.field_path == "tags" {
            return match &self.value {
                ConditionValue::Text(tag) => event.has_tag(tag),
                _ => false,
            };
        }

        let field = match self.field_value(event) {
            Some(v) => v,
            None => return false,
        };

        match (self.operator, &self.value) {
            (Operator::Equals, ConditionValue::Text(expected)) => {
                field.as_str().map(|s| s == expected).unwrap_or(false)
            }
            (Operator::Equals, ConditionValue::Number(expected)) => {
                field.as_f64().map(|n| n == *expected).unwrap_or(false)
            }
            (Operator::Equals, ConditionValue::Bool(expected)) => {
                field.as_bool().map(|b| b == *expected).unwrap_or(false)
            }
            (Operator::GreaterThan, ConditionValue::Number(expected)) => {
                field.as_f64().map(|n| n > *expected).unwrap_or(false)
            }
            (Operator::LessThan, ConditionValue::Number(expected)) => {
                field.as_f64().map(|n| n < *expected).unwrap_or(false)
            }
            (Operator::Contains, ConditionValue::Text(expected)) => field
                .as_str()
                .map(|s| s.contains(expected.as_str()))
                .unwrap_or(false),
            (Operator::InSet, ConditionValue::Set(expected)) => field
                .as_str()
                .map(|s| expected.iter().any(|v| v == s))
                .unwrap_or(false),
            (Operator::Matches, ConditionValue::Text(pattern)) => {
                match Regex::new(pattern) {
                    Ok(re) => field.as_str().map(|s| re.is_match(s)).unwrap_or(false),
                    Err(_) => false,
                }
            }
            _ => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Logic {
    And,
    Or,
}

/// A configurable response rule. Rules with a higher `priority` are
/// evaluated first; the first rule whose conditions match wins.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: String,
    pub conditions: Vec<Condition>,
    pub logic: Logic,
    pub priority: i32,
    pub action_type: ActionType,
    pub confidence_modifier: f64,
    pub expiry: Option<DateTime<Utc>>,
}

impl Rule {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.map(|e| now <= e).map(|still_valid| !still_valid).unwrap_or(false)
    }

    fn matches(&self, event: &Event) -> bool {
        if self.conditions.is_empty() {
            return false;
        }
        match self.logic {
            Logic::And => self.conditions.iter().all(|c| c.matches(event)),
            Logic::Or => self.conditions.iter().any(|c| c.matches(event)),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Recommendation {
    pub rule_id: String,
    pub action_type: ActionType,
    pub confidence_modifier: f64,
}

/// Ordered rule set, evaluated priority-descending.
pub struct RulesEngine {
    rules: RwLock<Vec<Rule>>,
}

impl RulesEngine {
    pub fn new() -> Self {
        RulesEngine {
            rules: RwLock::new(Vec::new()),
        }
    }

    pub fn add_rule(&self, rule: Rule) {
        let mut rules = self.rules.write();
        rules.push(rule);
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub fn remove_rule(&self, rule_id: &str) -> bool {
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|r| r.rule_id != rule_id);
        rules.len() != before
    }

    /// The first matching, unexpired rule in priority order.
    pub fn recommend(&self, event: &Event) -> Option<Recommendation> {
        let now = Utc::now();
        let rules = self.rules.read();
        rules
            .iter()
            .filter(|r| !r.is_expired(now))
            .find(|r| r.matches(event))
            .map(|r| Recommendation {
                rule_id: r.rule_id.clone(),
                action_type: r.action_type,
                confidence_modifier: r.confidence_modifier,
            })
    }

    /// The first matching rule's recommendation plus the confidence it
    /// would produce, applying its `confidence_modifier` to
    /// `base_confidence` and clamping to `[0, 1]`.
    pub fn recommend_action(&self, event: &Event, base_confidence: f64) -> Option<(Recommendation, f64)> {
        self.recommend(event).map(|rec| {
            let adjusted = (base_confidence + rec.confidence_modifier).clamp(0.0, 1.0);
            (rec, adjusted)
        })
    }

    /// Every matching, unexpired rule in priority order.
    pub fn evaluate_all(&self, event: &Event) -> Vec<Recommendation> {
        let now = Utc::now();
        let rules = self.rules.read();
        rules
            .iter()
            .filter(|r| !r.is_expired(now) && r.matches(event))
            .map(|r| Recommendation {
                rule_id: r.rule_id.clone(),
                action_type: r.action_type,
                confidence_modifier: r.confidence_modifier,
            })
            .collect()
    }

    pub fn count(&self) -> usize {
        self.rules.read().len()
    }
}

impl Default for RulesEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Contextual signals that shift the confidence-gated decision.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct DecisionContext {
    pub historical_threat_level: f64,
    pub recent_incidents: u32,
    pub is_off_hours: bool,
    pub source_reputation: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    AutoFire,
    Propose,
    Observe,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Decision {
    pub tier: Tier,
    pub adjusted_confidence: f64,
    pub confidence_change: f64,
    pub reasoning: Vec<String>,
    pub should_act: bool,
}

/// Applies the contextual-modifier table to a base confidence score and
/// gates the result into auto_fire/propose/observe.
pub struct HybridDecisionMaker {
    config: DecisionConfig,
}

impl HybridDecisionMaker {
    pub fn new(config: DecisionConfig) -> Self {
        HybridDecisionMaker { config }
    }

    fn apply_context(&self, base_confidence: f64, context: DecisionContext) -> (f64, Vec<String>) {
        let mut adjusted = base_confidence;
        let mut reasoning = vec![format!("base confidence {:.2}", base_confidence)];

        if context.historical_threat_level != 0.0 {
            let delta = context.historical_threat_level * 0.05;
            adjusted += delta;
            reasoning.push(format!("historical threat level contributed {:+.2}", delta));
        }
        if context.recent_incidents > 0 {
            let delta = (context.recent_incidents.min(5) as f64) * 0.02;
            adjusted += delta;
            reasoning.push(format!("{} recent incidents contributed {:+.2}", context.recent_incidents, delta));
        }
        if context.is_off_hours {
            adjusted += 0.05;
            reasoning.push("off-hours contributed +0.05".to_string());
        }
        if context.source_reputation != 0.0 {
            let delta = context.source_reputation * 0.1;
            adjusted -= delta;
            reasoning.push(format!("source reputation contributed {:+.2}", -delta));
        }

        (adjusted.clamp(0.0, 1.0), reasoning)
    }

    /// Applies the contextual-modifier table to `base_confidence` and
    /// gates the result into auto_fire/propose/observe.
    pub fn decide(&self, base_confidence: f64, context: DecisionContext) -> Decision {
        let (adjusted, mut reasoning) = self.apply_context(base_confidence, context);

        let tier = if adjusted >= self.config.auto_fire_threshold {
            Tier::AutoFire
        } else if adjusted >= self.config.propose_threshold {
            Tier::Propose
        } else {
            Tier::Observe
        };

        reasoning.push(format!("adjusted confidence {:.2} -> {:?}", adjusted, tier));

        if tier == Tier::AutoFire {
            info!(confidence = adjusted, "decision tier: auto_fire");
        }

        Decision {
            tier,
            adjusted_confidence: adjusted,
            confidence_change: adjusted - base_confidence,
            reasoning,
            should_act: matches!(tier, Tier::AutoFire | Tier::Propose),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, EventSource};

    fn make_event() -> Event {
        Event::new("e1", EventSource::Abstract("x".into()), EventKind::PortScan)
            .with_payload("ports_scanned", PayloadValue::Int(50))
    }

    #[test]
    fn first_matching_rule_by_priority_wins() {
        let engine = RulesEngine::new();
        engine.add_rule(Rule {
            rule_id: "low".into(),
            conditions: vec![Condition {
                field_path: "payload.ports_scanned".into(),
                operator: Operator::GreaterThan,
                value: ConditionValue::Number(10.0),
            }],
            logic: Logic::And,
            priority: 1,
            action_type: ActionType::Alert,
            confidence_modifier: 0.1,
            expiry: None,
        });
        engine.add_rule(Rule {
            rule_id: "high".into(),
            conditions: vec![Condition {
                field_path: "payload.ports_scanned".into(),
                operator: Operator::GreaterThan,
                value: ConditionValue::Number(10.0),
            }],
            logic: Logic::And,
            priority: 10,
            action_type: ActionType::BlockIp,
            confidence_modifier: 0.3,
            expiry: None,
        });

        let rec = engine.recommend(&make_event()).unwrap();
        assert_eq!(rec.rule_id, "high");
    }

    #[test]
    fn decides_auto_fire_above_threshold() {
        let maker = HybridDecisionMaker::new(DecisionConfig::default());
        let decision = maker.decide(0.95, DecisionContext::default());
        assert_eq!(decision.tier, Tier::AutoFire);
    }

    #[test]
    fn off_hours_pushes_borderline_into_propose() {
        let maker = HybridDecisionMaker::new(DecisionConfig::default());
        let context = DecisionContext {
            is_off_hours: true,
            ..Default::default()
        };
        let decision = maker.decide(0.66, context);
        assert_eq!(decision.tier, Tier::Propose);
    }

    #[test]
    fn observe_tier_should_not_act() {
        let maker = HybridDecisionMaker::new(DecisionConfig::default());
        let decision = maker.decide(0.2, DecisionContext::default());
        assert_eq!(decision.tier, Tier::Observe);
        assert!(!decision.should_act);
    }

    #[test]
    fn recommend_action_applies_modifier_and_clamps() {
        let engine = RulesEngine::new();
        engine.add_rule(Rule {
            rule_id: "aggressive_scanner".into(),
            conditions: vec![Condition {
                field_path: "payload.ports_scanned".into(),
                operator: Operator::GreaterThan,
                value: ConditionValue::Number(10.0),
            }],
            logic: Logic::And,
            priority: 95,
            action_type: ActionType::BlockIp,
            confidence_modifier: 0.30,
            expiry: None,
        });

        let (rec, adjusted) = engine.recommend_action(&make_event(), 0.82).unwrap();
        assert_eq!(rec.rule_id, "aggressive_scanner");
        assert_eq!(adjusted, 1.0);
    }
}
