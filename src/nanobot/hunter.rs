//! Actively hunts for threats matching known IOCs and patterns.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::config::DecisionConfig;
use crate::effector::Effector;
use crate::event::Event;

use super::{ActionResult, ActionType, AgentState, Nanobot, NanobotMode};

#[derive(Clone, Debug)]
pub struct CaughtThreat {
    pub hunt_id: String,
    pub threat_type: String,
    pub target: String,
    pub description: String,
    pub caught_at: DateTime<Utc>,
}

pub struct ThreatHunterAgent {
    state: AgentState,
    hunt_types: Vec<String>,
    active_hunts: RwLock<HashMap<String, String>>,
    caught_threats: RwLock<Vec<CaughtThreat>>,
    seq: RwLock<u64>,
    effector: Arc<dyn Effector>,
}

impl ThreatHunterAgent {
    pub fn new(
        id: impl Into<String>,
        thresholds: DecisionConfig,
        hunt_types: Vec<String>,
        effector: Arc<dyn Effector>,
    ) -> Self {
        ThreatHunterAgent {
            state: AgentState::new(id, NanobotMode::ForestGuard, thresholds),
            hunt_types,
            active_hunts: RwLock::new(HashMap::new()),
            caught_threats: RwLock::new(Vec::new()),
            seq: RwLock::new(0),
            effector,
        }
    }

    pub fn complete_hunt(&self, hunt_id: &str) -> bool {
        self.active_hunts.write().remove(hunt_id).is_some()
    }

    pub fn caught_threats(&self, threat_type: Option<&str>, limit: usize) -> Vec<CaughtThreat> {
        let all = self.caught_threats.read();
        let filtered: Vec<CaughtThreat> = match threat_type {
            Some(t) => all.iter().filter(|c| c.threat_type == t).cloned().collect(),
            None => all.clone(),
        };
        let start = filtered.len().saturating_sub(limit);
        filtered[start..].to_vec()
    }

    pub fn hunt_statistics(&self) -> HashMap<String, usize> {
        let mut by_type: HashMap<String, usize> = HashMap::new();
        for threat in self.caught_threats.read().iter() {
            *by_type.entry(threat.threat_type.clone()).or_insert(0) += 1;
        }
        by_type
    }
}

impl Nanobot for ThreatHunterAgent {
    fn id(&self) -> &str {
        &self.state.id
    }

    fn mode(&self) -> NanobotMode {
        self.state.mode
    }

    fn is_active(&self) -> bool {
        self.state.is_active()
    }

    fn activate(&self) {
        self.state.activate()
    }

    fn deactivate(&self) {
        self.state.deactivate()
    }

    fn can_handle(&self, event: &Event) -> bool {
        event.payload.contains_key("threat_indicator")
            || event.payload.contains_key("ioc")
            || event.payload.contains_key("suspicious_pattern")
            || event.payload.contains_key("hunt_request")
            || event.payload.contains_key("threat_type")
    }

    fn assess(&self, event: &Event) -> f64 {
        let mut confidence = event.confidence.unwrap_or(0.5);

        let ioc_count = event
            .payload
            .get("iocs")
            .and_then(|v| v.as_list())
            .map(|l| l.len())
            .unwrap_or(0);
        if ioc_count > 0 {
            confidence += 0.20 * ioc_count.min(3) as f64;
        }

        if event
            .payload
            .get("suspicious_pattern")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            confidence += 0.15;
        }

        if event
            .payload
            .get("threat_signature_match")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            confidence += 0.25;
        }

        let threat_type = event
            .payload
            .get("threat_type")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_lowercase();
        if self.hunt_types.iter().any(|t| t == &threat_type) {
            confidence += 0.10;
        }

        let indicators = event
            .payload
            .get("indicators")
            .and_then(|v| v.as_list())
            .map(|l| l.len())
            .unwrap_or(0);
        if indicators >= 3 {
            confidence += 0.15;
        }

        confidence.min(1.0)
    }

    fn execute(&self, event: &Event, confidence: f64) -> ActionResult {
        let threat_type = event
            .payload
            .get("threat_type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let target = event
            .payload
            .get("target")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| "unknown".to_string());

        let hunt_id = {
            let mut seq = self.seq.write();
            let id = format!("hunt_{}_{}", *seq, Utc::now().timestamp());
            *seq += 1;
            id
        };

        if !self.effector.enumerate(&target, "threat_hunt") {
            return ActionResult::failed(ActionType::ThreatHunt, confidence, format!("hunt failed: {} on {}", threat_type, target));
        }

        let iocs = event
            .payload
            .get("iocs")
            .and_then(|v| v.as_list())
            .map(|l| l.to_vec())
            .unwrap_or_default();

        let mut found = Vec::new();
        for ioc in &iocs {
            found.push(CaughtThreat {
                hunt_id: hunt_id.clone(),
                threat_type: threat_type.clone(),
                target: target.clone(),
                description: format!("{} detected via IOC match: {}", threat_type, ioc),
                caught_at: Utc::now(),
            });
        }

        if event
            .payload
            .get("suspicious_pattern")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            found.push(CaughtThreat {
                hunt_id: hunt_id.clone(),
                threat_type: threat_type.clone(),
                target: target.clone(),
                description: format!("{} detected via pattern match", threat_type),
                caught_at: Utc::now(),
            });
        }

        let threats_found = found.len();
        self.active_hunts.write().insert(hunt_id.clone(), threat_type.clone());
        self.caught_threats.write().extend(found);

        ActionResult::success(
            ActionType::ThreatHunt,
            confidence,
            serde_json::json!({
                "hunt_id": hunt_id,
                "threat_type": threat_type,
                "target": target,
                "threats_found": threats_found,
            }),
        )
    }

    fn action_history(&self, limit: usize) -> Vec<ActionResult> {
        self.state.history.recent(limit)
    }

    fn record_history(&self, result: ActionResult) {
        self.state.history.record(result);
    }

    fn clear_history(&self) {
        self.state.history.clear();
    }

    fn auto_fire_threshold(&self) -> f64 {
        self.state.thresholds.auto_fire_threshold
    }

    fn propose_threshold(&self) -> f64 {
        self.state.thresholds.propose_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effector::SimulationEffector;
    use crate::event::{EventKind, EventSource, PayloadValue};

    fn agent() -> ThreatHunterAgent {
        let agent = ThreatHunterAgent::new(
            "threat_hunter",
            DecisionConfig::default(),
            vec!["crow".to_string(), "magpie".to_string()],
            Arc::new(SimulationEffector::new()),
        );
        agent.activate();
        agent
    }

    fn hunt_event() -> Event {
        Event::new("e1", EventSource::Abstract("x".into()), EventKind::ThreatIndicator)
            .with_payload("threat_type", PayloadValue::Text("crow".to_string()))
            .with_payload(
                "iocs",
                PayloadValue::List(vec!["1.2.3.4".to_string(), "evil.exe".to_string()]),
            )
            .with_payload("suspicious_pattern", PayloadValue::Bool(true))
    }

    #[test]
    fn emits_one_caught_threat_per_ioc_plus_pattern() {
        let agent = agent();
        let result = agent.process(&hunt_event()).unwrap();
        assert!(result.is_successful());
        let caught = agent.caught_threats(None, 10);
        assert_eq!(caught.len(), 3);
    }

    #[test]
    fn complete_hunt_removes_from_active() {
        let agent = agent();
        agent.process(&hunt_event());
        let hunt_id = agent.caught_threats(None, 1)[0].hunt_id.clone();
        assert!(agent.complete_hunt(&hunt_id));
        assert!(!agent.complete_hunt(&hunt_id));
    }
}
