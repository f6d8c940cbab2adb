//! Scout agent performing follow-up enumeration of new discoveries.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::config::{DecisionConfig, NanobotConfig};
use crate::effector::Effector;
use crate::event::Event;

use super::{ActionResult, ActionType, AgentState, Nanobot, NanobotMode};

#[derive(Clone, Debug)]
pub struct EnumerationTask {
    pub target: String,
    pub enum_type: String,
    pub started_at: DateTime<Utc>,
    pub triggered_by: Option<String>,
    pub results: Option<serde_json::Value>,
}

pub struct EnumeratorAgent {
    state: AgentState,
    config: NanobotConfig,
    active: RwLock<HashMap<String, EnumerationTask>>,
    completed: RwLock<Vec<EnumerationTask>>,
    seq: RwLock<u64>,
    effector: Arc<dyn Effector>,
}

fn select_enum_type(event: &Event) -> &'static str {
    if event
        .payload
        .get("new_host_discovered")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
    {
        "port_scan"
    } else if event
        .payload
        .get("new_service_discovered")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
    {
        "service_detection"
    } else if event.payload.contains_key("domain") || event.payload.contains_key("hostname") {
        "subdomain"
    } else {
        "port_scan"
    }
}

fn target_of(event: &Event) -> Option<String> {
    event
        .payload
        .get("target")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| event.ip().map(|ip| ip.to_string()))
        .or_else(|| {
            event
                .payload
                .get("hostname")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
}

impl EnumeratorAgent {
    pub fn new(
        id: impl Into<String>,
        config: NanobotConfig,
        thresholds: DecisionConfig,
        effector: Arc<dyn Effector>,
    ) -> Self {
        EnumeratorAgent {
            state: AgentState::new(id, NanobotMode::Scout, thresholds),
            config,
            active: RwLock::new(HashMap::new()),
            completed: RwLock::new(Vec::new()),
            seq: RwLock::new(0),
            effector,
        }
    }

    pub fn complete_enumeration(&self, enum_id: &str, results: serde_json::Value) -> bool {
        let task = self.active.write().remove(enum_id);
        match task {
            Some(mut task) => {
                task.results = Some(results);
                self.completed.write().push(task);
                true
            }
            None => false,
        }
    }

    pub fn active_enumerations(&self) -> HashMap<String, EnumerationTask> {
        self.active.read().clone()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.read().len()
    }
}

impl Nanobot for EnumeratorAgent {
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
        event.payload.contains_key("new_host_discovered")
            || event.payload.contains_key("new_service_discovered")
            || event.payload.contains_key("anomaly_detected")
            || event.payload.contains_key("enumerate_target")
    }

    fn assess(&self, event: &Event) -> f64 {
        let mut confidence = event.confidence.unwrap_or(0.5);

        if event
            .payload
            .get("new_host_discovered")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            confidence += 0.3;
        }
        if event
            .payload
            .get("new_service_discovered")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            confidence += 0.25;
        }
        if event
            .payload
            .get("anomaly_detected")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            confidence += 0.20;
        }
        if event
            .payload
            .get("incomplete_data")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            confidence += 0.15;
        }
        if event
            .payload
            .get("high_value_target")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            confidence += 0.10;
        }

        confidence.min(1.0)
    }

    fn execute(&self, event: &Event, confidence: f64) -> ActionResult {
        if self.active.read().len() >= self.config.max_concurrent_enumerations {
            return ActionResult::failed(
                ActionType::Enumerate,
                confidence,
                format!(
                    "max concurrent enumerations reached ({})",
                    self.config.max_concurrent_enumerations
                ),
            );
        }

        let target = match target_of(event) {
            Some(t) => t,
            None => return ActionResult::failed(ActionType::Enumerate, confidence, "no target found in event"),
        };

        let enum_type = select_enum_type(event);

        let enum_id = {
            let mut seq = self.seq.write();
            let id = format!("enum_{}_{}", *seq, Utc::now().timestamp());
            *seq += 1;
            id
        };

        if !self.effector.enumerate(&target, enum_type) {
            return ActionResult::failed(ActionType::Enumerate, confidence, format!("failed to start enumeration: {}", target));
        }

        let total = {
            let mut active = self.active.write();
            active.insert(
                enum_id.clone(),
                EnumerationTask {
                    target: target.clone(),
                    enum_type: enum_type.to_string(),
                    started_at: Utc::now(),
                    triggered_by: event.ip().map(|ip| ip.to_string()),
                    results: None,
                },
            );
            active.len()
        };

        ActionResult::success(
            ActionType::Enumerate,
            confidence,
            serde_json::json!({
                "enum_id": enum_id,
                "target": target,
                "type": enum_type,
                "active_enumerations": total,
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

    fn agent() -> EnumeratorAgent {
        let agent = EnumeratorAgent::new(
            "auto_enumerator",
            NanobotConfig::default(),
            DecisionConfig::default(),
            Arc::new(SimulationEffector::new()),
        );
        agent.activate();
        agent
    }

    fn host_event() -> Event {
        Event::new("e1", EventSource::Ip("2.2.2.2".parse().unwrap()), EventKind::HostDiscovered)
            .with_payload("new_host_discovered", PayloadValue::Bool(true))
    }

    #[test]
    fn starts_port_scan_enumeration_for_new_host() {
        let agent = agent();
        let result = agent.process(&host_event()).unwrap();
        assert!(result.is_successful());
        assert_eq!(agent.active_enumerations().len(), 1);
    }

    #[test]
    fn complete_enumeration_moves_to_completed() {
        let agent = agent();
        agent.process(&host_event());
        let id = agent.active_enumerations().keys().next().unwrap().clone();
        assert!(agent.complete_enumeration(&id, serde_json::json!({"ports": [22]})));
        assert_eq!(agent.completed_count(), 1);
        assert!(agent.active_enumerations().is_empty());
    }
}
