//! Deploys decoy services to trap and observe attackers.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::config::{DecisionConfig, NanobotConfig};
use crate::effector::Effector;
use crate::event::Event;

use super::{ActionResult, ActionType, AgentState, Nanobot, NanobotMode};

#[derive(Clone, Debug)]
pub struct ActiveHoneypot {
    pub honeypot_type: String,
    pub port: u16,
    pub deployed_at: DateTime<Utc>,
    pub triggered_by: Option<String>,
    pub interactions: u32,
}

#[derive(Clone, Debug)]
pub struct Interaction {
    pub honeypot_id: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

pub struct HoneypotAgent {
    state: AgentState,
    config: NanobotConfig,
    active_honeypots: RwLock<HashMap<String, ActiveHoneypot>>,
    interactions: RwLock<Vec<Interaction>>,
    effector: Arc<dyn Effector>,
    seq: RwLock<u64>,
}

fn select_honeypot_type(event: &Event) -> &'static str {
    let ports: Vec<i64> = event
        .payload
        .get("ports_scanned")
        .and_then(|v| v.as_list())
        .map(|items| items.iter().filter_map(|s| s.parse::<i64>().ok()).collect())
        .unwrap_or_default();

    if ports.contains(&22) {
        "ssh"
    } else if ports.contains(&80) || ports.contains(&443) {
        "http"
    } else if ports.contains(&21) {
        "ftp"
    } else if ports.contains(&3306) {
        "mysql"
    } else if ports.contains(&25) {
        "smtp"
    } else {
        "ssh"
    }
}

fn honeypot_port(honeypot_type: &str) -> u16 {
    match honeypot_type {
        "ssh" => 2222,
        "http" => 8080,
        "ftp" => 2121,
        "mysql" => 3307,
        "smtp" => 2525,
        _ => 9999,
    }
}

impl HoneypotAgent {
    pub fn new(
        id: impl Into<String>,
        config: NanobotConfig,
        thresholds: DecisionConfig,
        effector: Arc<dyn Effector>,
    ) -> Self {
        HoneypotAgent {
            state: AgentState::new(id, NanobotMode::Defensive, thresholds),
            config,
            active_honeypots: RwLock::new(HashMap::new()),
            interactions: RwLock::new(Vec::new()),
            effector,
            seq: RwLock::new(0),
        }
    }

    pub fn record_interaction(&self, honeypot_id: &str, data: serde_json::Value) {
        if let Some(hp) = self.active_honeypots.write().get_mut(honeypot_id) {
            hp.interactions += 1;
        } else {
            return;
        }
        self.interactions.write().push(Interaction {
            honeypot_id: honeypot_id.to_string(),
            timestamp: Utc::now(),
            data,
        });
    }

    pub fn deactivate_honeypot(&self, honeypot_id: &str) -> bool {
        self.active_honeypots.write().remove(honeypot_id).is_some()
    }

    pub fn active_honeypots(&self) -> HashMap<String, ActiveHoneypot> {
        self.active_honeypots.read().clone()
    }

    pub fn interactions(&self, honeypot_id: Option<&str>, limit: usize) -> Vec<Interaction> {
        let all = self.interactions.read();
        let filtered: Vec<Interaction> = match honeypot_id {
            Some(id) => all.iter().filter(|i| i.honeypot_id == id).cloned().collect(),
            None => all.clone(),
        };
        let start = filtered.len().saturating_sub(limit);
        filtered[start..].to_vec()
    }

    pub fn clear_all_honeypots(&self) -> usize {
        let count = self.active_honeypots.read().len();
        self.active_honeypots.write().clear();
        count
    }
}

impl Nanobot for HoneypotAgent {
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
        event
            .payload
            .get("port_scan_detected")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
            || event
                .payload
                .get("recon_activity")
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
            || event
                .payload
                .get("suspicious_probing")
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
            || event.payload.contains_key("honeypot_trigger")
    }

    fn assess(&self, event: &Event) -> f64 {
        let mut confidence = event.confidence.unwrap_or(0.5);

        if event
            .payload
            .get("port_scan_detected")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            confidence += 0.25;
        }
        if event
            .payload
            .get("recon_activity")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            confidence += 0.20;
        }
        if event
            .payload
            .get("suspicious_probing")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            confidence += 0.15;
        }

        let scan_types = event
            .payload
            .get("scan_types")
            .and_then(|v| v.as_list())
            .map(|l| l.len())
            .unwrap_or(0);
        if scan_types > 2 {
            confidence += 0.15;
        }

        let ports_scanned = event
            .payload
            .get("ports_scanned")
            .and_then(|v| v.as_list())
            .map(|l| l.len())
            .unwrap_or(0);
        if ports_scanned > 10 {
            confidence += 0.10;
        }

        confidence.min(1.0)
    }

    fn execute(&self, event: &Event, confidence: f64) -> ActionResult {
        if self.active_honeypots.read().len() >= self.config.max_honeypots {
            return ActionResult::failed(
                ActionType::Honeypot,
                confidence,
                format!("max honeypots limit reached ({})", self.config.max_honeypots),
            );
        }

        let honeypot_type = select_honeypot_type(event);
        let port = honeypot_port(honeypot_type);

        let honeypot_id = {
            let mut seq = self.seq.write();
            let id = format!("honeypot_{}_{}", *seq, Utc::now().timestamp());
            *seq += 1;
            id
        };

        if !self.effector.deploy_honeypot(honeypot_type, port) {
            return ActionResult::failed(
                ActionType::Honeypot,
                confidence,
                format!("failed to deploy honeypot: {}", honeypot_type),
            );
        }

        let total = {
            let mut active = self.active_honeypots.write();
            active.insert(
                honeypot_id.clone(),
                ActiveHoneypot {
                    honeypot_type: honeypot_type.to_string(),
                    port,
                    deployed_at: Utc::now(),
                    triggered_by: event.ip().map(|ip| ip.to_string()),
                    interactions: 0,
                },
            );
            active.len()
        };

        ActionResult::success(
            ActionType::Honeypot,
            confidence,
            serde_json::json!({
                "honeypot_id": honeypot_id,
                "type": honeypot_type,
                "port": port,
                "total_active": total,
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

    fn agent() -> HoneypotAgent {
        let agent = HoneypotAgent::new(
            "honeypot_deployer",
            NanobotConfig::default(),
            DecisionConfig::default(),
            Arc::new(SimulationEffector::new()),
        );
        agent.activate();
        agent
    }

    fn scan_event() -> Event {
        Event::new("e1", EventSource::Ip("1.1.1.1".parse().unwrap()), EventKind::PortScan)
            .with_payload("port_scan_detected", PayloadValue::Bool(true))
            .with_payload(
                "ports_scanned",
                PayloadValue::List(vec!["22".to_string(), "80".to_string()]),
            )
    }

    #[test]
    fn deploys_ssh_honeypot_when_port_22_scanned() {
        let agent = agent();
        let result = agent.process(&scan_event()).unwrap();
        assert!(result.is_successful());
        let active = agent.active_honeypots();
        assert_eq!(active.len(), 1);
        assert_eq!(active.values().next().unwrap().honeypot_type, "ssh");
        assert_eq!(active.values().next().unwrap().port, 2222);
    }

    #[test]
    fn record_interaction_increments_counter() {
        let agent = agent();
        agent.process(&scan_event());
        let id = agent.active_honeypots().keys().next().unwrap().clone();
        agent.record_interaction(&id, serde_json::json!({"probe": "login"}));
        assert_eq!(agent.active_honeypots()[&id].interactions, 1);
        assert_eq!(agent.interactions(None, 10).len(), 1);
    }
}
