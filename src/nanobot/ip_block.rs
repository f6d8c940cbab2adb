//! Blocks suspicious IP addresses through the configured `Effector`.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::{DecisionConfig, NanobotConfig};
use crate::effector::Effector;
use crate::event::Event;

use super::{ActionResult, ActionStatus, ActionType, AgentState, Nanobot, NanobotMode};

pub struct IpBlockAgent {
    state: AgentState,
    config: NanobotConfig,
    whitelist: HashSet<IpAddr>,
    blocked_ips: RwLock<HashSet<IpAddr>>,
    effector: Arc<dyn Effector>,
}

impl IpBlockAgent {
    pub fn new(
        id: impl Into<String>,
        config: NanobotConfig,
        thresholds: DecisionConfig,
        whitelist: HashSet<IpAddr>,
        effector: Arc<dyn Effector>,
    ) -> Self {
        IpBlockAgent {
            state: AgentState::new(id, NanobotMode::Defensive, thresholds),
            config,
            whitelist,
            blocked_ips: RwLock::new(HashSet::new()),
            effector,
        }
    }

    pub fn blocked_ips(&self) -> Vec<IpAddr> {
        self.blocked_ips.read().iter().copied().collect()
    }

    pub fn unblock_ip(&self, ip: IpAddr) -> bool {
        if !self.blocked_ips.read().contains(&ip) {
            return false;
        }
        if self.effector.unblock_ip(ip) {
            self.blocked_ips.write().remove(&ip);
            true
        } else {
            false
        }
    }

    pub fn clear_all_blocks(&self) -> usize {
        let ips: Vec<IpAddr> = self.blocked_ips.read().iter().copied().collect();
        ips.into_iter().filter(|ip| self.unblock_ip(*ip)).count()
    }
}

impl Nanobot for IpBlockAgent {
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
        event.ip().is_some()
    }

    fn assess(&self, event: &Event) -> f64 {
        let mut confidence = event.confidence.unwrap_or(0.5);
        let threat_score = event.threat_score.unwrap_or(5.0);

        if event
            .payload
            .get("port_scan_detected")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            confidence += 0.2;
        }
        if event
            .payload
            .get("brute_force_attempt")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            confidence += 0.25;
        }

        let failed_attempts = event
            .payload
            .get("failed_auth_attempts")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        if failed_attempts >= 5 {
            confidence += 0.15;
        } else if failed_attempts >= 3 {
            confidence += 0.10;
        }

        if threat_score >= 8.0 {
            confidence += 0.2;
        } else if threat_score >= 6.0 {
            confidence += 0.1;
        }

        if event
            .payload
            .get("known_malicious")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            confidence += 0.3;
        }

        confidence.min(1.0)
    }

    fn execute(&self, event: &Event, confidence: f64) -> ActionResult {
        let ip = match event.ip() {
            Some(ip) => ip,
            None => return ActionResult::failed(ActionType::BlockIp, confidence, "no IP address found in event"),
        };

        if self.whitelist.contains(&ip) {
            return ActionResult::skipped(ActionType::BlockIp, confidence, "whitelisted");
        }

        if self.blocked_ips.read().contains(&ip) {
            return ActionResult::skipped(ActionType::BlockIp, confidence, "already_blocked");
        }

        if self.blocked_ips.read().len() >= self.config.max_blocks {
            return ActionResult::failed(
                ActionType::BlockIp,
                confidence,
                format!("max blocks limit reached ({})", self.config.max_blocks),
            );
        }

        if self.effector.block_ip(ip) {
            let total = {
                let mut blocked = self.blocked_ips.write();
                blocked.insert(ip);
                blocked.len()
            };
            ActionResult::success(
                ActionType::BlockIp,
                confidence,
                serde_json::json!({ "ip": ip.to_string(), "total_blocked": total }),
            )
        } else {
            ActionResult::failed(ActionType::BlockIp, confidence, format!("failed to block IP: {}", ip))
        }
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

    fn agent() -> IpBlockAgent {
        let agent = IpBlockAgent::new(
            "ip_blocker",
            NanobotConfig::default(),
            DecisionConfig::default(),
            HashSet::new(),
            Arc::new(SimulationEffector::new()),
        );
        agent.activate();
        agent
    }

    fn scan_event(ip: &str) -> Event {
        Event::new(
            "e1",
            EventSource::Ip(ip.parse().unwrap()),
            EventKind::PortScan,
        )
        .with_payload("port_scan_detected", PayloadValue::Bool(true))
        .with_payload("brute_force_attempt", PayloadValue::Bool(true))
    }

    #[test]
    fn high_confidence_event_blocks_ip() {
        let agent = agent();
        let event = scan_event("10.1.1.1");
        let result = agent.process(&event).unwrap();
        assert!(result.is_successful());
        assert_eq!(agent.blocked_ips().len(), 1);
    }

    #[test]
    fn repeat_event_after_block_is_skipped_already_blocked() {
        let agent = agent();
        let event = scan_event("10.1.1.9");
        agent.process(&event).unwrap();
        let second = agent.process(&event).unwrap();
        assert_eq!(second.status, ActionStatus::Skipped);
        assert_eq!(second.details["reason"], "already_blocked");
        assert_eq!(agent.blocked_ips().len(), 1);
    }

    #[test]
    fn whitelisted_ip_is_skipped_not_blocked() {
        let mut whitelist = HashSet::new();
        let ip: IpAddr = "10.1.1.2".parse().unwrap();
        whitelist.insert(ip);
        let agent = IpBlockAgent::new(
            "ip_blocker",
            NanobotConfig::default(),
            DecisionConfig::default(),
            whitelist,
            Arc::new(SimulationEffector::new()),
        );
        agent.activate();
        let event = scan_event("10.1.1.2");
        agent.process(&event);
        assert!(agent.blocked_ips().is_empty());
    }

    #[test]
    fn unblock_removes_from_blocked_set() {
        let agent = agent();
        let event = scan_event("10.1.1.3");
        agent.process(&event);
        let ip: IpAddr = "10.1.1.3".parse().unwrap();
        assert!(agent.unblock_ip(ip));
        assert!(agent.blocked_ips().is_empty());
    }
}
