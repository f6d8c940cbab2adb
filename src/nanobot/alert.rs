//! Escalates events to alerts, gated by a configurable minimum level.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use crate::config::DecisionConfig;
use crate::effector::Effector;
use crate::event::Event;

use super::{ActionResult, ActionType, AgentState, Nanobot, NanobotMode};

/// Alert severity ladder, INFO lowest to BREACH highest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertLevel {
    Info,
    Warning,
    Elevated,
    Critical,
    Breach,
}

impl AlertLevel {
    fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Elevated => "elevated",
            AlertLevel::Critical => "critical",
            AlertLevel::Breach => "breach",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Alert {
    pub alert_id: String,
    pub level: AlertLevel,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub description: String,
    pub acknowledged: bool,
}

pub struct AlertAgent {
    state: AgentState,
    min_level: AlertLevel,
    active_alerts: RwLock<Vec<Alert>>,
    seq: RwLock<u64>,
    effector: Arc<dyn Effector>,
}

fn determine_alert_level(event: &Event, confidence: f64) -> AlertLevel {
    let threat_score = event.threat_score.unwrap_or(0.0);
    let breach_detected = event
        .payload
        .get("breach_detected")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    if breach_detected || confidence >= 0.95 {
        AlertLevel::Breach
    } else if threat_score >= 9.0 || confidence >= 0.90 {
        AlertLevel::Critical
    } else if threat_score >= 7.0 || confidence >= 0.75 {
        AlertLevel::Elevated
    } else if threat_score >= 5.0 || confidence >= 0.60 {
        AlertLevel::Warning
    } else {
        AlertLevel::Info
    }
}

impl AlertAgent {
    pub fn new(
        id: impl Into<String>,
        thresholds: DecisionConfig,
        min_level: AlertLevel,
        effector: Arc<dyn Effector>,
    ) -> Self {
        AlertAgent {
            state: AgentState::new(id, NanobotMode::Defensive, thresholds),
            min_level,
            active_alerts: RwLock::new(Vec::new()),
            seq: RwLock::new(0),
            effector,
        }
    }

    pub fn active_alerts(&self, level: Option<AlertLevel>, limit: usize) -> Vec<Alert> {
        let all = self.active_alerts.read();
        let filtered: Vec<Alert> = match level {
            Some(l) => all.iter().filter(|a| a.level == l).cloned().collect(),
            None => all.clone(),
        };
        let start = filtered.len().saturating_sub(limit);
        filtered[start..].to_vec()
    }

    pub fn acknowledge_alert(&self, alert_id: &str) -> bool {
        let mut alerts = self.active_alerts.write();
        if let Some(alert) = alerts.iter_mut().find(|a| a.alert_id == alert_id) {
            alert.acknowledged = true;
            true
        } else {
            false
        }
    }

    /// Remove alerts older than `hours`, returning the count cleared.
    pub fn clear_old_alerts(&self, hours: i64) -> usize {
        let cutoff = Utc::now() - Duration::hours(hours);
        let mut alerts = self.active_alerts.write();
        let before = alerts.len();
        alerts.retain(|a| a.timestamp > cutoff);
        before - alerts.len()
    }
}

impl Nanobot for AlertAgent {
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

    fn can_handle(&self, _event: &Event) -> bool {
        true
    }

    fn assess(&self, event: &Event) -> f64 {
        let threat_score = event.threat_score.unwrap_or(5.0);
        if threat_score >= 9.0 {
            0.95
        } else if threat_score >= 7.0 {
            0.85
        } else if threat_score >= 5.0 {
            0.70
        } else if threat_score >= 3.0 {
            0.50
        } else {
            event.confidence.unwrap_or(0.5)
        }
    }

    fn execute(&self, event: &Event, confidence: f64) -> ActionResult {
        let level = determine_alert_level(event, confidence);
        if level < self.min_level {
            return ActionResult::skipped(ActionType::Alert, confidence, "below_min_level");
        }

        let alert_id = {
            let mut seq = self.seq.write();
            let id = format!("alert_{}_{}", *seq, Utc::now().timestamp());
            *seq += 1;
            id
        };

        let source = event
            .ip()
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let description = event
            .payload
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or("Threat detected")
            .to_string();

        let payload = serde_json::json!({
            "source": source.clone(),
            "threat_score": event.threat_score,
            "confidence": confidence,
        });
        if !self.effector.send_alert(level.as_str(), &description, payload) {
            return ActionResult::failed(ActionType::Alert, confidence, "failed to send alert");
        }

        let total = {
            let mut alerts = self.active_alerts.write();
            alerts.push(Alert {
                alert_id: alert_id.clone(),
                level,
                confidence,
                timestamp: Utc::now(),
                source,
                description,
                acknowledged: false,
            });
            alerts.len()
        };

        ActionResult::success(
            ActionType::Alert,
            confidence,
            serde_json::json!({
                "alert_id": alert_id,
                "level": level.as_str(),
                "total_alerts": total,
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
    use crate::event::{EventKind, EventSource};

    fn agent(min_level: AlertLevel) -> AlertAgent {
        let agent = AlertAgent::new("alert_escalator", DecisionConfig::default(), min_level, Arc::new(SimulationEffector::new()));
        agent.activate();
        agent
    }

    fn event_with_score(score: f64) -> Event {
        let mut e = Event::new("e1", EventSource::Abstract("x".into()), EventKind::Anomaly);
        e.threat_score = Some(score);
        e
    }

    #[test]
    fn high_threat_score_creates_critical_alert() {
        let agent = agent(AlertLevel::Info);
        let event = event_with_score(9.5);
        let result = agent.execute(&event, agent.assess(&event));
        assert!(result.is_successful());
        let alerts = agent.active_alerts(None, 10);
        assert_eq!(alerts[0].level, AlertLevel::Critical);
    }

    #[test]
    fn below_min_level_is_skipped() {
        let agent = agent(AlertLevel::Critical);
        let event = event_with_score(4.0);
        let result = agent.execute(&event, agent.assess(&event));
        assert!(!result.is_successful());
    }

    #[test]
    fn acknowledge_marks_alert() {
        let agent = agent(AlertLevel::Info);
        let event = event_with_score(9.5);
        agent.execute(&event, agent.assess(&event));
        let id = agent.active_alerts(None, 10)[0].alert_id.clone();
        assert!(agent.acknowledge_alert(&id));
    }
}
