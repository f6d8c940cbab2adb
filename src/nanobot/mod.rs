//! Nanobot response agents: the `Nanobot` trait contract, shared
//! action/result types, and the six concrete agent implementations.

mod alert;
mod enumerator;
mod honeypot;
mod hunter;
mod ip_block;
mod rate_limit;

pub use alert::AlertAgent;
pub use enumerator::EnumeratorAgent;
pub use honeypot::HoneypotAgent;
pub use hunter::ThreatHunterAgent;
pub use ip_block::IpBlockAgent;
pub use rate_limit::RateLimitAgent;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::config::DecisionConfig;
use crate::event::Event;

/// Operating modes a nanobot runs under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NanobotMode {
    Defensive,
    Scout,
    Adaptive,
    ForestGuard,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    BlockIp,
    RateLimit,
    Honeypot,
    Alert,
    Enumerate,
    ForestPatrol,
    ThreatHunt,
    LearnBaseline,
    DetectAnomaly,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionStatus {
    Pending,
    Executing,
    Success,
    Failed,
    Skipped,
}

/// Outcome of a nanobot handling (or declining to handle) an event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionResult {
    pub action_type: ActionType,
    pub status: ActionStatus,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    pub details: Json,
    pub error_message: Option<String>,
}

impl ActionResult {
    pub fn is_successful(&self) -> bool {
        self.status == ActionStatus::Success
    }

    fn skipped(action_type: ActionType, confidence: f64, reason: &str) -> Self {
        ActionResult {
            action_type,
            status: ActionStatus::Skipped,
            confidence,
            timestamp: Utc::now(),
            details: serde_json::json!({ "reason": reason }),
            error_message: None,
        }
    }

    pub(crate) fn success(action_type: ActionType, confidence: f64, details: Json) -> Self {
        ActionResult {
            action_type,
            status: ActionStatus::Success,
            confidence,
            timestamp: Utc::now(),
            details,
            error_message: None,
        }
    }

    pub(crate) fn failed(action_type: ActionType, confidence: f64, error_message: impl Into<String>) -> Self {
        ActionResult {
            action_type,
            status: ActionStatus::Failed,
            confidence,
            timestamp: Utc::now(),
            details: Json::Null,
            error_message: Some(error_message.into()),
        }
    }
}

/// Bounded ring buffer of recent action results, shared by every agent.
pub struct ActionHistory {
    capacity: usize,
    entries: Mutex<VecDeque<ActionResult>>,
}

impl ActionHistory {
    pub fn new(capacity: usize) -> Self {
        ActionHistory {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, result: ActionResult) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(result);
    }

    /// Most recent first.
    pub fn recent(&self, limit: usize) -> Vec<ActionResult> {
        let entries = self.entries.lock();
        entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Shared active/inactive flag plus history, composed into every agent.
pub struct AgentState {
    pub id: String,
    pub mode: NanobotMode,
    active: AtomicBool,
    pub history: ActionHistory,
    pub thresholds: DecisionConfig,
}

impl AgentState {
    pub fn new(id: impl Into<String>, mode: NanobotMode, thresholds: DecisionConfig) -> Self {
        AgentState {
            id: id.into(),
            mode,
            active: AtomicBool::new(false),
            history: ActionHistory::new(256),
            thresholds,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn activate(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

/// Shared contract every response agent implements.
pub trait Nanobot: Send + Sync {
    fn id(&self) -> &str;
    fn mode(&self) -> NanobotMode;
    fn is_active(&self) -> bool;
    fn activate(&self);
    fn deactivate(&self);

    fn can_handle(&self, event: &Event) -> bool;
    fn assess(&self, event: &Event) -> f64;
    fn execute(&self, event: &Event, confidence: f64) -> ActionResult;
    fn action_history(&self, limit: usize) -> Vec<ActionResult>;
    fn record_history(&self, result: ActionResult);
    fn clear_history(&self);

    fn auto_fire_threshold(&self) -> f64;
    fn propose_threshold(&self) -> f64;

    /// Composes `can_handle`/`assess`/`execute` with the confidence tier
    /// gate. Returns `None` when inactive or when the agent declines
    /// the event outright. Every branch taken (skipped, proposed, or
    /// executed) is recorded into the agent's history.
    fn process(&self, event: &Event) -> Option<ActionResult> {
        if !self.is_active() {
            return None;
        }
        if !self.can_handle(event) {
            return None;
        }

        let confidence = self.assess(event);

        let result = if confidence < self.propose_threshold() {
            ActionResult::skipped(ActionType::Alert, confidence, "confidence_too_low")
        } else if confidence < self.auto_fire_threshold() {
            let mut proposed = ActionResult::skipped(ActionType::Alert, confidence, "proposed_to_hunter");
            proposed.status = ActionStatus::Success;
            proposed
        } else {
            self.execute(event, confidence)
        };

        self.record_history(result.clone());
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_history_evicts_oldest_past_capacity() {
        let history = ActionHistory::new(2);
        for i in 0..3 {
            history.record(ActionResult::success(
                ActionType::Alert,
                0.9,
                serde_json::json!({ "seq": i }),
            ));
        }
        assert_eq!(history.len(), 2);
        let recent = history.recent(10);
        assert_eq!(recent[0].details["seq"], 2);
    }
}
