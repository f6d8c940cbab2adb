//! Tracks request rates per source and applies tiered rate limits.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use crate::config::{DecisionConfig, NanobotConfig};
use crate::effector::Effector;
use crate::event::Event;
use std::sync::Arc;

use super::{ActionResult, ActionType, AgentState, Nanobot, NanobotMode};

#[derive(Clone, Debug)]
pub struct RateLimitEntry {
    pub limit: u32,
    pub expiry: DateTime<Utc>,
    pub applied_at: DateTime<Utc>,
    pub current_rate: f64,
}

pub struct RateLimitAgent {
    state: AgentState,
    config: NanobotConfig,
    request_history: RwLock<HashMap<String, Vec<DateTime<Utc>>>>,
    rate_limits: RwLock<HashMap<String, RateLimitEntry>>,
    effector: Arc<dyn Effector>,
}

fn source_of(event: &Event) -> Option<String> {
    event.ip().map(|ip| ip.to_string()).or_else(|| {
        event
            .payload
            .get("source")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    })
}

impl RateLimitAgent {
    pub fn new(
        id: impl Into<String>,
        config: NanobotConfig,
        thresholds: DecisionConfig,
        effector: Arc<dyn Effector>,
    ) -> Self {
        RateLimitAgent {
            state: AgentState::new(id, NanobotMode::Defensive, thresholds),
            config,
            request_history: RwLock::new(HashMap::new()),
            rate_limits: RwLock::new(HashMap::new()),
            effector,
        }
    }

    fn clean_old_requests(&self, source: &str, now: DateTime<Utc>) {
        let cutoff = now - Duration::seconds(self.config.time_window_seconds as i64);
        if let Some(history) = self.request_history.write().get_mut(source) {
            history.retain(|t| *t > cutoff);
        }
    }

    fn recent_requests(&self, source: &str, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::seconds(self.config.time_window_seconds as i64);
        self.request_history
            .read()
            .get(source)
            .map(|h| h.iter().filter(|t| **t > cutoff).count())
            .unwrap_or(0)
    }

    /// Returns `true` if the source currently has an unexpired limit,
    /// lazily evicting it if it has expired.
    pub fn is_rate_limited(&self, source: &str) -> bool {
        let now = Utc::now();
        let expired = self
            .rate_limits
            .read()
            .get(source)
            .map(|entry| now > entry.expiry)
            .unwrap_or(false);
        if expired {
            self.rate_limits.write().remove(source);
            return false;
        }
        self.rate_limits.read().contains_key(source)
    }

    pub fn get_rate_limit(&self, source: &str) -> Option<RateLimitEntry> {
        if !self.is_rate_limited(source) {
            return None;
        }
        self.rate_limits.read().get(source).cloned()
    }

    pub fn remove_rate_limit(&self, source: &str) -> bool {
        self.rate_limits.write().remove(source).is_some()
    }

    pub fn clear_all_limits(&self) -> usize {
        let count = self.rate_limits.read().len();
        self.rate_limits.write().clear();
        self.request_history.write().clear();
        count
    }
}

impl Nanobot for RateLimitAgent {
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
        source_of(event).is_some()
    }

    fn assess(&self, event: &Event) -> f64 {
        let source = match source_of(event) {
            Some(s) => s,
            None => return 0.0,
        };

        let now = Utc::now();
        let mut confidence = event.confidence.unwrap_or(0.5);

        let request_count = self.recent_requests(&source, now);
        let rate_per_minute = (request_count as f64 / self.config.time_window_seconds as f64) * 60.0;

        if rate_per_minute > self.config.burst_threshold as f64 {
            confidence += 0.3;
        } else if rate_per_minute > self.config.requests_per_minute as f64 * 2.0 {
            confidence += 0.2;
        } else if rate_per_minute > self.config.requests_per_minute as f64 {
            confidence += 0.1;
        }

        let burst_cutoff = now - Duration::seconds(10);
        let burst_count = self
            .request_history
            .read()
            .get(&source)
            .map(|h| h.iter().filter(|t| **t > burst_cutoff).count())
            .unwrap_or(0);
        if burst_count as f64 > self.config.requests_per_minute as f64 / 6.0 {
            confidence += 0.2;
        }

        if self.rate_limits.read().contains_key(&source) {
            confidence += 0.15;
        }

        confidence.min(1.0)
    }

    fn execute(&self, event: &Event, confidence: f64) -> ActionResult {
        let source = match source_of(event) {
            Some(s) => s,
            None => return ActionResult::failed(ActionType::RateLimit, confidence, "no source found in event"),
        };

        let now = Utc::now();
        self.request_history
            .write()
            .entry(source.clone())
            .or_default()
            .push(now);
        self.clean_old_requests(&source, now);

        let request_count = self.recent_requests(&source, now);
        let rate_per_minute = (request_count as f64 / self.config.time_window_seconds as f64) * 60.0;

        let (limit, duration_minutes) = if rate_per_minute > self.config.burst_threshold as f64 {
            (12u32, 15i64)
        } else if rate_per_minute > self.config.requests_per_minute as f64 * 2.0 {
            (30u32, 10i64)
        } else {
            (self.config.requests_per_minute, 5i64)
        };

        let duration = Duration::minutes(duration_minutes);
        if !self.effector.apply_rate_limit(&source, limit, duration) {
            return ActionResult::failed(ActionType::RateLimit, confidence, "effector failed to apply rate limit");
        }

        let expiry = now + duration;
        self.rate_limits.write().insert(
            source.clone(),
            RateLimitEntry {
                limit,
                expiry,
                applied_at: now,
                current_rate: rate_per_minute,
            },
        );

        ActionResult::success(
            ActionType::RateLimit,
            confidence,
            serde_json::json!({
                "source": source,
                "rate_limit": limit,
                "duration_minutes": duration_minutes,
                "current_rate": rate_per_minute,
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

    fn agent() -> RateLimitAgent {
        let agent = RateLimitAgent::new(
            "rate_limiter",
            NanobotConfig::default(),
            DecisionConfig::default(),
            Arc::new(SimulationEffector::new()),
        );
        agent.activate();
        agent
    }

    fn event() -> Event {
        Event::new("e1", EventSource::Ip("1.2.3.4".parse().unwrap()), EventKind::NetFlow)
    }

    #[test]
    fn applies_light_limit_for_moderate_traffic() {
        let agent = agent();
        let result = agent.execute(&event(), 0.95);
        assert!(result.is_successful());
        assert!(agent.is_rate_limited("1.2.3.4"));
    }

    #[test]
    fn lazily_expires_rate_limit() {
        let agent = agent();
        agent.execute(&event(), 0.95);
        let mut entry = agent.rate_limits.write();
        entry.get_mut("1.2.3.4").unwrap().expiry = Utc::now() - Duration::seconds(1);
        drop(entry);
        assert!(!agent.is_rate_limited("1.2.3.4"));
    }

    #[test]
    fn clear_all_limits_resets_state() {
        let agent = agent();
        agent.execute(&event(), 0.95);
        assert_eq!(agent.clear_all_limits(), 1);
        assert!(!agent.is_rate_limited("1.2.3.4"));
    }
}
