//! Orchestrates a registry of nanobots: activation control, event
//! fan-out, and a background thread draining a submission queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::info;

use crate::event::Event;
use crate::nanobot::{ActionResult, Nanobot, NanobotMode};

const QUEUE_DRAIN_INTERVAL: Duration = Duration::from_millis(100);
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

struct NanobotHandle {
    mode: NanobotMode,
    bot: Arc<dyn Nanobot>,
}

#[derive(Clone, Debug)]
pub struct ModeCount {
    pub total: usize,
    pub active: usize,
}

#[derive(Clone, Debug)]
pub struct SwarmStatus {
    pub swarm_id: String,
    pub is_active: bool,
    pub total_nanobots: usize,
    pub active_nanobots: usize,
    pub mode_breakdown: HashMap<NanobotMode, ModeCount>,
    pub events_processed: u64,
    pub actions_taken: u64,
    pub subscriber_errors: u64,
    pub queue_size: usize,
    pub uptime_seconds: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct RecentAction {
    pub nanobot_id: String,
    pub nanobot_mode: NanobotMode,
    pub action: ActionResult,
}

/// Manages a registry of nanobots, acting as the immune-system
/// coordinator: nanobots are antibodies, this is the organism.
pub struct SwarmManager {
    swarm_id: String,
    nanobots: RwLock<HashMap<String, NanobotHandle>>,
    queue: Mutex<Vec<Event>>,
    is_active: AtomicBool,
    start_time: Mutex<Option<DateTime<Utc>>>,
    total_events_processed: std::sync::atomic::AtomicU64,
    total_actions_taken: std::sync::atomic::AtomicU64,
    subscriber_errors: std::sync::atomic::AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SwarmManager {
    pub fn new(swarm_id: impl Into<String>) -> Arc<Self> {
        Arc::new(SwarmManager {
            swarm_id: swarm_id.into(),
            nanobots: RwLock::new(HashMap::new()),
            queue: Mutex::new(Vec::new()),
            is_active: AtomicBool::new(false),
            start_time: Mutex::new(None),
            total_events_processed: std::sync::atomic::AtomicU64::new(0),
            total_actions_taken: std::sync::atomic::AtomicU64::new(0),
            subscriber_errors: std::sync::atomic::AtomicU64::new(0),
            worker: Mutex::new(None),
        })
    }

    pub fn register(&self, id: impl Into<String>, bot: Arc<dyn Nanobot>) -> bool {
        let id = id.into();
        let mut nanobots = self.nanobots.write();
        if nanobots.contains_key(&id) {
            return false;
        }
        let mode = bot.mode();
        nanobots.insert(id, NanobotHandle { mode, bot });
        true
    }

    pub fn unregister(&self, id: &str) -> bool {
        let mut nanobots = self.nanobots.write();
        match nanobots.remove(id) {
            Some(handle) => {
                handle.bot.deactivate();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Nanobot>> {
        self.nanobots.read().get(id).map(|h| h.bot.clone())
    }

    pub fn get_by_mode(&self, mode: NanobotMode) -> Vec<Arc<dyn Nanobot>> {
        self.nanobots
            .read()
            .values()
            .filter(|h| h.mode == mode)
            .map(|h| h.bot.clone())
            .collect()
    }

    pub fn activate_all(&self) {
        for handle in self.nanobots.read().values() {
            handle.bot.activate();
        }
    }

    pub fn deactivate_all(&self) {
        for handle in self.nanobots.read().values() {
            handle.bot.deactivate();
        }
    }

    pub fn activate_mode(&self, mode: NanobotMode) {
        for bot in self.get_by_mode(mode) {
            bot.activate();
        }
    }

    pub fn deactivate_mode(&self, mode: NanobotMode) {
        for bot in self.get_by_mode(mode) {
            bot.deactivate();
        }
    }

    /// Queue an event for background processing by `start_swarm`'s worker.
    pub fn submit_event(&self, event: Event) {
        self.queue.lock().push(event);
    }

    /// Run an event through every active, capable nanobot synchronously.
    ///
    /// A nanobot that panics while handling an event is isolated with
    /// `catch_unwind` so one misbehaving agent cannot take down the
    /// rest of the dispatch pass.
    pub fn process_event(&self, event: &Event) -> Vec<ActionResult> {
        let mut results = Vec::new();
        for handle in self.nanobots.read().values() {
            if handle.bot.is_active() && handle.bot.can_handle(event) {
                let bot = &handle.bot;
                let outcome =
                    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| bot.process(event)));
                match outcome {
                    Ok(Some(result)) => results.push(result),
                    Ok(None) => {}
                    Err(_) => {
                        self.subscriber_errors.fetch_add(1, Ordering::SeqCst);
                        info!(nanobot_id = handle.bot.id(), "nanobot panicked while processing event, isolated (subscriber_error)");
                    }
                }
            }
        }

        self.total_events_processed.fetch_add(1, Ordering::SeqCst);
        if !results.is_empty() {
            self.total_actions_taken
                .fetch_add(results.len() as u64, Ordering::SeqCst);
        }
        results
    }

    pub fn is_active(&self) -> bool {
        self.is_active.load(Ordering::SeqCst)
    }

    /// Starts background processing. Activates every registered
    /// nanobot and spawns a worker thread that drains the submission
    /// queue at a fixed interval.
    pub fn start_swarm(self: &Arc<Self>) {
        if self.is_active.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.start_time.lock() = Some(Utc::now());
        self.activate_all();

        let swarm = Arc::clone(self);
        let handle = thread::spawn(move || {
            while swarm.is_active.load(Ordering::SeqCst) {
                let pending: Vec<Event> = {
                    let mut queue = swarm.queue.lock();
                    std::mem::take(&mut *queue)
                };
                for event in &pending {
                    swarm.process_event(event);
                }
                thread::sleep(QUEUE_DRAIN_INTERVAL);
            }
        });
        *self.worker.lock() = Some(handle);
        info!(swarm_id = %self.swarm_id, "swarm started");
    }

    /// Stops background processing, deactivates every nanobot, and
    /// joins the worker thread with a bounded timeout. If the thread
    /// does not finish within the timeout it is abandoned rather than
    /// blocking shutdown indefinitely.
    pub fn stop_swarm(&self) {
        if !self.is_active.swap(false, Ordering::SeqCst) {
            return;
        }
        self.deactivate_all();

        if let Some(handle) = self.worker.lock().take() {
            let (tx, rx) = std::sync::mpsc::channel();
            thread::spawn(move || {
                let _ = tx.send(handle.join());
            });
            if rx.recv_timeout(STOP_JOIN_TIMEOUT).is_err() {
                info!(swarm_id = %self.swarm_id, "worker thread join timed out, abandoning");
            }
        }
        info!(swarm_id = %self.swarm_id, "swarm stopped");
    }

    pub fn get_swarm_status(&self) -> SwarmStatus {
        let nanobots = self.nanobots.read();
        let active_count = nanobots.values().filter(|h| h.bot.is_active()).count();

        let mut mode_breakdown = HashMap::new();
        for mode in [
            NanobotMode::Defensive,
            NanobotMode::Scout,
            NanobotMode::Adaptive,
            NanobotMode::ForestGuard,
        ] {
            let bots: Vec<&NanobotHandle> = nanobots.values().filter(|h| h.mode == mode).collect();
            mode_breakdown.insert(
                mode,
                ModeCount {
                    total: bots.len(),
                    active: bots.iter().filter(|h| h.bot.is_active()).count(),
                },
            );
        }

        let start_time = *self.start_time.lock();
        let uptime_seconds = start_time.map(|start| (Utc::now() - start).num_milliseconds() as f64 / 1000.0);

        SwarmStatus {
            swarm_id: self.swarm_id.clone(),
            is_active: self.is_active(),
            total_nanobots: nanobots.len(),
            active_nanobots: active_count,
            mode_breakdown,
            events_processed: self.total_events_processed.load(Ordering::SeqCst),
            actions_taken: self.total_actions_taken.load(Ordering::SeqCst),
            subscriber_errors: self.subscriber_errors.load(Ordering::SeqCst),
            queue_size: self.queue.lock().len(),
            uptime_seconds,
        }
    }

    pub fn get_recent_actions(&self, limit: usize) -> Vec<RecentAction> {
        let mut all_actions: Vec<RecentAction> = Vec::new();
        for (id, handle) in self.nanobots.read().iter() {
            for action in handle.bot.action_history(usize::MAX) {
                all_actions.push(RecentAction {
                    nanobot_id: id.clone(),
                    nanobot_mode: handle.mode,
                    action,
                });
            }
        }
        all_actions.sort_by(|a, b| b.action.timestamp.cmp(&a.action.timestamp));
        all_actions.truncate(limit);
        all_actions
    }

    pub fn clear_all_history(&self) {
        for handle in self.nanobots.read().values() {
            handle.bot.clear_history();
        }
        self.total_events_processed.store(0, Ordering::SeqCst);
        self.total_actions_taken.store(0, Ordering::SeqCst);
        self.subscriber_errors.store(0, Ordering::SeqCst);
    }

    /// Overall swarm status plus per-nanobot action counts, success
    /// rates, and average decision confidence, keyed by nanobot id.
    pub fn get_statistics(&self) -> (SwarmStatus, HashMap<String, NanobotStatistics>) {
        let mut per_bot = HashMap::new();
        for (id, handle) in self.nanobots.read().iter() {
            let history = handle.bot.action_history(usize::MAX);
            let total = history.len();
            let successful = history.iter().filter(|r| r.is_successful()).count();
            let confidence_sum: f64 = history.iter().map(|r| r.confidence).sum();
            per_bot.insert(
                id.clone(),
                NanobotStatistics {
                    mode: handle.mode,
                    is_active: handle.bot.is_active(),
                    total_actions: total,
                    successful_actions: successful,
                    failures: total - successful,
                    success_rate: if total > 0 {
                        successful as f64 / total as f64
                    } else {
                        0.0
                    },
                    avg_confidence: if total > 0 {
                        confidence_sum / total as f64
                    } else {
                        0.0
                    },
                },
            );
        }
        (self.get_swarm_status(), per_bot)
    }
}

#[derive(Clone, Debug)]
pub struct NanobotStatistics {
    pub mode: NanobotMode,
    pub is_active: bool,
    pub total_actions: usize,
    pub successful_actions: usize,
    pub failures: usize,
    pub success_rate: f64,
    pub avg_confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DecisionConfig, NanobotConfig};
    use crate::effector::SimulationEffector;
    use crate::event::{EventKind, EventSource, PayloadValue};
    use crate::nanobot::IpBlockAgent;
    use std::collections::HashSet;

    fn swarm_with_ip_block() -> Arc<SwarmManager> {
        let swarm = SwarmManager::new("test_swarm");
        let agent = Arc::new(IpBlockAgent::new(
            "ip_blocker",
            NanobotConfig::default(),
            DecisionConfig::default(),
            HashSet::new(),
            Arc::new(SimulationEffector::new()),
        ));
        agent.activate();
        swarm.register("ip_blocker", agent);
        swarm
    }

    #[test]
    fn register_rejects_duplicate_id() {
        let swarm = swarm_with_ip_block();
        let dup = Arc::new(IpBlockAgent::new(
            "ip_blocker",
            NanobotConfig::default(),
            DecisionConfig::default(),
            HashSet::new(),
            Arc::new(SimulationEffector::new()),
        ));
        assert!(!swarm.register("ip_blocker", dup));
    }

    #[test]
    fn unregister_deactivates_and_removes() {
        let swarm = swarm_with_ip_block();
        assert!(swarm.unregister("ip_blocker"));
        assert!(swarm.get("ip_blocker").is_none());
    }

    #[test]
    fn process_event_tallies_statistics() {
        let swarm = swarm_with_ip_block();
        let event = Event::new("e1", EventSource::Ip("9.9.9.9".parse().unwrap()), EventKind::AuthFail)
            .with_payload("failed_auth_attempts", PayloadValue::Int(20))
            .with_payload("known_malicious_ip", PayloadValue::Bool(true));
        swarm.process_event(&event);
        let status = swarm.get_swarm_status();
        assert_eq!(status.events_processed, 1);
        assert_eq!(status.total_nanobots, 1);
    }

    #[test]
    fn status_reports_mode_breakdown() {
        let swarm = swarm_with_ip_block();
        let status = swarm.get_swarm_status();
        let defensive = &status.mode_breakdown[&NanobotMode::Defensive];
        assert_eq!(defensive.total, 1);
        assert_eq!(defensive.active, 1);
    }

    struct PanickingBot {
        state: crate::nanobot::AgentState,
    }

    impl Nanobot for PanickingBot {
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
        fn assess(&self, _event: &Event) -> f64 {
            1.0
        }
        fn execute(&self, _event: &Event, _confidence: f64) -> ActionResult {
            panic!("simulated subscriber failure")
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

    #[test]
    fn panicking_nanobot_is_isolated_and_counted_as_subscriber_error() {
        let swarm = swarm_with_ip_block();
        let panicker = Arc::new(PanickingBot {
            state: crate::nanobot::AgentState::new("panicker", NanobotMode::Adaptive, DecisionConfig::default()),
        });
        panicker.activate();
        swarm.register("panicker", panicker);

        let event = Event::new("e1", EventSource::Ip("9.9.9.9".parse().unwrap()), EventKind::AuthFail)
            .with_payload("failed_auth_attempts", PayloadValue::Int(20));

        let prev_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(|_| {}));
        let results = swarm.process_event(&event);
        std::panic::set_hook(prev_hook);

        assert_eq!(results.len(), 1);
        let status = swarm.get_swarm_status();
        assert_eq!(status.subscriber_errors, 1);
    }
}
