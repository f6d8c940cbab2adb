//! Event model and the bounded, backpressure-aware intake bus.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Where an event originated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum EventSource {
    Ip(IpAddr),
    Host(String),
    Abstract(String),
}

/// Closed set of event kinds the core understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    PortScan,
    AuthFail,
    ProcessSpawn,
    NetFlow,
    HostDiscovered,
    ThreatIndicator,
    Anomaly,
    HuntRequest,
    PatrolRequest,
}

/// A payload value. Kept as a small closed enum rather than raw JSON so
/// nanobot assessment code can match on it without a parsing step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PayloadValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<String>),
}

impl PayloadValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PayloadValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PayloadValue::Float(f) => Some(*f),
            PayloadValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PayloadValue::Int(i) => Some(*i),
            PayloadValue::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PayloadValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            PayloadValue::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }
}

/// An immutable security event fed into the bus.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub source: EventSource,
    pub kind: EventKind,
    pub payload: HashMap<String, PayloadValue>,
    pub threat_score: Option<f64>,
    pub confidence: Option<f64>,
    pub tags: HashSet<String>,
}

impl Event {
    pub fn new(id: impl Into<String>, source: EventSource, kind: EventKind) -> Self {
        Event {
            id: id.into(),
            timestamp: Utc::now(),
            source,
            kind,
            payload: HashMap::new(),
            threat_score: None,
            confidence: None,
            tags: HashSet::new(),
        }
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: PayloadValue) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    pub fn ip(&self) -> Option<IpAddr> {
        match &self.source {
            EventSource::Ip(ip) => Some(*ip),
            _ => None,
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// Bounded intake queue with lowest-priority-drop backpressure.
///
/// `threat_score` (defaulting to 0.0 when absent) is used as the
/// priority signal: when the queue is full, the lowest-scoring pending
/// event is evicted to make room for the incoming one.
pub struct EventBus {
    capacity: usize,
    queue: Mutex<VecDeque<Event>>,
    dropped_count: Mutex<u64>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        EventBus {
            capacity: capacity.max(1),
            queue: Mutex::new(VecDeque::new()),
            dropped_count: Mutex::new(0),
        }
    }

    /// Submit an event. Returns `true` if it was enqueued without
    /// having to evict anything, `false` if a lower-priority event was
    /// dropped to make room.
    pub fn submit(&self, event: Event) -> bool {
        let mut queue = self.queue.lock();
        if queue.len() < self.capacity {
            queue.push_back(event);
            return true;
        }

        let incoming_score = event.threat_score.unwrap_or(0.0);
        let lowest = queue
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.threat_score
                    .unwrap_or(0.0)
                    .partial_cmp(&b.threat_score.unwrap_or(0.0))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(idx, ev)| (idx, ev.threat_score.unwrap_or(0.0)));

        match lowest {
            Some((idx, score)) if score < incoming_score => {
                queue.remove(idx);
                queue.push_back(event);
                *self.dropped_count.lock() += 1;
                warn!(capacity = self.capacity, "event bus at capacity, dropped lowest-priority event");
                false
            }
            _ => {
                *self.dropped_count.lock() += 1;
                warn!(capacity = self.capacity, "event bus at capacity, rejecting incoming event");
                false
            }
        }
    }

    pub fn drain(&self) -> Vec<Event> {
        self.queue.lock().drain(..).collect()
    }

    pub fn pop(&self) -> Option<Event> {
        self.queue.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped_count(&self) -> u64 {
        *self.dropped_count.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, score: f64) -> Event {
        Event::new(id, EventSource::Abstract("test".into()), EventKind::Anomaly)
            .with_payload("score", PayloadValue::Float(score))
            .tap_score(score)
    }

    trait TapScore {
        fn tap_score(self, score: f64) -> Self;
    }

    impl TapScore for Event {
        fn tap_score(mut self, score: f64) -> Self {
            self.threat_score = Some(score);
            self
        }
    }

    #[test]
    fn submits_until_capacity() {
        let bus = EventBus::new(2);
        assert!(bus.submit(event("a", 1.0)));
        assert!(bus.submit(event("b", 2.0)));
        assert_eq!(bus.len(), 2);
    }

    #[test]
    fn drops_lowest_priority_on_overflow() {
        let bus = EventBus::new(2);
        bus.submit(event("low", 1.0));
        bus.submit(event("high", 9.0));
        let accepted = bus.submit(event("mid", 5.0));
        assert!(!accepted);
        let remaining: Vec<String> = bus.drain().into_iter().map(|e| e.id).collect();
        assert!(remaining.contains(&"high".to_string()));
        assert!(remaining.contains(&"mid".to_string()));
        assert!(!remaining.contains(&"low".to_string()));
        assert_eq!(bus.dropped_count(), 1);
    }

    #[test]
    fn rejects_incoming_when_it_is_the_lowest() {
        let bus = EventBus::new(1);
        bus.submit(event("high", 9.0));
        let accepted = bus.submit(event("low", 1.0));
        assert!(!accepted);
        let remaining = bus.drain();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "high");
    }
}
