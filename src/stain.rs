//! Content-addressed IOC records ("stains") and the in-process store.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarkerType {
    Malware,
    SuspiciousIp,
    EvilAi,
    Backdoor,
    HiddenService,
    Unknown,
    Crow,
    Squirrel,
    Magpie,
    Snake,
    Parasite,
    Bat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorTag {
    Red,
    Orange,
    Yellow,
    Green,
    Blue,
    Purple,
    Black,
    White,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StainStatus {
    ActiveThreat,
    Monitoring,
    Contained,
    Resolved,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TargetRef {
    pub ip: Option<String>,
    pub hash: Option<String>,
    pub hostname: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ForestLocation {
    pub tree: Option<String>,
    pub branch: Option<String>,
    pub leaf: Option<String>,
}

/// A content-addressed IOC record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Stain {
    pub tag_id: String,
    pub marker_type: MarkerType,
    pub color: ColorTag,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub hit_count: u32,
    pub weapon_used: String,
    pub target: TargetRef,
    pub forest_location: ForestLocation,
    pub threat_score: f64,
    pub confidence: f64,
    pub evidence: Vec<String>,
    pub linked_tags: HashSet<String>,
    pub hunter_notes: Option<String>,
    pub detected_by: Option<String>,
    pub status: StainStatus,
}

/// Derive the stable, content-addressed `tag_id` for a marker type and
/// its primary target identifier. Re-observing the same IOC must yield
/// the same id so upsert can find and merge it.
pub fn compute_tag_id(marker_type: MarkerType, primary_target: &str) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    marker_type.hash(&mut hasher);
    primary_target.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

impl Stain {
    pub fn new(
        marker_type: MarkerType,
        color: ColorTag,
        primary_target: &str,
        target: TargetRef,
        forest_location: ForestLocation,
        threat_score: f64,
        confidence: f64,
    ) -> EngineResult<Self> {
        if !(0.0..=10.0).contains(&threat_score) {
            return Err(EngineError::Validation(format!(
                "threat_score {} out of range [0, 10]",
                threat_score
            )));
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(EngineError::Validation(format!(
                "confidence {} out of range [0, 1]",
                confidence
            )));
        }

        let now = Utc::now();
        Ok(Stain {
            tag_id: compute_tag_id(marker_type, primary_target),
            marker_type,
            color,
            first_seen: now,
            last_seen: now,
            hit_count: 1,
            weapon_used: String::new(),
            target,
            forest_location,
            threat_score,
            confidence,
            evidence: Vec::new(),
            linked_tags: HashSet::new(),
            hunter_notes: None,
            detected_by: None,
            status: StainStatus::ActiveThreat,
        })
    }
}

/// Content-addressed IOC store with dedup-on-insert.
///
/// Concrete external backends implement [`Store`]; this in-process
/// implementation is the core's own authoritative working set, backed
/// by a sharded `DashMap` so mutation is serialized per `tag_id`
/// without a single global lock.
pub struct StainStore {
    stains: DashMap<String, Stain>,
}

impl StainStore {
    pub fn new() -> Self {
        StainStore {
            stains: DashMap::new(),
        }
    }

    /// Insert a new stain or merge into an existing one with the same
    /// `tag_id`: increments `hit_count`, extends `last_seen`, unions
    /// `evidence` (deduped, insertion order preserved) and
    /// `linked_tags`, and keeps the higher of the two confidence scores.
    /// `threat_score` and `first_seen` are identity fields and are kept
    /// first-writer-wins, untouched by re-observation.
    pub fn upsert(&self, mut incoming: Stain) -> Stain {
        match self.stains.get_mut(&incoming.tag_id) {
            Some(mut existing) => {
                existing.hit_count += 1;
                if incoming.last_seen > existing.last_seen {
                    existing.last_seen = incoming.last_seen;
                }
                for item in incoming.evidence.drain(..) {
                    if !existing.evidence.contains(&item) {
                        existing.evidence.push(item);
                    }
                }
                existing.linked_tags.extend(incoming.linked_tags.drain());
                existing.confidence = existing.confidence.max(incoming.confidence);
                existing.clone()
            }
            None => {
                self.stains.insert(incoming.tag_id.clone(), incoming.clone());
                incoming
            }
        }
    }

    pub fn get(&self, tag_id: &str) -> Option<Stain> {
        self.stains.get(tag_id).map(|s| s.clone())
    }

    pub fn update(&self, stain: Stain) {
        self.stains.insert(stain.tag_id.clone(), stain);
    }

    pub fn delete(&self, tag_id: &str) -> bool {
        self.stains.remove(tag_id).is_some()
    }

    pub fn all(&self) -> Vec<Stain> {
        let mut out: Vec<Stain> = self.stains.iter().map(|e| e.value().clone()).collect();
        out.sort_by(|a, b| b.first_seen.cmp(&a.first_seen));
        out
    }

    pub fn by_marker_type(&self, marker_type: MarkerType) -> Vec<Stain> {
        let mut out: Vec<Stain> = self
            .stains
            .iter()
            .filter(|e| e.marker_type == marker_type)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| b.first_seen.cmp(&a.first_seen));
        out
    }

    pub fn by_color(&self, color: ColorTag) -> Vec<Stain> {
        let mut out: Vec<Stain> = self
            .stains
            .iter()
            .filter(|e| e.color == color)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| b.first_seen.cmp(&a.first_seen));
        out
    }

    pub fn by_ip(&self, ip: &str) -> Vec<Stain> {
        let mut out: Vec<Stain> = self
            .stains
            .iter()
            .filter(|e| e.target.ip.as_deref() == Some(ip))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| b.first_seen.cmp(&a.first_seen));
        out
    }

    pub fn by_threat_score_range(&self, min: f64, max: f64) -> Vec<Stain> {
        let mut out: Vec<Stain> = self
            .stains
            .iter()
            .filter(|e| e.threat_score >= min && e.threat_score <= max)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| b.threat_score.partial_cmp(&a.threat_score).unwrap());
        out
    }

    /// Case-insensitive substring search over tag_id, marker_type,
    /// color, target identifiers, and hunter_notes.
    pub fn search(&self, query: &str) -> Vec<Stain> {
        let needle = query.to_lowercase();
        self.stains
            .iter()
            .filter(|e| {
                let s = e.value();
                s.tag_id.to_lowercase().contains(&needle)
                    || format!("{:?}", s.marker_type).to_lowercase().contains(&needle)
                    || format!("{:?}", s.color).to_lowercase().contains(&needle)
                    || s.target
                        .ip
                        .as_ref()
                        .is_some_and(|v| v.to_lowercase().contains(&needle))
                    || s.target
                        .hostname
                        .as_ref()
                        .is_some_and(|v| v.to_lowercase().contains(&needle))
                    || s.target
                        .hash
                        .as_ref()
                        .is_some_and(|v| v.to_lowercase().contains(&needle))
                    || s.hunter_notes
                        .as_ref()
                        .is_some_and(|v| v.to_lowercase().contains(&needle))
            })
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.stains.len()
    }

    /// Symmetric link between two stains by tag_id.
    pub fn link(&self, a: &str, b: &str) {
        if let Some(mut stain) = self.stains.get_mut(a) {
            stain.linked_tags.insert(b.to_string());
        }
        if let Some(mut stain) = self.stains.get_mut(b) {
            stain.linked_tags.insert(a.to_string());
        }
    }

    /// Totals by marker type, color, and status, plus the average
    /// threat score and a count of stains at or above the "high
    /// threat" line (7.0, matching the alert tier's elevated cutoff).
    pub fn stats(&self) -> StainStats {
        let mut by_marker_type: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        let mut by_color: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        let mut by_status: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        let mut score_sum = 0.0;
        let mut high_threat_count = 0usize;
        let total = self.stains.len();

        for entry in self.stains.iter() {
            let s = entry.value();
            *by_marker_type.entry(format!("{:?}", s.marker_type)).or_insert(0) += 1;
            *by_color.entry(format!("{:?}", s.color)).or_insert(0) += 1;
            *by_status.entry(format!("{:?}", s.status)).or_insert(0) += 1;
            score_sum += s.threat_score;
            if s.threat_score >= HIGH_THREAT_SCORE {
                high_threat_count += 1;
            }
        }

        StainStats {
            total_stains: total,
            by_marker_type,
            by_color,
            by_status,
            avg_threat_score: if total > 0 { score_sum / total as f64 } else { 0.0 },
            high_threat_count,
        }
    }
}

const HIGH_THREAT_SCORE: f64 = 7.0;

/// Aggregate counts returned by [`StainStore::stats`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StainStats {
    pub total_stains: usize,
    pub by_marker_type: std::collections::HashMap<String, usize>,
    pub by_color: std::collections::HashMap<String, usize>,
    pub by_status: std::collections::HashMap<String, usize>,
    pub avg_threat_score: f64,
    pub high_threat_count: usize,
}

impl Default for StainStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Contract an external storage backend implements. Named to match the
/// Python system's abstract store interface one-for-one so a backend
/// author can map methods directly.
pub trait Store: Send + Sync {
    fn connect(&mut self) -> EngineResult<()>;
    fn disconnect(&mut self) -> EngineResult<()>;
    fn initialize_schema(&mut self) -> EngineResult<()>;
    fn upsert_stain(&self, stain: Stain) -> EngineResult<Stain>;
    fn get_stain(&self, tag_id: &str) -> EngineResult<Option<Stain>>;
    fn query_by_marker_type(&self, marker_type: MarkerType) -> EngineResult<Vec<Stain>>;
    fn query_by_color(&self, color: ColorTag) -> EngineResult<Vec<Stain>>;
    fn query_by_ip(&self, ip: &str) -> EngineResult<Vec<Stain>>;
    fn query_by_score_range(&self, min: f64, max: f64) -> EngineResult<Vec<Stain>>;
    fn update_stain(&self, stain: Stain) -> EngineResult<()>;
    fn delete_stain(&self, tag_id: &str) -> EngineResult<bool>;
    fn search(&self, query: &str) -> EngineResult<Vec<Stain>>;
    fn count(&self) -> EngineResult<usize>;
    fn stats(&self) -> EngineResult<StainStats>;
}

/// Runs a store operation, retrying it once on failure before
/// surfacing the error to the caller, per the core's store-failure
/// propagation policy. The store reference is never poisoned: a
/// failed call leaves it usable for the next caller.
pub fn with_retry<T>(mut op: impl FnMut() -> EngineResult<T>) -> EngineResult<T> {
    match op() {
        Ok(value) => Ok(value),
        Err(first_err) => {
            tracing::warn!(error = %first_err, "store operation failed, retrying once");
            op().map_err(|_| first_err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn with_retry_succeeds_on_second_attempt() {
        let attempts = Cell::new(0);
        let result: EngineResult<u32> = with_retry(|| {
            attempts.set(attempts.get() + 1);
            if attempts.get() < 2 {
                Err(EngineError::Store("transient".into()))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.get(), 2);
    }

    #[test]
    fn with_retry_surfaces_error_after_second_failure() {
        let attempts = Cell::new(0);
        let result: EngineResult<u32> = with_retry(|| {
            attempts.set(attempts.get() + 1);
            Err(EngineError::Store("down".into()))
        });
        assert!(result.is_err());
        assert_eq!(attempts.get(), 2);
    }

    fn sample(ip: &str, score: f64) -> Stain {
        Stain::new(
            MarkerType::Crow,
            ColorTag::Black,
            ip,
            TargetRef {
                ip: Some(ip.to_string()),
                hash: None,
                hostname: None,
            },
            ForestLocation::default(),
            score,
            0.8,
        )
        .unwrap()
    }

    #[test]
    fn upsert_dedups_by_tag_id_and_increments_hit_count() {
        let store = StainStore::new();
        let mut first = sample("10.0.0.1", 5.0);
        first.evidence.push("port_scan".to_string());
        store.upsert(first.clone());

        let mut second = sample("10.0.0.1", 7.0);
        second.evidence.push("brute_force".to_string());
        let result = store.upsert(second);

        assert_eq!(result.hit_count, 2);
        assert_eq!(result.threat_score, 5.0, "threat_score is first-writer-wins, not max'd");
        assert_eq!(result.evidence.len(), 2);
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn upsert_is_idempotent_for_identical_repeats() {
        let store = StainStore::new();
        let stain = sample("10.0.0.2", 4.0);
        store.upsert(stain.clone());
        store.upsert(stain.clone());
        store.upsert(stain);
        let stored = store.get(&compute_tag_id(MarkerType::Crow, "10.0.0.2")).unwrap();
        assert_eq!(stored.hit_count, 3);
    }

    #[test]
    fn link_is_symmetric() {
        let store = StainStore::new();
        let a = sample("10.0.0.3", 3.0);
        let b = sample("10.0.0.4", 3.0);
        store.upsert(a.clone());
        store.upsert(b.clone());
        store.link(&a.tag_id, &b.tag_id);
        assert!(store.get(&a.tag_id).unwrap().linked_tags.contains(&b.tag_id));
        assert!(store.get(&b.tag_id).unwrap().linked_tags.contains(&a.tag_id));
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let result = Stain::new(
            MarkerType::Bat,
            ColorTag::Blue,
            "host",
            TargetRef::default(),
            ForestLocation::default(),
            5.0,
            1.5,
        );
        assert!(result.is_err());
    }

    use proptest::prelude::*;

    proptest! {
        /// Repeated upserts of the same IOC, any number of times, must
        /// always converge to exactly one stored stain whose hit_count
        /// equals the number of upserts performed.
        #[test]
        fn repeated_upsert_converges_to_one_stain(repeats in 1usize..20) {
            let store = StainStore::new();
            let stain = sample("10.9.9.9", 5.0);
            for _ in 0..repeats {
                store.upsert(stain.clone());
            }
            prop_assert_eq!(store.count(), 1);
            let stored = store.get(&stain.tag_id).unwrap();
            prop_assert_eq!(stored.hit_count, repeats as u32);
        }
    }
}
