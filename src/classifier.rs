//! Closed threat taxonomy classification from indicator/behavior keywords.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// The six response categories this engine recognizes. Closed by design:
/// anything that doesn't clear a category's threshold falls out as the
/// lowest-scoring match, never as a new category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThreatCategory {
    Crow,
    Magpie,
    Squirrel,
    Snake,
    Parasite,
    Bat,
}

impl ThreatCategory {
    pub const ALL: [ThreatCategory; 6] = [
        ThreatCategory::Crow,
        ThreatCategory::Magpie,
        ThreatCategory::Squirrel,
        ThreatCategory::Snake,
        ThreatCategory::Parasite,
        ThreatCategory::Bat,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ThreatCategory::Crow => "Crow (Malware)",
            ThreatCategory::Magpie => "Magpie (Data Stealer)",
            ThreatCategory::Squirrel => "Squirrel (Lateral Movement)",
            ThreatCategory::Snake => "Snake (Rootkit)",
            ThreatCategory::Parasite => "Parasite (Cryptominer)",
            ThreatCategory::Bat => "Bat (Night Attack)",
        }
    }
}

struct CategoryProfile {
    indicator_keywords: HashSet<&'static str>,
    behavior_keywords: HashSet<&'static str>,
    indicator_weight: f64,
    behavior_weight: f64,
    recommendations: &'static [&'static str],
}

fn profile_for(category: ThreatCategory) -> CategoryProfile {
    match category {
        ThreatCategory::Crow => CategoryProfile {
            indicator_keywords: [
                "persistent",
                "hidden_process",
                "waiting",
                "obfuscated",
                "c2_communication",
                "patience",
            ]
            .into_iter()
            .collect(),
            behavior_keywords: ["execution", "persistence", "command_and_control", "stealth"]
                .into_iter()
                .collect(),
            indicator_weight: 0.6,
            behavior_weight: 0.4,
            recommendations: &[
                "Mark with BLACK tracer immediately",
                "Deploy defensive nanobots",
                "Check for C2 communication",
                "Isolate affected system",
            ],
        },
        ThreatCategory::Magpie => CategoryProfile {
            indicator_keywords: [
                "data_access",
                "credential_theft",
                "exfiltration",
                "file_access",
                "database_query",
                "clipboard_access",
            ]
            .into_iter()
            .collect(),
            behavior_keywords: ["collection", "exfiltration", "credential_access", "discovery"]
                .into_iter()
                .collect(),
            indicator_weight: 0.7,
            behavior_weight: 0.3,
            recommendations: &[
                "Mark with PURPLE tracer",
                "Lock down sensitive data access",
                "Audit data access logs",
                "Block exfiltration paths",
                "Reset credentials",
            ],
        },
        ThreatCategory::Squirrel => CategoryProfile {
            indicator_keywords: [
                "lateral_movement",
                "network_scanning",
                "smb_activity",
                "rdp_connection",
                "ssh_connection",
                "host_hopping",
            ]
            .into_iter()
            .collect(),
            behavior_keywords: [
                "lateral_movement",
                "discovery",
                "remote_services",
                "valid_accounts",
            ]
            .into_iter()
            .collect(),
            indicator_weight: 0.5,
            behavior_weight: 0.5,
            recommendations: &[
                "Mark with BROWN tracer",
                "Review network segmentation",
                "Map lateral movement path",
                "Strengthen access controls",
            ],
        },
        ThreatCategory::Snake => CategoryProfile {
            indicator_keywords: [
                "rootkit",
                "kernel_modification",
                "driver_loading",
                "process_hiding",
                "privilege_escalation",
                "deep_system_access",
            ]
            .into_iter()
            .collect(),
            behavior_keywords: [
                "privilege_escalation",
                "defense_evasion",
                "persistence",
                "rootkit_behavior",
            ]
            .into_iter()
            .collect(),
            indicator_weight: 0.8,
            behavior_weight: 0.2,
            recommendations: &[
                "Mark with RED tracer - CRITICAL",
                "System may be deeply compromised",
                "Kernel-level inspection required",
                "Consider full system rebuild",
            ],
        },
        ThreatCategory::Parasite => CategoryProfile {
            indicator_keywords: [
                "high_cpu",
                "cryptomining",
                "resource_abuse",
                "gpu_usage",
                "mining_pool_connection",
                "cryptocurrency",
            ]
            .into_iter()
            .collect(),
            behavior_keywords: ["impact", "resource_hijacking", "persistence"]
                .into_iter()
                .collect(),
            indicator_weight: 0.7,
            behavior_weight: 0.3,
            recommendations: &[
                "Mark with ORANGE tracer",
                "Terminate resource-draining process",
                "Check for mining pool connections",
                "Monitor resource usage",
            ],
        },
        ThreatCategory::Bat => CategoryProfile {
            indicator_keywords: [
                "night_activity",
                "off_hours",
                "scheduled_task",
                "cron_job",
                "time_based",
                "after_hours",
            ]
            .into_iter()
            .collect(),
            behavior_keywords: ["execution", "scheduled_task", "time_based_evasion"]
                .into_iter()
                .collect(),
            indicator_weight: 0.6,
            behavior_weight: 0.4,
            recommendations: &[
                "Mark with BLUE tracer",
                "Review scheduled tasks",
                "Monitor off-hours activity",
                "Check cron jobs and timers",
            ],
        },
    }
}

/// Result of classifying a single threat.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Classification {
    pub threat_id: String,
    pub category: ThreatCategory,
    pub confidence: f64,
    pub all_scores: Vec<(ThreatCategory, f64)>,
    pub matched_indicators: Vec<String>,
    pub matched_behaviors: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Aggregate result of classifying a batch of threats.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchClassification {
    pub total_threats: usize,
    pub classifications: Vec<Classification>,
    pub counts: Vec<(String, usize)>,
    pub dominant_threat: String,
}

pub struct ThreatClassifier;

impl ThreatClassifier {
    pub fn new() -> Self {
        ThreatClassifier
    }

    fn score(indicators: &HashSet<String>, behaviors: &HashSet<String>, profile: &CategoryProfile) -> f64 {
        let indicator_score = if profile.indicator_keywords.is_empty() {
            0.0
        } else {
            let matches = indicators
                .iter()
                .filter(|i| profile.indicator_keywords.contains(i.as_str()))
                .count();
            matches as f64 / profile.indicator_keywords.len() as f64
        };

        let behavior_score = if profile.behavior_keywords.is_empty() {
            0.0
        } else {
            let matches = behaviors
                .iter()
                .filter(|b| profile.behavior_keywords.contains(b.as_str()))
                .count();
            matches as f64 / profile.behavior_keywords.len() as f64
        };

        indicator_score * profile.indicator_weight + behavior_score * profile.behavior_weight
    }

    /// Classify a threat from its indicator/behavior keyword sets.
    /// Ties break by fixed category precedence (Crow first).
    pub fn classify(
        &self,
        threat_id: impl Into<String>,
        indicators: &HashSet<String>,
        behaviors: &HashSet<String>,
    ) -> Classification {
        let mut all_scores = Vec::with_capacity(ThreatCategory::ALL.len());
        for category in ThreatCategory::ALL {
            let profile = profile_for(category);
            all_scores.push((category, Self::score(indicators, behaviors, &profile)));
        }

        let (best_category, best_score) = all_scores
            .iter()
            .copied()
            .fold((ThreatCategory::Crow, f64::MIN), |acc, candidate| {
                if candidate.1 > acc.1 {
                    candidate
                } else {
                    acc
                }
            });

        let profile = profile_for(best_category);
        let matched_indicators: Vec<String> = indicators
            .iter()
            .filter(|i| profile.indicator_keywords.contains(i.as_str()))
            .cloned()
            .collect();
        let matched_behaviors: Vec<String> = behaviors
            .iter()
            .filter(|b| profile.behavior_keywords.contains(b.as_str()))
            .cloned()
            .collect();

        Classification {
            threat_id: threat_id.into(),
            category: best_category,
            confidence: (best_score * 100.0).round() / 100.0,
            all_scores,
            matched_indicators,
            matched_behaviors,
            recommendations: self.recommendations_for(best_category),
        }
    }

    pub fn recommendations_for(&self, category: ThreatCategory) -> Vec<String> {
        profile_for(category)
            .recommendations
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// Classify a batch of threats and tally per-category counts.
    /// A classification only counts toward its category when confidence
    /// clears 0.5; below that it is tallied as "unknown".
    pub fn classify_batch(
        &self,
        threats: &[(String, HashSet<String>, HashSet<String>)],
    ) -> BatchClassification {
        let mut classifications = Vec::with_capacity(threats.len());
        let mut counts: Vec<(String, usize)> = ThreatCategory::ALL
            .iter()
            .map(|c| (format!("{:?}", c).to_lowercase(), 0))
            .collect();
        counts.push(("unknown".to_string(), 0));

        for (id, indicators, behaviors) in threats {
            let classification = self.classify(id.clone(), indicators, behaviors);
            let key = if classification.confidence >= 0.5 {
                format!("{:?}", classification.category).to_lowercase()
            } else {
                "unknown".to_string()
            };
            if let Some(entry) = counts.iter_mut().find(|(k, _)| k == &key) {
                entry.1 += 1;
            }
            classifications.push(classification);
        }

        let dominant_threat = if threats.is_empty() {
            "none".to_string()
        } else {
            counts
                .iter()
                .max_by_key(|(_, count)| *count)
                .map(|(k, _)| k.clone())
                .unwrap_or_else(|| "none".to_string())
        };

        BatchClassification {
            total_threats: threats.len(),
            classifications,
            counts,
            dominant_threat,
        }
    }
}

impl Default for ThreatClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn classifies_clear_rootkit_as_snake() {
        let classifier = ThreatClassifier::new();
        let indicators = set(&["rootkit", "kernel_modification", "driver_loading"]);
        let behaviors = set(&["privilege_escalation", "defense_evasion"]);
        let result = classifier.classify("t1", &indicators, &behaviors);
        assert_eq!(result.category, ThreatCategory::Snake);
        assert!(result.confidence > 0.0);
    }

    #[test]
    fn empty_keywords_default_to_crow_by_precedence() {
        let classifier = ThreatClassifier::new();
        let result = classifier.classify("t2", &HashSet::new(), &HashSet::new());
        assert_eq!(result.category, ThreatCategory::Crow);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn batch_classification_tallies_dominant_threat() {
        let classifier = ThreatClassifier::new();
        let threats = vec![
            (
                "a".to_string(),
                set(&["rootkit", "kernel_modification"]),
                set(&["privilege_escalation", "defense_evasion"]),
            ),
            (
                "b".to_string(),
                set(&["rootkit", "driver_loading", "process_hiding"]),
                set(&["privilege_escalation", "persistence"]),
            ),
        ];
        let batch = classifier.classify_batch(&threats);
        assert_eq!(batch.total_threats, 2);
        assert_eq!(batch.dominant_threat, "snake");
    }
}
