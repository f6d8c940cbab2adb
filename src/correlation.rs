//! Pairwise correlation, attack-chain reconstruction, and threat graphs.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CorrelationConfig;
use crate::stain::Stain;

/// Pairwise correlation score plus the contributing signals.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Correlation {
    pub strength: f64,
    pub indicators: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkedStain {
    pub stain_id: String,
    pub correlation: f64,
    pub indicators: Vec<String>,
}

/// A primary stain and the other stains linked to it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StainGroup {
    pub primary_stain: String,
    pub linked_stains: Vec<LinkedStain>,
    pub correlation_strength: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttackChain {
    pub length: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub stain_ids: Vec<String>,
    pub attack_pattern: String,
    pub severity: String,
    pub recommendations: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub score: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub weight: f64,
    pub relationship: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThreatCluster {
    pub cluster_id: usize,
    pub size: usize,
    pub node_ids: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThreatGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub density: f64,
    pub clusters: Vec<ThreatCluster>,
}

pub struct CorrelationEngine {
    config: CorrelationConfig,
}

impl CorrelationEngine {
    pub fn new(config: CorrelationConfig) -> Self {
        CorrelationEngine { config }
    }

    /// Score how related two stains are. Symmetric in its own
    /// construction — swapping `a` and `b` yields the same result.
    pub fn correlate(&self, a: &Stain, b: &Stain) -> Correlation {
        let mut indicators = Vec::new();
        let mut strength = 0.0;

        if let (Some(ip_a), Some(ip_b)) = (&a.target.ip, &b.target.ip) {
            if ip_a == ip_b {
                indicators.push("same_ip".to_string());
                strength += 0.4;
            }
        }

        if (b.first_seen - a.first_seen).num_seconds().abs() < 3600 {
            indicators.push("time_proximity".to_string());
            strength += 0.3;
        }

        if a.marker_type == b.marker_type {
            indicators.push("same_threat_type".to_string());
            strength += 0.3;
        }

        if let (Some(tree_a), Some(tree_b)) = (&a.forest_location.tree, &b.forest_location.tree) {
            if tree_a == tree_b {
                indicators.push("same_tree".to_string());
                strength += 0.2;
            }
        }

        Correlation {
            strength: strength.min(1.0),
            indicators,
        }
    }

    /// Group stains by mutual correlation. Each stain joins at most one
    /// group: once it is linked as a secondary member it is excluded
    /// from becoming a primary or joining another group.
    pub fn link_stains(&self, stains: &[Stain]) -> Vec<StainGroup> {
        if stains.is_empty() {
            return Vec::new();
        }

        let mut processed: HashSet<usize> = HashSet::new();
        let mut groups = Vec::new();

        for i in 0..stains.len() {
            if processed.contains(&i) {
                continue;
            }

            let mut linked = Vec::new();
            for j in (i + 1)..stains.len() {
                if processed.contains(&j) {
                    continue;
                }
                let correlation = self.correlate(&stains[i], &stains[j]);
                if correlation.strength >= self.config.correlation_threshold {
                    linked.push(LinkedStain {
                        stain_id: stains[j].tag_id.clone(),
                        correlation: correlation.strength,
                        indicators: correlation.indicators,
                    });
                    processed.insert(j);
                }
            }

            if !linked.is_empty() {
                let correlation_strength =
                    linked.iter().map(|l| l.correlation).sum::<f64>() / linked.len() as f64;
                processed.insert(i);
                groups.push(StainGroup {
                    primary_stain: stains[i].tag_id.clone(),
                    linked_stains: linked,
                    correlation_strength,
                });
            }
        }

        groups
    }

    /// Reconstruct attack chains: stains sorted by time, split wherever
    /// the gap between consecutive stains exceeds `chain_gap_hours`.
    /// Only runs of length >= 2 become chains.
    pub fn reconstruct_chains(&self, stains: &[Stain]) -> Vec<AttackChain> {
        let mut sorted: Vec<&Stain> = stains.iter().collect();
        sorted.sort_by_key(|s| s.first_seen);

        let gap_seconds = self.config.chain_gap_hours as i64 * 3600;
        let mut chains = Vec::new();
        let mut current: Vec<&Stain> = Vec::new();
        let mut last_time: Option<DateTime<Utc>> = None;

        for stain in sorted {
            if let Some(last) = last_time {
                if (stain.first_seen - last).num_seconds() > gap_seconds {
                    if current.len() >= 2 {
                        chains.push(self.analyze_chain(&current));
                    }
                    current.clear();
                }
            }
            current.push(stain);
            last_time = Some(stain.first_seen);
        }

        if current.len() >= 2 {
            chains.push(self.analyze_chain(&current));
        }

        chains
    }

    fn analyze_chain(&self, chain: &[&Stain]) -> AttackChain {
        AttackChain {
            length: chain.len(),
            start_time: chain[0].first_seen,
            end_time: chain[chain.len() - 1].first_seen,
            stain_ids: chain.iter().map(|s| s.tag_id.clone()).collect(),
            attack_pattern: self.identify_pattern(chain),
            severity: self.assess_chain_severity(chain),
            recommendations: self.chain_recommendations(chain),
        }
    }

    fn identify_pattern(&self, chain: &[&Stain]) -> String {
        use crate::stain::MarkerType;

        let types: Vec<MarkerType> = chain.iter().map(|s| s.marker_type).collect();
        let has_crow = types.contains(&MarkerType::Crow);
        let has_magpie = types.contains(&MarkerType::Magpie);
        let has_squirrel = types.contains(&MarkerType::Squirrel);

        if has_crow && has_magpie {
            "MALWARE_TO_EXFILTRATION".to_string()
        } else if has_squirrel {
            "LATERAL_MOVEMENT".to_string()
        } else if types.iter().all(|t| *t == types[0]) {
            "REPEATED_ATTACK".to_string()
        } else {
            "MULTI_STAGE_ATTACK".to_string()
        }
    }

    fn assess_chain_severity(&self, chain: &[&Stain]) -> String {
        let max_score = chain
            .iter()
            .map(|s| s.threat_score)
            .fold(0.0, f64::max);

        if max_score >= 8.0 || chain.len() >= 5 {
            "CRITICAL".to_string()
        } else if max_score >= 6.0 || chain.len() >= 3 {
            "HIGH".to_string()
        } else {
            "MEDIUM".to_string()
        }
    }

    fn chain_recommendations(&self, chain: &[&Stain]) -> Vec<String> {
        let mut recommendations = vec![
            format!("Attack chain detected with {} stages", chain.len()),
            "Review all affected systems".to_string(),
            "Check for additional compromised assets".to_string(),
        ];

        match self.identify_pattern(chain).as_str() {
            "LATERAL_MOVEMENT" => recommendations.push("Strengthen network segmentation".to_string()),
            "MALWARE_TO_EXFILTRATION" => {
                recommendations.push("Review DLP controls and data access".to_string())
            }
            _ => {}
        }

        recommendations
    }

    /// Build a threat relationship graph over stains, edges at
    /// `graph_edge_threshold` or above, clustered by connected
    /// components (iterative DFS, no recursion so graph size never
    /// risks a stack overflow).
    pub fn build_threat_graph(&self, stains: &[Stain]) -> ThreatGraph {
        let nodes: Vec<GraphNode> = stains
            .iter()
            .map(|s| GraphNode {
                id: s.tag_id.clone(),
                score: s.threat_score,
            })
            .collect();

        let mut edges = Vec::new();
        for i in 0..stains.len() {
            for j in (i + 1)..stains.len() {
                let correlation = self.correlate(&stains[i], &stains[j]);
                if correlation.strength >= self.config.graph_edge_threshold {
                    edges.push(GraphEdge {
                        source: stains[i].tag_id.clone(),
                        target: stains[j].tag_id.clone(),
                        weight: correlation.strength,
                        relationship: correlation.indicators.join(", "),
                    });
                }
            }
        }

        let n = nodes.len();
        let density = if n > 1 {
            edges.len() as f64 / (n as f64 * (n as f64 - 1.0) / 2.0)
        } else {
            0.0
        };

        let clusters = self.identify_clusters(&nodes, &edges);

        ThreatGraph {
            nodes,
            edges,
            density,
            clusters,
        }
    }

    fn identify_clusters(&self, nodes: &[GraphNode], edges: &[GraphEdge]) -> Vec<ThreatCluster> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut clusters = Vec::new();

        for node in nodes {
            if visited.contains(&node.id) {
                continue;
            }

            let mut cluster: HashSet<String> = HashSet::new();
            let mut stack = vec![node.id.clone()];

            while let Some(current) = stack.pop() {
                if visited.contains(&current) {
                    continue;
                }
                visited.insert(current.clone());
                cluster.insert(current.clone());

                for edge in edges {
                    if edge.source == current && !visited.contains(&edge.target) {
                        stack.push(edge.target.clone());
                    } else if edge.target == current && !visited.contains(&edge.source) {
                        stack.push(edge.source.clone());
                    }
                }
            }

            if cluster.len() > 1 {
                clusters.push(ThreatCluster {
                    cluster_id: clusters.len() + 1,
                    size: cluster.len(),
                    node_ids: cluster.into_iter().collect(),
                });
            }
        }

        clusters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stain::{ColorTag, ForestLocation, MarkerType, Stain, TargetRef};
    use chrono::Duration;

    fn stain_with_ip(ip: &str, marker: MarkerType, offset_minutes: i64) -> Stain {
        let mut s = Stain::new(
            marker,
            ColorTag::Red,
            ip,
            TargetRef {
                ip: Some(ip.to_string()),
                hash: None,
                hostname: None,
            },
            ForestLocation::default(),
            5.0,
            0.8,
        )
        .unwrap();
        s.first_seen = Utc::now() + Duration::minutes(offset_minutes);
        s.last_seen = s.first_seen;
        s
    }

    #[test]
    fn correlation_is_symmetric() {
        let engine = CorrelationEngine::new(CorrelationConfig::default());
        let a = stain_with_ip("1.1.1.1", MarkerType::Crow, 0);
        let b = stain_with_ip("1.1.1.1", MarkerType::Crow, 5);
        let ab = engine.correlate(&a, &b);
        let ba = engine.correlate(&b, &a);
        assert_eq!(ab.strength, ba.strength);
    }

    #[test]
    fn link_stains_each_joins_at_most_one_group() {
        let engine = CorrelationEngine::new(CorrelationConfig::default());
        let stains = vec![
            stain_with_ip("1.1.1.1", MarkerType::Crow, 0),
            stain_with_ip("1.1.1.1", MarkerType::Crow, 1),
            stain_with_ip("1.1.1.1", MarkerType::Crow, 2),
        ];
        let groups = engine.link_stains(&stains);
        let mut seen = HashSet::new();
        for group in &groups {
            assert!(seen.insert(group.primary_stain.clone()));
            for linked in &group.linked_stains {
                assert!(seen.insert(linked.stain_id.clone()));
            }
        }
    }

    #[test]
    fn chain_gap_over_threshold_splits_runs() {
        let engine = CorrelationEngine::new(CorrelationConfig::default());
        let stains = vec![
            stain_with_ip("1.1.1.1", MarkerType::Crow, 0),
            stain_with_ip("1.1.1.1", MarkerType::Crow, 10),
            stain_with_ip("1.1.1.1", MarkerType::Crow, 1000),
        ];
        let chains = engine.reconstruct_chains(&stains);
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].length, 2);
    }

    #[test]
    fn malware_then_exfiltration_pattern_detected() {
        let engine = CorrelationEngine::new(CorrelationConfig::default());
        let stains = vec![
            stain_with_ip("1.1.1.1", MarkerType::Crow, 0),
            stain_with_ip("1.1.1.1", MarkerType::Magpie, 5),
        ];
        let chains = engine.reconstruct_chains(&stains);
        assert_eq!(chains[0].attack_pattern, "MALWARE_TO_EXFILTRATION");
    }

    #[test]
    fn clusters_require_more_than_one_node() {
        let engine = CorrelationEngine::new(CorrelationConfig::default());
        let stains = vec![
            stain_with_ip("1.1.1.1", MarkerType::Crow, 0),
            stain_with_ip("1.1.1.1", MarkerType::Crow, 1),
            stain_with_ip("9.9.9.9", MarkerType::Bat, 0),
        ];
        let graph = engine.build_threat_graph(&stains);
        assert_eq!(graph.clusters.len(), 1);
        assert_eq!(graph.clusters[0].size, 2);
    }

    use proptest::prelude::*;

    fn marker_strategy() -> impl Strategy<Value = MarkerType> {
        prop_oneof![
            Just(MarkerType::Crow),
            Just(MarkerType::Magpie),
            Just(MarkerType::Squirrel),
            Just(MarkerType::Snake),
            Just(MarkerType::Parasite),
            Just(MarkerType::Bat),
        ]
    }

    proptest! {
        /// correlate(a, b) must equal correlate(b, a) for any pair of
        /// stains, regardless of marker type or time offset.
        #[test]
        fn correlate_is_symmetric_for_arbitrary_pairs(
            marker_a in marker_strategy(),
            marker_b in marker_strategy(),
            offset_minutes in -500i64..500,
        ) {
            let engine = CorrelationEngine::new(CorrelationConfig::default());
            let a = stain_with_ip("5.5.5.5", marker_a, 0);
            let b = stain_with_ip("5.5.5.5", marker_b, offset_minutes);
            let ab = engine.correlate(&a, &b);
            let ba = engine.correlate(&b, &a);
            prop_assert_eq!(ab.strength, ba.strength);
        }

        /// No returned chain may contain a consecutive gap larger than
        /// `chain_gap_hours`, no matter how the input gaps are chosen.
        #[test]
        fn reconstructed_chains_never_span_a_gap_over_the_limit(
            gaps_minutes in prop::collection::vec(0i64..400, 1..8),
        ) {
            let engine = CorrelationEngine::new(CorrelationConfig::default());
            let mut offset = 0i64;
            let mut stains = Vec::new();
            for (idx, gap) in gaps_minutes.iter().enumerate() {
                let ip = format!("6.6.6.{}", idx);
                stains.push(stain_with_ip(&ip, MarkerType::Crow, offset));
                offset += gap;
            }
            let chains = engine.reconstruct_chains(&stains);
            let limit_seconds = engine_gap_seconds(&engine);
            for chain in &chains {
                prop_assert!((chain.end_time - chain.start_time).num_seconds() >= 0);
                let members: Vec<&Stain> = stains
                    .iter()
                    .filter(|s| chain.stain_ids.contains(&s.tag_id))
                    .collect();
                let mut sorted = members.clone();
                sorted.sort_by_key(|s| s.first_seen);
                for window in sorted.windows(2) {
                    let gap = (window[1].first_seen - window[0].first_seen).num_seconds();
                    prop_assert!(gap <= limit_seconds);
                }
            }
        }
    }

    fn engine_gap_seconds(engine: &CorrelationEngine) -> i64 {
        engine.config.chain_gap_hours as i64 * 3600
    }
}
