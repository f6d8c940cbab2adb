//! Central configuration for every tunable threshold in the core.
//!
//! Mirrors the nested-struct-with-`Default` shape used for
//! `core::config::CogOpsConfig`, generalized to the detection/response
//! thresholds this engine exposes.

use serde::{Deserialize, Serialize};

/// Confidence-gated decision policy thresholds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DecisionConfig {
    pub auto_fire_threshold: f64,
    pub propose_threshold: f64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        DecisionConfig {
            auto_fire_threshold: 0.90,
            propose_threshold: 0.70,
        }
    }
}

/// Baseline learner tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BaselineConfig {
    pub learning_period_days: u32,
    pub min_samples: usize,
    pub update_interval_hours: u32,
    pub sensitivity: f64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        BaselineConfig {
            learning_period_days: 7,
            min_samples: 100,
            update_interval_hours: 24,
            sensitivity: 2.0,
        }
    }
}

/// Nanobot-specific operating limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NanobotConfig {
    pub max_blocks: usize,
    pub max_honeypots: usize,
    pub requests_per_minute: u32,
    pub burst_threshold: u32,
    pub time_window_seconds: u64,
    pub max_concurrent_enumerations: usize,
}

impl Default for NanobotConfig {
    fn default() -> Self {
        NanobotConfig {
            max_blocks: 1000,
            max_honeypots: 10,
            requests_per_minute: 60,
            burst_threshold: 100,
            time_window_seconds: 60,
            max_concurrent_enumerations: 5,
        }
    }
}

/// Correlation and attack-chain tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CorrelationConfig {
    pub chain_time_window_hours: u32,
    pub chain_gap_hours: u32,
    pub correlation_threshold: f64,
    pub graph_edge_threshold: f64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        CorrelationConfig {
            chain_time_window_hours: 24,
            chain_gap_hours: 2,
            correlation_threshold: 0.5,
            graph_edge_threshold: 0.3,
        }
    }
}

/// Top-level configuration, constructed once and passed by value into
/// every component that needs it.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    pub decision: DecisionConfig,
    pub baseline: BaselineConfig,
    pub nanobot: NanobotConfig,
    pub correlation: CorrelationConfig,
    pub event_bus_capacity: usize,
}

impl EngineConfig {
    pub fn new() -> Self {
        let mut cfg = Self::default();
        cfg.event_bus_capacity = 10_000;
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_external_interface_contract() {
        let cfg = EngineConfig::new();
        assert_eq!(cfg.decision.auto_fire_threshold, 0.90);
        assert_eq!(cfg.decision.propose_threshold, 0.70);
        assert_eq!(cfg.baseline.min_samples, 100);
        assert_eq!(cfg.nanobot.max_blocks, 1000);
        assert_eq!(cfg.correlation.chain_gap_hours, 2);
        assert_eq!(cfg.event_bus_capacity, 10_000);
    }
}
