//! Rolling per-metric baselines and z-score anomaly detection.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::config::BaselineConfig;

const EPSILON: f64 = 1e-9;

#[derive(Clone, Debug)]
struct Sample {
    timestamp: DateTime<Utc>,
    value: f64,
}

/// Cached statistics for one metric.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Baseline {
    pub metric_name: String,
    pub sample_count: usize,
    pub mean: f64,
    pub stdev: f64,
    pub min: f64,
    pub max: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
    pub p99: f64,
    pub updated_at: DateTime<Utc>,
    pub learning_period_days: u32,
}

/// Result of an anomaly check against a baseline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnomalyCheck {
    pub is_anomalous: bool,
    pub reason: Option<String>,
    pub severity: Option<String>,
    pub confidence: f64,
    pub z_score: f64,
    pub value: f64,
    pub baseline_mean: Option<f64>,
    pub baseline_stdev: Option<f64>,
    pub deviation: Option<f64>,
    pub deviation_percent: Option<f64>,
}

impl AnomalyCheck {
    fn no_baseline(value: f64) -> Self {
        AnomalyCheck {
            is_anomalous: false,
            reason: Some("no_baseline".to_string()),
            severity: None,
            confidence: 0.0,
            z_score: 0.0,
            value,
            baseline_mean: None,
            baseline_stdev: None,
            deviation: None,
            deviation_percent: None,
        }
    }
}

/// Learns and maintains baselines of normal behavior per metric.
pub struct BaselineLearner {
    config: BaselineConfig,
    baselines: DashMap<String, Baseline>,
    samples: DashMap<String, VecDeque<Sample>>,
    last_update: DashMap<String, DateTime<Utc>>,
}

impl BaselineLearner {
    pub fn new(config: BaselineConfig) -> Self {
        BaselineLearner {
            config,
            baselines: DashMap::new(),
            samples: DashMap::new(),
            last_update: DashMap::new(),
        }
    }

    /// Record an observation for baseline learning, cleaning stale
    /// samples and recomputing the baseline if the update gates pass.
    pub fn record_observation(&self, metric_name: &str, value: f64) {
        let now = Utc::now();
        {
            let mut entry = self.samples.entry(metric_name.to_string()).or_default();
            entry.push_back(Sample { timestamp: now, value });
        }
        self.clean_old_samples(metric_name, now);

        if self.should_update_baseline(metric_name, now) {
            self.update_baseline(metric_name, now);
        }
    }

    fn clean_old_samples(&self, metric_name: &str, now: DateTime<Utc>) {
        let cutoff = now - Duration::days(self.config.learning_period_days as i64);
        if let Some(mut entry) = self.samples.get_mut(metric_name) {
            while matches!(entry.front(), Some(s) if s.timestamp <= cutoff) {
                entry.pop_front();
            }
        }
    }

    fn should_update_baseline(&self, metric_name: &str, now: DateTime<Utc>) -> bool {
        let sample_count = self
            .samples
            .get(metric_name)
            .map(|s| s.len())
            .unwrap_or(0);
        if sample_count < self.config.min_samples {
            return false;
        }

        if let Some(last) = self.last_update.get(metric_name) {
            let hours_since = (now - *last).num_seconds() as f64 / 3600.0;
            if hours_since < self.config.update_interval_hours as f64 {
                return false;
            }
        }

        true
    }

    fn update_baseline(&self, metric_name: &str, now: DateTime<Utc>) {
        let values: Vec<f64> = match self.samples.get(metric_name) {
            Some(samples) if !samples.is_empty() => samples.iter().map(|s| s.value).collect(),
            _ => return,
        };

        let n = values.len();
        let mean = values.iter().sum::<f64>() / n as f64;
        let variance = if n > 1 {
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64
        } else {
            0.0
        };
        let stdev = variance.sqrt();

        let mut sorted = values.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

        let baseline = Baseline {
            metric_name: metric_name.to_string(),
            sample_count: n,
            mean,
            stdev,
            min: sorted[0],
            max: sorted[n - 1],
            p25: percentile(&sorted, 0.25),
            p50: percentile(&sorted, 0.5),
            p75: percentile(&sorted, 0.75),
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
            updated_at: now,
            learning_period_days: self.config.learning_period_days,
        };

        self.baselines.insert(metric_name.to_string(), baseline);
        self.last_update.insert(metric_name.to_string(), now);
    }

    pub fn get_baseline(&self, metric_name: &str) -> Option<Baseline> {
        self.baselines.get(metric_name).map(|b| b.clone())
    }

    pub fn get_all_baselines(&self) -> HashMap<String, Baseline> {
        self.baselines
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn clear_baseline(&self, metric_name: &str) -> bool {
        let removed = self.baselines.remove(metric_name).is_some();
        self.samples.remove(metric_name);
        self.last_update.remove(metric_name);
        removed
    }

    pub fn clear_all_baselines(&self) {
        self.baselines.clear();
        self.samples.clear();
        self.last_update.clear();
    }

    /// Check whether `value` is anomalous relative to the metric's
    /// baseline. Returns `{is_anomalous: false, reason: "no_baseline"}`
    /// (never an error) when no baseline has been learned yet.
    pub fn is_anomalous(&self, metric_name: &str, value: f64, sensitivity: f64) -> AnomalyCheck {
        let baseline = match self.baselines.get(metric_name) {
            Some(b) => b.clone(),
            None => return AnomalyCheck::no_baseline(value),
        };

        // Zero variance short-circuits to z_score = 0 rather than dividing
        // by max(stdev, EPSILON): matches the original learner's behavior
        // for a constant baseline, deliberately diverging from the formula.
        let z_score = if baseline.stdev > EPSILON {
            ((value - baseline.mean) / baseline.stdev).abs()
        } else {
            0.0
        };

        let is_anomalous = z_score > sensitivity;

        let (severity, confidence) = if z_score > sensitivity * 2.0 {
            ("critical", 0.95)
        } else if z_score > sensitivity * 1.5 {
            ("high", 0.85)
        } else if z_score > sensitivity {
            ("medium", 0.70)
        } else {
            ("normal", 0.50)
        };

        let deviation = value - baseline.mean;
        let deviation_percent = if baseline.mean.abs() > EPSILON {
            Some(deviation / baseline.mean * 100.0)
        } else {
            Some(0.0)
        };

        AnomalyCheck {
            is_anomalous,
            reason: None,
            severity: Some(severity.to_string()),
            confidence: if is_anomalous { confidence } else { 0.0 },
            z_score,
            value,
            baseline_mean: Some(baseline.mean),
            baseline_stdev: Some(baseline.stdev),
            deviation: Some(deviation),
            deviation_percent,
        }
    }

    /// Export the `{baselines, config}` snapshot consumed by `import_baselines`.
    pub fn export_baselines(&self) -> serde_json::Value {
        let snapshot = BaselineSnapshot {
            baselines: self.get_all_baselines(),
            config: self.config.clone(),
        };
        serde_json::to_value(snapshot).unwrap_or(serde_json::Value::Null)
    }

    /// Import a previously exported `{baselines, config}` snapshot.
    /// Unknown metric names are accepted; missing required fields fail
    /// deserialization and the import is rejected as a whole.
    pub fn import_baselines(&self, data: serde_json::Value) -> Result<(), serde_json::Error> {
        let snapshot: BaselineSnapshot = serde_json::from_value(data)?;
        for (metric, baseline) in snapshot.baselines {
            self.last_update.insert(metric.clone(), baseline.updated_at);
            self.baselines.insert(metric, baseline);
        }
        Ok(())
    }
}

/// Wire shape for baseline import/export: learned baselines alongside
/// the learning config they were produced under.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct BaselineSnapshot {
    baselines: HashMap<String, Baseline>,
    config: BaselineConfig,
}

fn percentile(sorted_values: &[f64], fraction: f64) -> f64 {
    let n = sorted_values.len();
    if n == 0 {
        return 0.0;
    }
    let idx = ((n as f64) * fraction).floor() as usize;
    sorted_values[idx.min(n - 1)]
}
