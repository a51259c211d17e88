use std::collections::VecDeque;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::stats;
use crate::models::WorkflowRun;

/// How many preceding samples a rolling baseline may hold.
pub const BASELINE_WINDOW: usize = 20;
/// Fewest baseline samples required before any detection happens.
pub const MIN_BASELINE_SAMPLES: usize = 5;
/// Baselines with stddev below this are treated as constant; a near-zero
/// spread would turn trivial noise into huge z-scores.
pub const MIN_STD_DEV: f64 = 1.0;
pub const DEFAULT_Z_THRESHOLD: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyMetric {
    Duration,
    QueueWait,
}

impl AnomalyMetric {
    pub const ALL: [AnomalyMetric; 2] = [AnomalyMetric::Duration, AnomalyMetric::QueueWait];

    /// Defined positive values only; zero and missing both mean "no sample".
    #[allow(clippy::cast_precision_loss)]
    fn value_of(self, run: &WorkflowRun) -> Option<f64> {
        let ms = match self {
            AnomalyMetric::Duration => run.duration_ms()?,
            AnomalyMetric::QueueWait => run.queue_wait_ms()?,
        };
        (ms > 0).then_some(ms as f64)
    }

    /// An unusually short queue wait is good news, never an anomaly.
    fn flags_low(self) -> bool {
        matches!(self, AnomalyMetric::Duration)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnomalyResult {
    pub metric: AnomalyMetric,
    pub value: f64,
    pub z_score: f64,
    pub baseline_mean: f64,
    pub baseline_std_dev: f64,
    pub is_high: bool,
    pub is_low: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunAnomalies {
    pub run_id: i64,
    pub results: Vec<AnomalyResult>,
    pub has_anomaly: bool,
    /// Largest |z| across this run's metrics.
    pub worst_z_score: f64,
}

/// The most recent window's statistics, exposed for charting a baseline
/// band independent of per-run detection.
#[derive(Debug, Clone, Serialize)]
pub struct MetricBaseline {
    pub metric: AnomalyMetric,
    pub mean: f64,
    pub std_dev: f64,
    pub upper_bound: f64,
    pub lower_bound: f64,
    pub sample_count: usize,
}

pub struct AnomalyDetector {
    threshold: f64,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(DEFAULT_Z_THRESHOLD)
    }
}

impl AnomalyDetector {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Flags per-run outliers in duration and queue wait against rolling
    /// causal baselines. The batch arrives newest-first, as the provider
    /// returns it; detection walks it chronologically, so a run's baseline
    /// only ever contains runs that preceded it.
    pub fn detect(&self, runs: &[WorkflowRun]) -> IndexMap<i64, RunAnomalies> {
        let chronological: Vec<&WorkflowRun> = runs.iter().rev().collect();
        let mut merged: IndexMap<i64, RunAnomalies> = IndexMap::new();

        for metric in AnomalyMetric::ALL {
            let mut window: VecDeque<f64> = VecDeque::with_capacity(BASELINE_WINDOW);

            for run in &chronological {
                let Some(value) = metric.value_of(run) else {
                    continue;
                };

                if window.len() >= MIN_BASELINE_SAMPLES {
                    let samples: Vec<f64> = window.iter().copied().collect();
                    let mean = stats::mean(&samples);
                    let std_dev = stats::sample_std_dev(&samples, mean);

                    if std_dev >= MIN_STD_DEV {
                        let z_score = (value - mean) / std_dev;
                        let result = AnomalyResult {
                            metric,
                            value,
                            z_score,
                            baseline_mean: mean,
                            baseline_std_dev: std_dev,
                            is_high: z_score > self.threshold,
                            is_low: metric.flags_low() && z_score < -self.threshold,
                        };
                        merge_result(&mut merged, run.id, result);
                    }
                }

                window.push_back(value);
                if window.len() > BASELINE_WINDOW {
                    window.pop_front();
                }
            }
        }

        merged
    }

    /// Mean and band of the most recent window for one metric, for
    /// visualization. Returns None below the minimum sample count.
    pub fn compute_baseline(
        &self,
        runs: &[WorkflowRun],
        metric: AnomalyMetric,
    ) -> Option<MetricBaseline> {
        // Newest-first input: the first values encountered are the most
        // recent ones.
        let samples: Vec<f64> = runs
            .iter()
            .filter_map(|r| metric.value_of(r))
            .take(BASELINE_WINDOW)
            .collect();

        if samples.len() < MIN_BASELINE_SAMPLES {
            return None;
        }

        let mean = stats::mean(&samples);
        let std_dev = stats::sample_std_dev(&samples, mean);

        Some(MetricBaseline {
            metric,
            mean,
            std_dev,
            upper_bound: mean + self.threshold * std_dev,
            lower_bound: (mean - self.threshold * std_dev).max(0.0),
            sample_count: samples.len(),
        })
    }
}

fn merge_result(merged: &mut IndexMap<i64, RunAnomalies>, run_id: i64, result: AnomalyResult) {
    let entry = merged.entry(run_id).or_insert_with(|| RunAnomalies {
        run_id,
        results: Vec::new(),
        has_anomaly: false,
        worst_z_score: 0.0,
    });

    entry.has_anomaly |= result.is_high || result.is_low;
    if result.z_score.abs() > entry.worst_z_score {
        entry.worst_z_score = result.z_score.abs();
    }
    entry.results.push(result);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_support::*;

    /// Builds a newest-first batch from chronological duration seconds.
    fn batch_from_durations(durations_secs: &[i64]) -> Vec<WorkflowRun> {
        let mut runs: Vec<WorkflowRun> = durations_secs
            .iter()
            .enumerate()
            .map(|(i, &d)| run_with_duration(i as i64 + 1, i as i64 * 60, d))
            .collect();
        runs.reverse();
        runs
    }

    #[test]
    fn test_empty_batch_yields_no_anomalies() {
        let detector = AnomalyDetector::default();
        assert!(detector.detect(&[]).is_empty());
    }

    #[test]
    fn test_no_detection_below_minimum_samples() {
        // Four baseline runs then a wild outlier: still below the minimum.
        let runs = batch_from_durations(&[100, 110, 90, 105, 10_000]);
        let detector = AnomalyDetector::default();
        let anomalies = detector.detect(&runs);

        assert!(anomalies.values().all(|a| !a.has_anomaly));
    }

    #[test]
    fn test_duration_spike_is_flagged_high() {
        let runs = batch_from_durations(&[100, 110, 90, 105, 95, 102, 10_000]);
        let detector = AnomalyDetector::default();
        let anomalies = detector.detect(&runs);

        let spike = anomalies.get(&7).expect("spike run should be evaluated");
        assert!(spike.has_anomaly);
        let result = spike
            .results
            .iter()
            .find(|r| r.metric == AnomalyMetric::Duration)
            .unwrap();
        assert!(result.is_high);
        assert!(!result.is_low);
        assert!(result.z_score > DEFAULT_Z_THRESHOLD);
    }

    #[test]
    fn test_duration_collapse_is_flagged_low() {
        let runs = batch_from_durations(&[1000, 1100, 900, 1050, 950, 1020, 1]);
        let detector = AnomalyDetector::default();
        let anomalies = detector.detect(&runs);

        let collapse = anomalies.get(&7).unwrap();
        let result = collapse
            .results
            .iter()
            .find(|r| r.metric == AnomalyMetric::Duration)
            .unwrap();
        assert!(result.is_low);
    }

    #[test]
    fn test_short_queue_wait_is_never_flagged() {
        // Queue waits shrinking to near zero: good news, not an anomaly.
        let waits = [600, 650, 590, 620, 610, 605, 1];
        let mut runs: Vec<WorkflowRun> = waits
            .iter()
            .enumerate()
            .map(|(i, &w)| run_with_queue_wait(i as i64 + 1, i as i64 * 60, w))
            .collect();
        runs.reverse();

        let detector = AnomalyDetector::default();
        let anomalies = detector.detect(&runs);

        if let Some(last) = anomalies.get(&7) {
            let queue = last
                .results
                .iter()
                .find(|r| r.metric == AnomalyMetric::QueueWait)
                .unwrap();
            assert!(!queue.is_low);
            assert!(!queue.is_high);
        }
    }

    #[test]
    fn test_uniform_baseline_never_flags() {
        // Identical durations give stddev 0 < 1: detection must skip, even
        // for an extreme value.
        let runs = batch_from_durations(&[100, 100, 100, 100, 100, 100, 50_000]);
        let detector = AnomalyDetector::default();
        let anomalies = detector.detect(&runs);

        assert!(anomalies.is_empty());
    }

    #[test]
    fn test_detection_is_causal() {
        // The z-score of run 7 must not change when later runs change.
        let base = batch_from_durations(&[100, 110, 90, 105, 95, 102, 400, 120]);
        let mut mutated = batch_from_durations(&[100, 110, 90, 105, 95, 102, 400, 99_999]);

        let detector = AnomalyDetector::default();
        let a = detector.detect(&base);
        let b = detector.detect(&mutated);

        let za = a.get(&7).unwrap().results[0].z_score;
        let zb = b.get(&7).unwrap().results[0].z_score;
        assert_eq!(za, zb);

        // Also invariant under dropping the later run entirely.
        mutated.remove(0);
        let c = detector.detect(&mutated);
        let zc = c.get(&7).unwrap().results[0].z_score;
        assert_eq!(za, zc);
    }

    #[test]
    fn test_baseline_window_is_bounded() {
        // 30 stable runs then a spike: the baseline only holds the last 20.
        let mut durations: Vec<i64> = (0..30).map(|i| 100 + (i % 7) * 5).collect();
        durations.push(500);
        let runs = batch_from_durations(&durations);

        let detector = AnomalyDetector::default();
        let anomalies = detector.detect(&runs);

        let spike = anomalies.get(&31).unwrap();
        let result = &spike.results[0];
        // Mean of a 20-sample window of the 100..130 pattern.
        assert!(result.baseline_mean > 100.0 * 1000.0 && result.baseline_mean < 130.0 * 1000.0);
        assert!(result.is_high);
    }

    #[test]
    fn test_worst_z_score_is_largest_magnitude() {
        let runs = batch_from_durations(&[100, 110, 90, 105, 95, 102, 10_000]);
        let detector = AnomalyDetector::default();
        let anomalies = detector.detect(&runs);

        let spike = anomalies.get(&7).unwrap();
        let max_abs = spike
            .results
            .iter()
            .map(|r| r.z_score.abs())
            .fold(0.0_f64, f64::max);
        assert_eq!(spike.worst_z_score, max_abs);
    }

    #[test]
    fn test_detection_is_deterministic() {
        let runs = batch_from_durations(&[100, 140, 90, 125, 95, 102, 300, 80, 110]);
        let detector = AnomalyDetector::default();

        let a = detector.detect(&runs);
        let b = detector.detect(&runs);

        assert_eq!(a.len(), b.len());
        for (id, result) in &a {
            assert_eq!(result.worst_z_score, b.get(id).unwrap().worst_z_score);
        }
    }

    #[test]
    fn test_compute_baseline_requires_minimum_samples() {
        let runs = batch_from_durations(&[100, 110, 90]);
        let detector = AnomalyDetector::default();
        assert!(detector
            .compute_baseline(&runs, AnomalyMetric::Duration)
            .is_none());
    }

    #[test]
    fn test_compute_baseline_band() {
        let runs = batch_from_durations(&[100, 110, 90, 105, 95]);
        let detector = AnomalyDetector::default();
        let baseline = detector
            .compute_baseline(&runs, AnomalyMetric::Duration)
            .unwrap();

        assert_eq!(baseline.sample_count, 5);
        assert!((baseline.mean - 100_000.0).abs() < 1.0);
        assert!(baseline.upper_bound > baseline.mean);
        assert!(baseline.lower_bound < baseline.mean);
        assert!(baseline.lower_bound >= 0.0);
    }

    #[test]
    fn test_compute_baseline_uses_most_recent_window() {
        // 25 chronological values; only the newest 20 should be sampled.
        let durations: Vec<i64> = (0..25).map(|i| if i < 5 { 10_000 } else { 100 + i }).collect();
        let runs = batch_from_durations(&durations);

        let detector = AnomalyDetector::default();
        let baseline = detector
            .compute_baseline(&runs, AnomalyMetric::Duration)
            .unwrap();

        assert_eq!(baseline.sample_count, 20);
        // The five old 10_000s are outside the window.
        assert!(baseline.mean < 200_000.0);
    }
}
