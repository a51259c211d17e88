use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

use crate::analysis::anomaly::{AnomalyDetector, RunAnomalies};
use crate::analysis::dora::{self, DoraMetrics};
use crate::analysis::rules::{self, OptimizationTip};
use crate::models::WorkflowRun;

/// Everything the presentation layer needs for one repository, derived in
/// a single pass over a run batch.
#[derive(Debug, Serialize)]
pub struct RunInsights {
    pub repo: String,
    pub collected_at: DateTime<Utc>,
    pub total_runs: usize,
    pub completed_runs: usize,
    pub dora: DoraMetrics,
    pub anomalies: IndexMap<i64, RunAnomalies>,
    pub tips: Vec<OptimizationTip>,
}

/// Derives all pure signals from a newest-first run batch. No external
/// effects; alert evaluation runs separately against the store.
pub fn collect_insights(repo: &str, runs: &[WorkflowRun], z_threshold: f64) -> RunInsights {
    let detector = AnomalyDetector::new(z_threshold);

    RunInsights {
        repo: repo.to_string(),
        collected_at: Utc::now(),
        total_runs: runs.len(),
        completed_runs: runs.iter().filter(|r| r.is_completed()).count(),
        dora: dora::calculate_dora(runs),
        anomalies: detector.detect(runs),
        tips: rules::analyze(runs),
    }
}
