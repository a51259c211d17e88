use serde::Serialize;

use super::stats;
use crate::models::WorkflowRun;

/// Declaration order doubles as sort order: critical tips surface first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TipSeverity {
    Critical,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TipCategory {
    Cost,
    Performance,
    Reliability,
    Security,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizationTip {
    pub id: &'static str,
    pub severity: TipSeverity,
    pub category: TipCategory,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact: Option<String>,
}

/// One threshold heuristic over the run batch. Every rule guards its own
/// minimum sample size so sparse histories never produce noisy advice.
pub trait OptimizationRule {
    fn id(&self) -> &'static str;

    /// `runs` is the full newest-first batch; `completed` the completed
    /// subset in the same order.
    fn evaluate(&self, runs: &[WorkflowRun], completed: &[&WorkflowRun])
        -> Option<OptimizationTip>;
}

pub fn default_rules() -> Vec<Box<dyn OptimizationRule>> {
    vec![
        Box::new(QueueWaitRule),
        Box::new(SuccessRateRule),
        Box::new(RerunRateRule),
        Box::new(DurationDriftRule),
        Box::new(FailureStreakRule),
        Box::new(TimeoutRateRule),
    ]
}

/// Runs every registered rule and sorts the surviving tips by severity.
/// The sort is stable, so ties keep registration order.
pub fn analyze(runs: &[WorkflowRun]) -> Vec<OptimizationTip> {
    analyze_with_rules(runs, &default_rules())
}

pub fn analyze_with_rules(
    runs: &[WorkflowRun],
    rules: &[Box<dyn OptimizationRule>],
) -> Vec<OptimizationTip> {
    let completed: Vec<&WorkflowRun> = runs.iter().filter(|r| r.is_completed()).collect();

    let mut tips: Vec<OptimizationTip> = rules
        .iter()
        .filter_map(|rule| rule.evaluate(runs, &completed))
        .collect();

    tips.sort_by_key(|tip| tip.severity);
    tips
}

struct QueueWaitRule;

impl OptimizationRule for QueueWaitRule {
    fn id(&self) -> &'static str {
        "queue-wait"
    }

    #[allow(clippy::cast_precision_loss)]
    fn evaluate(&self, runs: &[WorkflowRun], _: &[&WorkflowRun]) -> Option<OptimizationTip> {
        let waits_ms: Vec<f64> = runs
            .iter()
            .filter_map(|r| r.queue_wait_ms())
            .filter(|&ms| ms > 0)
            .map(|ms| ms as f64)
            .collect();

        if waits_ms.len() < 5 {
            return None;
        }

        let avg_min = stats::mean(&waits_ms) / 60_000.0;
        let severity = if avg_min > 5.0 {
            TipSeverity::Critical
        } else if avg_min > 2.0 {
            TipSeverity::Warning
        } else {
            return None;
        };

        Some(OptimizationTip {
            id: self.id(),
            severity,
            category: TipCategory::Performance,
            title: "Runs wait too long for a runner".to_string(),
            description: format!(
                "Runs spend an average of {avg_min:.1} minutes queued before starting."
            ),
            impact: Some(
                "Add runner capacity or reduce concurrent triggers to cut feedback time"
                    .to_string(),
            ),
        })
    }
}

struct SuccessRateRule;

impl OptimizationRule for SuccessRateRule {
    fn id(&self) -> &'static str {
        "success-rate"
    }

    #[allow(clippy::cast_precision_loss)]
    fn evaluate(&self, _: &[WorkflowRun], completed: &[&WorkflowRun]) -> Option<OptimizationTip> {
        if completed.len() < 10 {
            return None;
        }

        let successes = completed.iter().filter(|r| r.has_conclusion("success")).count();
        let rate = (successes as f64 / completed.len().max(1) as f64) * 100.0;

        if rate >= 80.0 {
            return None;
        }

        Some(OptimizationTip {
            id: self.id(),
            severity: TipSeverity::Warning,
            category: TipCategory::Reliability,
            title: "Low success rate".to_string(),
            description: format!(
                "Only {rate:.0}% of the last {} completed runs succeeded.",
                completed.len()
            ),
            impact: Some("Investigate the dominant failure causes before they normalize".to_string()),
        })
    }
}

struct RerunRateRule;

impl OptimizationRule for RerunRateRule {
    fn id(&self) -> &'static str {
        "rerun-rate"
    }

    #[allow(clippy::cast_precision_loss)]
    fn evaluate(&self, runs: &[WorkflowRun], _: &[&WorkflowRun]) -> Option<OptimizationTip> {
        if runs.len() < 10 {
            return None;
        }

        let reruns = runs.iter().filter(|r| r.run_attempt > 1).count();
        let rate = (reruns as f64 / runs.len().max(1) as f64) * 100.0;

        let severity = if rate > 25.0 {
            TipSeverity::Critical
        } else if rate > 10.0 {
            TipSeverity::Warning
        } else {
            return None;
        };

        Some(OptimizationTip {
            id: self.id(),
            severity,
            category: TipCategory::Cost,
            title: "High re-run rate".to_string(),
            description: format!("{rate:.0}% of runs are re-runs of an earlier attempt."),
            impact: Some("Every retry doubles the compute bill for that run".to_string()),
        })
    }
}

struct DurationDriftRule;

impl OptimizationRule for DurationDriftRule {
    fn id(&self) -> &'static str {
        "duration-drift"
    }

    #[allow(clippy::cast_precision_loss)]
    fn evaluate(&self, _: &[WorkflowRun], completed: &[&WorkflowRun]) -> Option<OptimizationTip> {
        // Newest-first: the first 50 timed runs are the most recent ones.
        let timed_ms: Vec<f64> = completed
            .iter()
            .filter_map(|r| r.duration_ms())
            .filter(|&ms| ms > 0)
            .map(|ms| ms as f64)
            .take(50)
            .collect();

        if timed_ms.len() < 10 {
            return None;
        }

        let (recent, older) = timed_ms.split_at(timed_ms.len() / 2);
        let recent_avg = stats::mean(recent);
        let older_avg = stats::mean(older);

        if older_avg <= 0.0 {
            return None;
        }

        let ratio = recent_avg / older_avg;
        let severity = if ratio >= 1.5 {
            TipSeverity::Critical
        } else if ratio >= 1.2 {
            TipSeverity::Warning
        } else {
            return None;
        };

        let pct = (ratio - 1.0) * 100.0;
        Some(OptimizationTip {
            id: self.id(),
            severity,
            category: TipCategory::Performance,
            title: "Run duration is drifting up".to_string(),
            description: format!(
                "Recent runs average {pct:.0}% longer than the older half of the sample."
            ),
            impact: Some("Check for new slow steps, cache misses or growing test suites".to_string()),
        })
    }
}

struct FailureStreakRule;

impl OptimizationRule for FailureStreakRule {
    fn id(&self) -> &'static str {
        "failure-streak"
    }

    fn evaluate(&self, _: &[WorkflowRun], completed: &[&WorkflowRun]) -> Option<OptimizationTip> {
        // Consecutive failures at the head of the newest-first batch: the
        // streak is still active.
        let streak = completed
            .iter()
            .take_while(|r| r.has_conclusion("failure"))
            .count();

        let severity = if streak >= 5 {
            TipSeverity::Critical
        } else if streak >= 3 {
            TipSeverity::Warning
        } else {
            return None;
        };

        Some(OptimizationTip {
            id: self.id(),
            severity,
            category: TipCategory::Reliability,
            title: "Active failure streak".to_string(),
            description: format!("The last {streak} completed runs all failed."),
            impact: Some("The pipeline is currently red; merges are flying blind".to_string()),
        })
    }
}

struct TimeoutRateRule;

impl OptimizationRule for TimeoutRateRule {
    fn id(&self) -> &'static str {
        "timeout-rate"
    }

    #[allow(clippy::cast_precision_loss)]
    fn evaluate(&self, _: &[WorkflowRun], completed: &[&WorkflowRun]) -> Option<OptimizationTip> {
        if completed.len() < 10 {
            return None;
        }

        let timed_out = completed.iter().filter(|r| r.has_conclusion("timed_out")).count();
        let rate = (timed_out as f64 / completed.len().max(1) as f64) * 100.0;

        let severity = if rate >= 15.0 {
            TipSeverity::Critical
        } else if rate >= 5.0 {
            TipSeverity::Warning
        } else {
            return None;
        };

        Some(OptimizationTip {
            id: self.id(),
            severity,
            category: TipCategory::Reliability,
            title: "Runs hitting the timeout limit".to_string(),
            description: format!("{rate:.0}% of completed runs timed out."),
            impact: Some("Timed-out runs burn the full time budget and report nothing".to_string()),
        })
    }
}
