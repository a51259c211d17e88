use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::stats;
use crate::models::WorkflowRun;

const HOUR_MS: f64 = 3_600_000.0;
const DAY_SECS: f64 = 86_400.0;

/// Ordinal benchmark level. Declaration order drives `Ord`, so the worst
/// of a set of levels is simply `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoraLevel {
    Elite,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentFrequency {
    pub per_day: f64,
    pub total_deployments: usize,
    pub level: DoraLevel,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadTime {
    pub median_hours: Option<f64>,
    pub p95_hours: Option<f64>,
    pub sample_count: usize,
    pub level: DoraLevel,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeFailureRate {
    pub rate_percent: f64,
    pub failed_runs: usize,
    pub total_runs: usize,
    pub level: DoraLevel,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeToRecovery {
    pub mean_hours: Option<f64>,
    pub recovery_count: usize,
    pub level: DoraLevel,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoraMetrics {
    pub deployment_frequency: DeploymentFrequency,
    pub lead_time: LeadTime,
    pub change_failure_rate: ChangeFailureRate,
    pub time_to_recovery: TimeToRecovery,
    pub overall_level: DoraLevel,
}

/// Computes the four DORA keys from a run batch, in any order. Incomplete
/// runs are ignored; an empty batch yields zeroed metrics, never an error.
pub fn calculate_dora(runs: &[WorkflowRun]) -> DoraMetrics {
    let completed: Vec<&WorkflowRun> = runs.iter().filter(|r| r.is_completed()).collect();

    let deployment_frequency = deployment_frequency(&completed);
    let lead_time = lead_time(&completed);
    let change_failure_rate = change_failure_rate(&completed);
    let time_to_recovery = time_to_recovery(&completed);

    let overall_level = [
        deployment_frequency.level,
        lead_time.level,
        change_failure_rate.level,
        time_to_recovery.level,
    ]
    .into_iter()
    .max()
    .unwrap_or(DoraLevel::Low);

    DoraMetrics {
        deployment_frequency,
        lead_time,
        change_failure_rate,
        time_to_recovery,
        overall_level,
    }
}

#[allow(clippy::cast_precision_loss)]
fn deployment_frequency(completed: &[&WorkflowRun]) -> DeploymentFrequency {
    let (Some(oldest), Some(newest)) = (
        completed.iter().map(|r| r.created_at).min(),
        completed.iter().map(|r| r.created_at).max(),
    ) else {
        return DeploymentFrequency {
            per_day: 0.0,
            total_deployments: 0,
            level: DoraLevel::Low,
            label: "No completed runs".to_string(),
        };
    };

    // Floor the span at one day so a burst of same-day runs does not
    // divide by a near-zero interval.
    let span_days = ((newest - oldest).num_seconds() as f64 / DAY_SECS).max(1.0);
    let per_day = completed.len() as f64 / span_days;

    let level = if per_day >= 1.0 {
        DoraLevel::Elite
    } else if per_day >= 1.0 / 7.0 {
        DoraLevel::High
    } else if per_day >= 1.0 / 30.0 {
        DoraLevel::Medium
    } else {
        DoraLevel::Low
    };

    DeploymentFrequency {
        per_day,
        total_deployments: completed.len(),
        level,
        label: format!("{per_day:.1} runs/day"),
    }
}

#[allow(clippy::cast_precision_loss)]
fn lead_time(completed: &[&WorkflowRun]) -> LeadTime {
    // lead = (start ?? created) + duration - created; duration requires both
    // timestamps, so runs without timing data drop out here.
    let mut leads_ms: Vec<f64> = completed
        .iter()
        .filter_map(|r| {
            let duration = r.duration_ms()?;
            let started = r.run_started_at.unwrap_or(r.created_at);
            let lead = (started - r.created_at).num_milliseconds() + duration;
            (lead > 0).then_some(lead as f64)
        })
        .collect();

    if leads_ms.is_empty() {
        return LeadTime {
            median_hours: None,
            p95_hours: None,
            sample_count: 0,
            level: DoraLevel::Low,
            label: "No timing data".to_string(),
        };
    }

    leads_ms.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median_hours = stats::percentile(&leads_ms, 0.5) / HOUR_MS;
    let p95_hours = stats::percentile(&leads_ms, 0.95) / HOUR_MS;

    let level = hours_level(median_hours);

    LeadTime {
        median_hours: Some(median_hours),
        p95_hours: Some(p95_hours),
        sample_count: leads_ms.len(),
        level,
        label: format!("median {median_hours:.1}h"),
    }
}

#[allow(clippy::cast_precision_loss)]
fn change_failure_rate(completed: &[&WorkflowRun]) -> ChangeFailureRate {
    let total_runs = completed.len();
    let failed_runs = completed.iter().filter(|r| r.has_conclusion("failure")).count();

    if total_runs == 0 {
        return ChangeFailureRate {
            rate_percent: 0.0,
            failed_runs: 0,
            total_runs: 0,
            level: DoraLevel::Low,
            label: "No completed runs".to_string(),
        };
    }

    let rate_percent = (failed_runs as f64 / total_runs.max(1) as f64) * 100.0;

    let level = if rate_percent <= 5.0 {
        DoraLevel::Elite
    } else if rate_percent <= 15.0 {
        DoraLevel::High
    } else if rate_percent <= 30.0 {
        DoraLevel::Medium
    } else {
        DoraLevel::Low
    };

    ChangeFailureRate {
        rate_percent,
        failed_runs,
        total_runs,
        level,
        label: format!("{rate_percent:.1}% of runs fail"),
    }
}

fn time_to_recovery(completed: &[&WorkflowRun]) -> TimeToRecovery {
    let mut by_branch: HashMap<&str, Vec<&WorkflowRun>> = HashMap::new();
    for run in completed {
        by_branch.entry(run.head_branch.as_str()).or_default().push(run);
    }

    let mut recoveries_ms: Vec<f64> = Vec::new();
    for runs in by_branch.values_mut() {
        runs.sort_by_key(|r| r.created_at);
        collect_recoveries(runs, &mut recoveries_ms);
    }

    if recoveries_ms.is_empty() {
        // No observed failures is not penalized, but does not confer elite.
        return TimeToRecovery {
            mean_hours: None,
            recovery_count: 0,
            level: DoraLevel::High,
            label: "No recoveries observed".to_string(),
        };
    }

    let mean_hours = stats::mean(&recoveries_ms) / HOUR_MS;

    TimeToRecovery {
        mean_hours: Some(mean_hours),
        recovery_count: recoveries_ms.len(),
        level: hours_level(mean_hours),
        label: format!("mean {mean_hours:.1}h to recover"),
    }
}

/// Walks one branch chronologically, measuring the gap between the first
/// failure of each losing streak and the next success.
#[allow(clippy::cast_precision_loss)]
fn collect_recoveries(runs: &[&WorkflowRun], recoveries_ms: &mut Vec<f64>) {
    let mut streak_started: Option<DateTime<Utc>> = None;

    for run in runs {
        let event_time = run.completed_at.unwrap_or(run.created_at);

        if run.has_conclusion("failure") {
            if streak_started.is_none() {
                streak_started = Some(event_time);
            }
        } else if run.has_conclusion("success") {
            if let Some(started) = streak_started.take() {
                let elapsed = (event_time - started).num_milliseconds();
                if elapsed >= 0 {
                    recoveries_ms.push(elapsed as f64);
                }
            }
        }
        // Cancelled/skipped runs neither start nor end a losing streak.
    }
}

fn hours_level(hours: f64) -> DoraLevel {
    if hours < 1.0 {
        DoraLevel::Elite
    } else if hours < 24.0 {
        DoraLevel::High
    } else if hours < 168.0 {
        DoraLevel::Medium
    } else {
        DoraLevel::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_support::*;

    #[test]
    fn test_empty_batch_yields_zeroed_metrics() {
        let metrics = calculate_dora(&[]);

        assert_eq!(metrics.deployment_frequency.total_deployments, 0);
        assert_eq!(metrics.deployment_frequency.per_day, 0.0);
        assert_eq!(metrics.lead_time.sample_count, 0);
        assert_eq!(metrics.lead_time.median_hours, None);
        assert_eq!(metrics.change_failure_rate.total_runs, 0);
        assert_eq!(metrics.time_to_recovery.recovery_count, 0);
        assert_eq!(metrics.overall_level, DoraLevel::Low);
    }

    #[test]
    fn test_incomplete_runs_are_excluded() {
        let mut queued = run(1, "success", 0);
        queued.status = "in_progress".to_string();
        queued.conclusion = None;

        let metrics = calculate_dora(&[queued]);
        assert_eq!(metrics.deployment_frequency.total_deployments, 0);
    }

    #[test]
    fn test_overall_level_is_worst_of_four() {
        // Daily successful runs over a week: elite frequency, elite lead
        // time, elite failure rate, but MTTR caps at high (no failures).
        let runs: Vec<_> = (0..7).map(|i| run(i, "success", i * 24 * 60)).collect();
        let metrics = calculate_dora(&runs);

        assert_eq!(metrics.deployment_frequency.level, DoraLevel::Elite);
        assert_eq!(metrics.change_failure_rate.level, DoraLevel::Elite);
        assert_eq!(metrics.time_to_recovery.level, DoraLevel::High);
        assert_eq!(metrics.overall_level, DoraLevel::High);

        let worst = [
            metrics.deployment_frequency.level,
            metrics.lead_time.level,
            metrics.change_failure_rate.level,
            metrics.time_to_recovery.level,
        ]
        .into_iter()
        .max()
        .unwrap();
        assert_eq!(metrics.overall_level, worst);
    }

    #[test]
    fn test_deployment_frequency_daily_is_elite() {
        let runs: Vec<_> = (0..10).map(|i| run(i, "success", i * 24 * 60)).collect();
        let metrics = calculate_dora(&runs);

        // 10 runs over 9 days
        assert!(metrics.deployment_frequency.per_day >= 1.0);
        assert_eq!(metrics.deployment_frequency.level, DoraLevel::Elite);
    }

    #[test]
    fn test_deployment_frequency_span_floored_at_one_day() {
        // Three runs within one hour must not report 72 runs/day.
        let runs: Vec<_> = (0..3).map(|i| run(i, "success", i * 20)).collect();
        let metrics = calculate_dora(&runs);

        assert_eq!(metrics.deployment_frequency.per_day, 3.0);
    }

    #[test]
    fn test_lead_time_median_from_created_to_completed() {
        // Queue wait 30s + duration 90s = 2 minute lead each.
        let runs: Vec<_> = (0..5).map(|i| run_with_duration(i, i * 60, 90)).collect();
        let metrics = calculate_dora(&runs);

        assert_eq!(metrics.lead_time.sample_count, 5);
        let median = metrics.lead_time.median_hours.unwrap();
        assert!((median - (120.0 / 3600.0)).abs() < 1e-9);
        assert_eq!(metrics.lead_time.level, DoraLevel::Elite);
    }

    #[test]
    fn test_lead_time_skips_runs_without_timing() {
        let mut untimed = run(1, "success", 0);
        untimed.run_started_at = None;
        untimed.completed_at = None;
        let timed = run_with_duration(2, 10, 60);

        let metrics = calculate_dora(&[untimed, timed]);
        assert_eq!(metrics.lead_time.sample_count, 1);
    }

    #[test]
    fn test_change_failure_rate_counts_failures_only() {
        let mut runs: Vec<_> = (0..8).map(|i| run(i, "success", i * 60)).collect();
        runs.push(run(8, "failure", 8 * 60));
        runs.push(run(9, "cancelled", 9 * 60));

        let metrics = calculate_dora(&runs);
        assert_eq!(metrics.change_failure_rate.failed_runs, 1);
        assert_eq!(metrics.change_failure_rate.total_runs, 10);
        assert!((metrics.change_failure_rate.rate_percent - 10.0).abs() < 1e-9);
        assert_eq!(metrics.change_failure_rate.level, DoraLevel::High);
    }

    #[test]
    fn test_mttr_measures_first_failure_to_next_success() {
        let runs = vec![
            run(1, "success", 0),
            run(2, "failure", 60),
            run(3, "failure", 120),
            run(4, "success", 180),
        ];
        let metrics = calculate_dora(&runs);

        assert_eq!(metrics.time_to_recovery.recovery_count, 1);
        // Gap is measured from the first failure of the streak, two hours
        // before the recovering success.
        let mean = metrics.time_to_recovery.mean_hours.unwrap();
        assert!((mean - 2.0).abs() < 0.01);
    }

    #[test]
    fn test_mttr_no_failures_scores_high_not_elite() {
        let runs: Vec<_> = (0..5).map(|i| run(i, "success", i * 60)).collect();
        let metrics = calculate_dora(&runs);

        assert_eq!(metrics.time_to_recovery.mean_hours, None);
        assert_eq!(metrics.time_to_recovery.level, DoraLevel::High);
    }

    #[test]
    fn test_mttr_is_branch_scoped() {
        let mut failure = run(1, "failure", 0);
        failure.head_branch = "feature".to_string();
        let success = run(2, "success", 60);

        let metrics = calculate_dora(&[failure, success]);
        // Success on main cannot recover a failure on feature.
        assert_eq!(metrics.time_to_recovery.recovery_count, 0);
    }

    #[test]
    fn test_mttr_unresolved_streak_produces_no_recovery() {
        let runs = vec![run(1, "success", 0), run(2, "failure", 60)];
        let metrics = calculate_dora(&runs);
        assert_eq!(metrics.time_to_recovery.recovery_count, 0);
    }

    #[test]
    fn test_mttr_ignores_batch_order() {
        // Newest-first input: the branch walk must sort chronologically.
        let runs = vec![
            run(3, "success", 120),
            run(2, "failure", 60),
            run(1, "success", 0),
        ];
        let metrics = calculate_dora(&runs);

        assert_eq!(metrics.time_to_recovery.recovery_count, 1);
        let mean = metrics.time_to_recovery.mean_hours.unwrap();
        assert!((mean - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_level_ordering_max_is_worst() {
        assert!(DoraLevel::Low > DoraLevel::Medium);
        assert!(DoraLevel::Medium > DoraLevel::High);
        assert!(DoraLevel::High > DoraLevel::Elite);
    }

    #[test]
    fn test_cancelled_runs_do_not_end_a_losing_streak() {
        let runs = vec![
            run(1, "failure", 0),
            run(2, "cancelled", 60),
            run(3, "success", 120),
        ];
        let metrics = calculate_dora(&runs);

        assert_eq!(metrics.time_to_recovery.recovery_count, 1);
        let mean = metrics.time_to_recovery.mean_hours.unwrap();
        assert!((mean - 2.0).abs() < 0.01);
    }
}
