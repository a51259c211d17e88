use log::{debug, info};
use serde_json::json;

use super::scope::resolve_scopes;
use super::store::{AlertMetric, AlertRule, AlertStore, NewAlertEvent};
use crate::error::Result;

/// How many completed runs the streak metric looks back over, regardless
/// of the rule's window.
const STREAK_LOOKBACK: usize = 100;

/// Evaluates every enabled rule applying to `repo_key` (its repo scope and,
/// when the key has an owner, the owning org's scope) and fires alert
/// events for thresholds that are met. Returns the number of newly fired
/// events. Store failures abort the remaining rules and propagate.
pub fn evaluate_alert_rules_for_repo(store: &dyn AlertStore, repo_key: &str) -> Result<usize> {
    let mut fired = 0;

    for scope in resolve_scopes(repo_key) {
        let rules = store.list_enabled_rules_for_scope(&scope)?;
        debug!("{} enabled alert rule(s) in scope {scope}", rules.len());

        for rule in rules {
            if evaluate_rule(store, repo_key, &rule)? {
                fired += 1;
            }
        }
    }

    if fired > 0 {
        info!("Fired {fired} alert(s) for {repo_key}");
    }
    Ok(fired)
}

/// One rule, strictly ordered: dedup check, then the metric query, then
/// the conditional insert as the final step. An aborted evaluation can
/// therefore never leave a partial event behind.
fn evaluate_rule(store: &dyn AlertStore, repo_key: &str, rule: &AlertRule) -> Result<bool> {
    if store.has_recent_event(rule.id, rule.window_hours)? {
        debug!(
            "Rule {} already fired within {}h, skipping",
            rule.id, rule.window_hours
        );
        return Ok(false);
    }

    let Some(value) = compute_metric(store, repo_key, rule)? else {
        // No matching rows is not an error; sparse history simply cannot
        // breach a threshold.
        debug!("Rule {} has no computable {}", rule.id, rule.metric.as_str());
        return Ok(false);
    };

    if value < rule.threshold {
        return Ok(false);
    }

    store.insert_alert_event(&NewAlertEvent {
        rule_id: Some(rule.id),
        scope: rule.scope.clone(),
        metric: rule.metric,
        value,
        details: json!({
            "repo": repo_key,
            "metric": rule.metric.as_str(),
            "threshold": rule.threshold,
            "window_hours": rule.window_hours,
            "channel": rule.channel,
        }),
    })?;

    info!(
        "Alert fired: rule {} {} = {value} (threshold {}) for {repo_key}",
        rule.id,
        rule.metric.as_str(),
        rule.threshold
    );
    Ok(true)
}

fn compute_metric(
    store: &dyn AlertStore,
    repo_key: &str,
    rule: &AlertRule,
) -> Result<Option<f64>> {
    let value = match rule.metric {
        AlertMetric::FailureRate => store
            .query_failure_rate(repo_key, rule.window_hours)?
            .map(f64::round),
        AlertMetric::DurationP95 => store
            .query_p95_duration_ms(repo_key, rule.window_hours)?
            .map(|ms| (ms / 60_000.0).round()),
        AlertMetric::QueueWaitP95 => store
            .query_p95_queue_wait_ms(repo_key, rule.window_hours)?
            .map(|ms| (ms / 60_000.0).round()),
        AlertMetric::SuccessStreak => {
            let conclusions = store.query_recent_conclusions(repo_key, STREAK_LOOKBACK)?;
            if conclusions.is_empty() {
                None
            } else {
                let streak = conclusions
                    .iter()
                    .take_while(|c| c.as_str() == "failure")
                    .count();
                #[allow(clippy::cast_precision_loss)]
                let streak = streak as f64;
                Some(streak)
            }
        }
    };
    Ok(value)
}
