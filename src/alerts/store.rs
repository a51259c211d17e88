use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::analysis::stats;
use crate::error::{Result, RunLensError};
use crate::models::WorkflowRun;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMetric {
    FailureRate,
    DurationP95,
    QueueWaitP95,
    SuccessStreak,
}

impl AlertMetric {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertMetric::FailureRate => "failure_rate",
            AlertMetric::DurationP95 => "duration_p95",
            AlertMetric::QueueWaitP95 => "queue_wait_p95",
            AlertMetric::SuccessStreak => "success_streak",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "failure_rate" => Some(AlertMetric::FailureRate),
            "duration_p95" => Some(AlertMetric::DurationP95),
            "queue_wait_p95" => Some(AlertMetric::QueueWaitP95),
            "success_streak" => Some(AlertMetric::SuccessStreak),
            _ => None,
        }
    }
}

/// A user-authored threshold rule. Created through the external API; this
/// engine reads rules and only mutates the enabled flag.
#[derive(Debug, Clone, Serialize)]
pub struct AlertRule {
    pub id: i64,
    pub scope: String,
    pub metric: AlertMetric,
    pub threshold: f64,
    pub window_hours: i64,
    pub channel: String,
    pub destination: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAlertRule {
    pub scope: String,
    pub metric: AlertMetric,
    pub threshold: f64,
    pub window_hours: i64,
    pub channel: String,
    pub destination: Option<String>,
}

/// An append-only record of a rule firing. `rule_id` goes null if the rule
/// is later deleted; the event itself is never removed.
#[derive(Debug, Clone, Serialize)]
pub struct AlertEvent {
    pub id: i64,
    pub rule_id: Option<i64>,
    pub scope: String,
    pub metric: String,
    pub value: f64,
    pub fired_at: DateTime<Utc>,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct NewAlertEvent {
    pub rule_id: Option<i64>,
    pub scope: String,
    pub metric: AlertMetric,
    pub value: f64,
    pub details: serde_json::Value,
}

/// Typed read/write surface the evaluator needs from the persistent store.
pub trait AlertStore {
    fn list_enabled_rules_for_scope(&self, scope: &str) -> Result<Vec<AlertRule>>;

    /// Whether an event for this rule fired within the last `window_hours`.
    fn has_recent_event(&self, rule_id: i64, window_hours: i64) -> Result<bool>;

    /// Failed/completed percentage over the window; None without rows.
    fn query_failure_rate(&self, repo_key: &str, window_hours: i64) -> Result<Option<f64>>;

    /// 95th-percentile run duration in milliseconds over the window.
    fn query_p95_duration_ms(&self, repo_key: &str, window_hours: i64) -> Result<Option<f64>>;

    /// 95th-percentile queue wait in milliseconds over the window.
    fn query_p95_queue_wait_ms(&self, repo_key: &str, window_hours: i64) -> Result<Option<f64>>;

    /// Conclusions of the most recent completed runs, newest first.
    fn query_recent_conclusions(&self, repo_key: &str, limit: usize) -> Result<Vec<String>>;

    fn insert_alert_event(&self, event: &NewAlertEvent) -> Result<()>;
}

pub struct SqliteAlertStore {
    conn: Connection,
}

impl SqliteAlertStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_runs (
                repo TEXT NOT NULL,
                id INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                run_started_at TEXT,
                completed_at TEXT,
                status TEXT NOT NULL,
                conclusion TEXT,
                head_branch TEXT NOT NULL,
                run_attempt INTEGER NOT NULL DEFAULT 1,
                actor TEXT NOT NULL,
                commit_message TEXT,
                commit_author TEXT,
                PRIMARY KEY (repo, id)
            );

            CREATE TABLE IF NOT EXISTS alert_rules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scope TEXT NOT NULL,
                metric TEXT NOT NULL,
                threshold REAL NOT NULL,
                window_hours INTEGER NOT NULL,
                channel TEXT NOT NULL,
                destination TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS alert_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                rule_id INTEGER REFERENCES alert_rules(id) ON DELETE SET NULL,
                scope TEXT NOT NULL,
                metric TEXT NOT NULL,
                value REAL NOT NULL,
                fired_at TEXT NOT NULL,
                details TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_runs_repo_created
                ON workflow_runs(repo, created_at);
            CREATE INDEX IF NOT EXISTS idx_rules_scope
                ON alert_rules(scope, enabled);
            CREATE INDEX IF NOT EXISTS idx_events_rule_fired
                ON alert_events(rule_id, fired_at);
            "#,
        )?;
        Ok(())
    }

    /// Write path for the synchronization job: runs are keyed by
    /// (repo, id) and replaced wholesale when a run progresses.
    pub fn upsert_run(&self, repo_key: &str, run: &WorkflowRun) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO workflow_runs
            (repo, id, created_at, run_started_at, completed_at, status,
             conclusion, head_branch, run_attempt, actor, commit_message,
             commit_author)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                repo_key,
                run.id,
                run.created_at,
                run.run_started_at,
                run.completed_at,
                run.status,
                run.conclusion,
                run.head_branch,
                run.run_attempt,
                run.actor,
                run.commit_message,
                run.commit_author,
            ],
        )?;
        Ok(())
    }

    pub fn insert_rule(&self, rule: &NewAlertRule) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO alert_rules
            (scope, metric, threshold, window_hours, channel, destination,
             enabled, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)
            "#,
            params![
                rule.scope,
                rule.metric.as_str(),
                rule.threshold,
                rule.window_hours,
                rule.channel,
                rule.destination,
                Utc::now(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn set_rule_enabled(&self, rule_id: i64, enabled: bool) -> Result<()> {
        self.conn.execute(
            "UPDATE alert_rules SET enabled = ?2 WHERE id = ?1",
            params![rule_id, enabled],
        )?;
        Ok(())
    }

    /// Deletes a rule. Its past events survive with a nulled rule_id.
    pub fn delete_rule(&self, rule_id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM alert_rules WHERE id = ?1", params![rule_id])?;
        Ok(())
    }

    pub fn list_events_for_scope(&self, scope: &str) -> Result<Vec<AlertEvent>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, rule_id, scope, metric, value, fired_at, details
            FROM alert_events
            WHERE scope = ?1
            ORDER BY fired_at DESC
            "#,
        )?;

        let rows = stmt
            .query_map(params![scope], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, DateTime<Utc>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, rule_id, scope, metric, value, fired_at, details)| {
                Ok(AlertEvent {
                    id,
                    rule_id,
                    scope,
                    metric,
                    value,
                    fired_at,
                    details: serde_json::from_str(&details)?,
                })
            })
            .collect()
    }

    /// Timed intervals for completed runs in the window: (start, end) pairs
    /// turned into positive millisecond spans.
    #[allow(clippy::cast_precision_loss)]
    fn windowed_spans_ms(
        &self,
        repo_key: &str,
        window_hours: i64,
        start_col: &str,
        end_col: &str,
    ) -> Result<Vec<f64>> {
        let cutoff = window_cutoff(window_hours);
        let sql = format!(
            "SELECT {start_col}, {end_col} FROM workflow_runs \
             WHERE repo = ?1 AND status = 'completed' AND created_at >= ?2 \
               AND {start_col} IS NOT NULL AND {end_col} IS NOT NULL"
        );
        let mut stmt = self.conn.prepare(&sql)?;

        let spans = stmt
            .query_map(params![repo_key, cutoff], |row| {
                Ok((
                    row.get::<_, DateTime<Utc>>(0)?,
                    row.get::<_, DateTime<Utc>>(1)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(spans
            .into_iter()
            .filter_map(|(start, end)| {
                let ms = (end - start).num_milliseconds();
                (ms > 0).then_some(ms as f64)
            })
            .collect())
    }
}

fn window_cutoff(window_hours: i64) -> DateTime<Utc> {
    Utc::now() - Duration::hours(window_hours.max(0))
}

impl AlertStore for SqliteAlertStore {
    fn list_enabled_rules_for_scope(&self, scope: &str) -> Result<Vec<AlertRule>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, scope, metric, threshold, window_hours, channel,
                   destination, enabled, created_at
            FROM alert_rules
            WHERE scope = ?1 AND enabled = 1
            ORDER BY id
            "#,
        )?;

        let rows = stmt
            .query_map(params![scope], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, bool>(7)?,
                    row.get::<_, DateTime<Utc>>(8)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(
                |(id, scope, metric, threshold, window_hours, channel, destination, enabled, created_at)| {
                    let metric = AlertMetric::parse(&metric).ok_or_else(|| {
                        RunLensError::ConfigError(format!("Unknown alert metric: {metric}"))
                    })?;
                    Ok(AlertRule {
                        id,
                        scope,
                        metric,
                        threshold,
                        window_hours,
                        channel,
                        destination,
                        enabled,
                        created_at,
                    })
                },
            )
            .collect()
    }

    fn has_recent_event(&self, rule_id: i64, window_hours: i64) -> Result<bool> {
        let cutoff = window_cutoff(window_hours);
        let exists = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM alert_events WHERE rule_id = ?1 AND fired_at >= ?2)",
            params![rule_id, cutoff],
            |row| row.get::<_, bool>(0),
        )?;
        Ok(exists)
    }

    #[allow(clippy::cast_precision_loss)]
    fn query_failure_rate(&self, repo_key: &str, window_hours: i64) -> Result<Option<f64>> {
        let cutoff = window_cutoff(window_hours);
        let (total, failed) = self.conn.query_row(
            r#"
            SELECT COUNT(*),
                   COUNT(CASE WHEN conclusion = 'failure' THEN 1 END)
            FROM workflow_runs
            WHERE repo = ?1 AND status = 'completed' AND created_at >= ?2
            "#,
            params![repo_key, cutoff],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )?;

        if total == 0 {
            return Ok(None);
        }
        Ok(Some((failed as f64 / total as f64) * 100.0))
    }

    fn query_p95_duration_ms(&self, repo_key: &str, window_hours: i64) -> Result<Option<f64>> {
        let spans = self.windowed_spans_ms(repo_key, window_hours, "run_started_at", "completed_at")?;
        if spans.is_empty() {
            return Ok(None);
        }
        Ok(Some(stats::percentile_of(&spans, 0.95)))
    }

    fn query_p95_queue_wait_ms(&self, repo_key: &str, window_hours: i64) -> Result<Option<f64>> {
        let spans = self.windowed_spans_ms(repo_key, window_hours, "created_at", "run_started_at")?;
        if spans.is_empty() {
            return Ok(None);
        }
        Ok(Some(stats::percentile_of(&spans, 0.95)))
    }

    fn query_recent_conclusions(&self, repo_key: &str, limit: usize) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT COALESCE(conclusion, '')
            FROM workflow_runs
            WHERE repo = ?1 AND status = 'completed'
            ORDER BY created_at DESC
            LIMIT ?2
            "#,
        )?;

        #[allow(clippy::cast_possible_wrap)]
        let conclusions = stmt
            .query_map(params![repo_key, limit as i64], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(conclusions)
    }

    fn insert_alert_event(&self, event: &NewAlertEvent) -> Result<()> {
        let details = serde_json::to_string(&event.details)?;
        self.conn.execute(
            r#"
            INSERT INTO alert_events (rule_id, scope, metric, value, fired_at, details)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                event.rule_id,
                event.scope,
                event.metric.as_str(),
                event.value,
                Utc::now(),
                details,
            ],
        )?;
        Ok(())
    }
}
