use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single CI workflow run as supplied by the provider client,
/// newest-first within a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub run_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: String,
    pub conclusion: Option<String>,
    pub head_branch: String,
    #[serde(default = "default_run_attempt")]
    pub run_attempt: u32,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_author: Option<String>,
}

fn default_run_attempt() -> u32 {
    1
}

impl WorkflowRun {
    pub fn is_completed(&self) -> bool {
        self.status == "completed"
    }

    pub fn has_conclusion(&self, conclusion: &str) -> bool {
        self.conclusion.as_deref() == Some(conclusion)
    }

    /// Wall time from start to completion. None when either timestamp is
    /// missing or the interval is negative; never coerced to zero.
    pub fn duration_ms(&self) -> Option<i64> {
        let started = self.run_started_at?;
        let completed = self.completed_at?;
        let ms = (completed - started).num_milliseconds();
        (ms >= 0).then_some(ms)
    }

    /// Time spent queued before a runner picked the run up. None when the
    /// run never started or the interval is negative.
    pub fn queue_wait_ms(&self) -> Option<i64> {
        let started = self.run_started_at?;
        let ms = (started - self.created_at).num_milliseconds();
        (ms >= 0).then_some(ms)
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use chrono::{Duration, TimeZone};

    /// Fixed origin so tests are reproducible regardless of wall clock.
    pub fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    pub fn run(id: i64, conclusion: &str, created_offset_min: i64) -> WorkflowRun {
        let created = t0() + Duration::minutes(created_offset_min);
        WorkflowRun {
            id,
            created_at: created,
            run_started_at: Some(created + Duration::seconds(30)),
            completed_at: Some(created + Duration::seconds(30) + Duration::minutes(5)),
            status: "completed".to_string(),
            conclusion: Some(conclusion.to_string()),
            head_branch: "main".to_string(),
            run_attempt: 1,
            actor: "octocat".to_string(),
            commit_message: None,
            commit_author: None,
        }
    }

    pub fn run_with_duration(id: i64, created_offset_min: i64, duration_secs: i64) -> WorkflowRun {
        let mut r = run(id, "success", created_offset_min);
        let started = r.run_started_at.unwrap();
        r.completed_at = Some(started + Duration::seconds(duration_secs));
        r
    }

    pub fn run_with_queue_wait(id: i64, created_offset_min: i64, wait_secs: i64) -> WorkflowRun {
        let mut r = run(id, "success", created_offset_min);
        r.run_started_at = Some(r.created_at + Duration::seconds(wait_secs));
        r.completed_at = Some(r.run_started_at.unwrap() + Duration::minutes(5));
        r
    }
}
