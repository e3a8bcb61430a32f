use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Display;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier of an import job.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to a queued execution task.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Whether an import only reports differences or also applies them.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobMode {
    Apply,
    Check,
}

impl JobMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobMode::Apply => "apply",
            JobMode::Check => "check",
        }
    }
}

impl Display for JobMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "apply" => Ok(JobMode::Apply),
            "check" => Ok(JobMode::Check),
            other => Err(format!("unknown job mode '{other}'")),
        }
    }
}

/// Lifecycle state of an import job.
///
/// `pending -> queued -> running -> {completed | failed}`, with the
/// shortcuts `pending -> running` (inline execution) and
/// `{pending, queued} -> failed` (resolution failure before execution).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Queued)
                | (Pending, Running)
                | (Queued, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Pending, Failed)
                | (Queued, Failed)
        )
    }

    /// States from which `next` can be reached.
    pub fn predecessors(next: JobStatus) -> Vec<JobStatus> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(next))
            .collect()
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown job status '{s}'"))
    }
}

/// A single import run for one site.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImportJob {
    pub id: JobId,
    pub site_code: String,
    pub mode: JobMode,
    pub status: JobStatus,
    /// Raw user payload, kept verbatim for audit.
    pub config_data: Value,
    pub task_ref: Option<TaskId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ImportJob {
    pub fn new(site_code: impl Into<String>, mode: JobMode, config_data: Value) -> Self {
        Self {
            id: JobId::new(),
            site_code: site_code.into(),
            mode,
            status: JobStatus::Pending,
            config_data,
            task_ref: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn success(&self) -> bool {
        self.status == JobStatus::Completed
    }

    /// Wall time between start and completion, when both are known.
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.completed_at? - self.started_at?)
    }
}

/// A job together with the aggregates derived from its log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobSummary {
    pub job: ImportJob,
    pub success: bool,
    pub has_errors: bool,
    pub logs_count: usize,
    pub error_logs_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_have_no_exits() {
        for terminal in [JobStatus::Completed, JobStatus::Failed] {
            assert!(terminal.is_terminal());
            for next in JobStatus::ALL {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn test_allowed_transitions() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Queued));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn test_predecessors_of_failed() {
        let from = JobStatus::predecessors(JobStatus::Failed);
        assert_eq!(
            from,
            vec![JobStatus::Pending, JobStatus::Queued, JobStatus::Running]
        );
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("done".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = ImportJob::new("hq", JobMode::Check, serde_json::json!({}));
        assert_eq!(job.status, JobStatus::Pending);
        assert!(!job.success());
        assert!(job.started_at.is_none());
        assert!(job.duration().is_none());
    }

    #[test]
    fn test_mode_serde_is_lowercase() {
        let encoded = serde_json::to_string(&JobMode::Apply).unwrap();
        assert_eq!(encoded, "\"apply\"");
        let decoded: JobMode = serde_json::from_str("\"check\"").unwrap();
        assert_eq!(decoded, JobMode::Check);
    }
}
