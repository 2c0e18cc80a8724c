// Job record: one requested training run and its lifecycle state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Opaque strategy configuration, echoed back unmodified
pub type JobConfig = serde_json::Map<String, serde_json::Value>;

/// Metric name -> value
pub type Metrics = BTreeMap<String, f64>;

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Completed, Failed and Cancelled are final
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => anyhow::bail!("unknown job status: {}", other),
        }
    }
}

/// Timestamped job log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Fields needed to create a job record
#[derive(Debug, Clone, Default)]
pub struct NewJob {
    pub user_id: Option<String>,
    pub model_type: String,
    pub dataset_reference: String,
    pub config: JobConfig,
}

/// Canonical job state. The store owns the only mutable copy; everything
/// handed out is a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub user_id: Option<String>,
    pub model_type: String,
    pub dataset_reference: String,
    pub config: JobConfig,

    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// 0-100, reaches 100 only on Completed
    pub progress: u8,
    pub logs: Vec<LogEntry>,
    pub error: Option<String>,

    pub metrics: Metrics,
    pub model_path: Option<PathBuf>,
    pub remote_artifact_id: Option<String>,
    pub tracking_run_id: Option<String>,
    pub run_tracking_url: Option<String>,
}

impl JobRecord {
    pub(crate) fn new(job_id: String, new_job: NewJob) -> Self {
        Self {
            job_id,
            user_id: new_job.user_id,
            model_type: new_job.model_type,
            dataset_reference: new_job.dataset_reference,
            config: new_job.config,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            progress: 0,
            logs: Vec::new(),
            error: None,
            metrics: Metrics::new(),
            model_path: None,
            remote_artifact_id: None,
            tracking_run_id: None,
            run_tracking_url: None,
        }
    }

    pub(crate) fn add_log(&mut self, message: impl Into<String>) {
        self.logs.push(LogEntry {
            timestamp: Utc::now(),
            message: message.into(),
        });
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Partial update applied by `JobStore::update`. `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub progress: Option<u8>,
    pub log: Option<String>,
    pub model_path: Option<PathBuf>,
    pub tracking_run_id: Option<String>,
    pub run_tracking_url: Option<String>,
}

impl JobUpdate {
    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn log(message: impl Into<String>) -> Self {
        Self {
            log: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_log(mut self, message: impl Into<String>) -> Self {
        self.log = Some(message.into());
        self
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    /// True if the update touches anything besides progress and logs
    pub(crate) fn touches_results(&self) -> bool {
        self.model_path.is_some() || self.tracking_run_id.is_some() || self.run_tracking_url.is_some()
    }
}

/// Filter for listing jobs
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub user_id: Option<String>,
}

impl JobFilter {
    pub fn matches(&self, job: &JobRecord) -> bool {
        self.status.map_or(true, |s| job.status == s)
            && self
                .user_id
                .as_deref()
                .map_or(true, |u| job.user_id.as_deref() == Some(u))
    }
}

/// Job counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl JobStats {
    pub(crate) fn count(&mut self, status: JobStatus) {
        self.total += 1;
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Running => self.running += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Cancelled => self.cancelled += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&JobStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
        assert_eq!("Running".parse::<JobStatus>().unwrap(), JobStatus::Running);
        assert!("paused".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_filter_matches_status_and_user() {
        let mut job = JobRecord::new(
            "j1".to_string(),
            NewJob {
                user_id: Some("alice".to_string()),
                model_type: "linear_regression".to_string(),
                dataset_reference: "sample".to_string(),
                config: JobConfig::new(),
            },
        );
        job.status = JobStatus::Running;

        assert!(JobFilter::default().matches(&job));
        assert!(JobFilter {
            status: Some(JobStatus::Running),
            user_id: Some("alice".to_string()),
        }
        .matches(&job));
        assert!(!JobFilter {
            status: Some(JobStatus::Pending),
            user_id: None,
        }
        .matches(&job));
        assert!(!JobFilter {
            status: None,
            user_id: Some("bob".to_string()),
        }
        .matches(&job));
    }
}
