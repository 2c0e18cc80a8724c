// Experiment tracking
//
// Tracker runs mirror a job's config and final metrics to an external
// experiment tracker. The orchestrator treats every tracker error as
// advisory.
//
// JsonlTracker appends events to {runs_dir}/{run_id}.jsonl

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use crate::jobs::{JobConfig, Metrics};

/// Final state reported when a run is finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Completed,
    Failed,
}

#[async_trait]
pub trait ExperimentTracker: Send + Sync {
    async fn start_run(
        &self,
        job_id: &str,
        model_type: &str,
        config: &JobConfig,
    ) -> Result<Box<dyn TrackerRun>>;
}

#[async_trait]
pub trait TrackerRun: Send + Sync {
    fn run_id(&self) -> &str;

    /// Link to the run in the tracker UI, if there is one
    fn run_url(&self) -> Option<String>;

    async fn log_metrics(&mut self, metrics: &Metrics) -> Result<()>;

    async fn finish(&mut self, outcome: RunOutcome) -> Result<()>;
}

/// One line of a run file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    Started {
        timestamp: DateTime<Utc>,
        job_id: String,
        model_type: String,
        config: JobConfig,
    },
    Metrics {
        timestamp: DateTime<Utc>,
        values: Metrics,
    },
    Finished {
        timestamp: DateTime<Utc>,
        outcome: RunOutcome,
    },
}

/// Tracker writing one JSONL file per run
pub struct JsonlTracker {
    runs_dir: PathBuf,
}

impl JsonlTracker {
    pub fn new(runs_dir: PathBuf) -> Self {
        Self { runs_dir }
    }

    /// Read back every event of a run
    pub fn read_run(&self, run_id: &str) -> Result<Vec<RunEvent>> {
        let path = self.runs_dir.join(format!("{}.jsonl", run_id));
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read run file: {}", path.display()))?;

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).context("Failed to parse run event"))
            .collect()
    }
}

#[async_trait]
impl ExperimentTracker for JsonlTracker {
    async fn start_run(
        &self,
        job_id: &str,
        model_type: &str,
        config: &JobConfig,
    ) -> Result<Box<dyn TrackerRun>> {
        fs::create_dir_all(&self.runs_dir).with_context(|| {
            format!("Failed to create runs directory: {}", self.runs_dir.display())
        })?;

        let short_id: String = job_id.chars().take(8).collect();
        let run_id = format!("{}-{}", model_type, short_id);
        let mut run = JsonlRun {
            path: self.runs_dir.join(format!("{}.jsonl", run_id)),
            run_id,
        };
        run.append(&RunEvent::Started {
            timestamp: Utc::now(),
            job_id: job_id.to_string(),
            model_type: model_type.to_string(),
            config: config.clone(),
        })?;

        tracing::debug!(job_id = %job_id, run_id = %run.run_id, "Started tracker run");
        Ok(Box::new(run))
    }
}

struct JsonlRun {
    run_id: String,
    path: PathBuf,
}

impl JsonlRun {
    fn append(&mut self, event: &RunEvent) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open run file: {}", self.path.display()))?;

        let json = serde_json::to_string(event).context("Failed to serialize run event")?;
        writeln!(file, "{}", json).context("Failed to write run event")?;
        Ok(())
    }
}

#[async_trait]
impl TrackerRun for JsonlRun {
    fn run_id(&self) -> &str {
        &self.run_id
    }

    fn run_url(&self) -> Option<String> {
        Some(format!("file://{}", self.path.display()))
    }

    async fn log_metrics(&mut self, metrics: &Metrics) -> Result<()> {
        self.append(&RunEvent::Metrics {
            timestamp: Utc::now(),
            values: metrics.clone(),
        })
    }

    async fn finish(&mut self, outcome: RunOutcome) -> Result<()> {
        self.append(&RunEvent::Finished {
            timestamp: Utc::now(),
            outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_run_file_records_events_in_order() {
        let dir = TempDir::new().unwrap();
        let tracker = JsonlTracker::new(dir.path().join("runs"));
        let config = serde_json::json!({"alpha": 0.5}).as_object().cloned().unwrap();

        let mut run = tracker
            .start_run("0123456789abcdef", "ridge_regression", &config)
            .await
            .unwrap();
        assert_eq!(run.run_id(), "ridge_regression-01234567");
        assert!(run.run_url().unwrap().ends_with("ridge_regression-01234567.jsonl"));

        let metrics = Metrics::from([("val_r2".to_string(), 0.9)]);
        run.log_metrics(&metrics).await.unwrap();
        run.finish(RunOutcome::Completed).await.unwrap();

        let events = tracker.read_run(run.run_id()).unwrap();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], RunEvent::Started { config: c, .. } if c == &config));
        assert!(matches!(&events[1], RunEvent::Metrics { values, .. } if values == &metrics));
        assert!(matches!(
            events[2],
            RunEvent::Finished {
                outcome: RunOutcome::Completed,
                ..
            }
        ));
    }

    #[test]
    fn test_event_tagging() {
        let event = RunEvent::Finished {
            timestamp: Utc::now(),
            outcome: RunOutcome::Failed,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "finished");
        assert_eq!(json["outcome"], "failed");
    }
}
