// In-memory job store
//
// Single source of truth for job status. Every operation runs under one
// mutex covering the whole collection; readers only ever receive clones.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::Notify;
use uuid::Uuid;

use super::record::{JobFilter, JobRecord, JobStats, JobStatus, JobUpdate, Metrics, NewJob};
use crate::errors::StoreError;

struct Entry {
    /// Insertion order, breaks `created_at` ties when listing
    seq: u64,
    record: JobRecord,
}

#[derive(Default)]
struct Jobs {
    entries: HashMap<String, Entry>,
    next_seq: u64,
}

impl Jobs {
    fn record_mut(&mut self, job_id: &str) -> Result<&mut JobRecord, StoreError> {
        self.entries
            .get_mut(job_id)
            .map(|e| &mut e.record)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))
    }
}

fn invalid_state(job: &JobRecord, action: &'static str) -> StoreError {
    StoreError::InvalidState {
        job_id: job.job_id.clone(),
        status: job.status,
        action,
    }
}

/// Thread-safe registry of job records
pub struct JobStore {
    jobs: Mutex<Jobs>,
    /// Woken on every transition into a terminal state
    terminal: Notify,
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(Jobs::default()),
            terminal: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Jobs> {
        // Critical sections never leave a record half-written, so a
        // poisoned guard still holds consistent data.
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new Pending job and return its id
    pub fn create(&self, new_job: NewJob) -> String {
        let job_id = Uuid::new_v4().to_string();
        let mut record = JobRecord::new(job_id.clone(), new_job);
        record.add_log(format!(
            "Job created for model '{}' on dataset '{}'",
            record.model_type, record.dataset_reference
        ));

        let mut jobs = self.lock();
        let seq = jobs.next_seq;
        jobs.next_seq += 1;
        jobs.entries.insert(job_id.clone(), Entry { seq, record });

        tracing::debug!(job_id = %job_id, "Created job record");
        job_id
    }

    /// Snapshot of a single job
    pub fn get(&self, job_id: &str) -> Result<JobRecord, StoreError> {
        self.lock()
            .entries
            .get(job_id)
            .map(|e| e.record.clone())
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))
    }

    /// Apply a partial update.
    ///
    /// Progress never decreases and stays below 100 until the job completes.
    /// Once a job is terminal only progress and logs may change.
    pub fn update(&self, job_id: &str, update: JobUpdate) -> Result<(), StoreError> {
        let mut jobs = self.lock();
        let job = jobs.record_mut(job_id)?;

        if job.is_terminal() && update.touches_results() {
            return Err(invalid_state(job, "update"));
        }

        if let Some(progress) = update.progress {
            if job.status != JobStatus::Completed {
                job.progress = job.progress.max(progress.min(99));
            }
        }
        if let Some(message) = update.log {
            job.add_log(message);
        }
        if let Some(path) = update.model_path {
            job.model_path = Some(path);
        }
        if let Some(run_id) = update.tracking_run_id {
            job.tracking_run_id = Some(run_id);
        }
        if let Some(url) = update.run_tracking_url {
            job.run_tracking_url = Some(url);
        }
        Ok(())
    }

    /// Append a single log line
    pub fn append_log(&self, job_id: &str, message: impl Into<String>) -> Result<(), StoreError> {
        self.update(job_id, JobUpdate::log(message))
    }

    /// Pending -> Running
    pub fn start(&self, job_id: &str) -> Result<(), StoreError> {
        let mut jobs = self.lock();
        let job = jobs.record_mut(job_id)?;
        if job.status != JobStatus::Pending {
            return Err(invalid_state(job, "start"));
        }

        let now = Utc::now();
        job.status = JobStatus::Running;
        job.started_at = Some(now);
        job.add_log(format!("Job started at {}", now.to_rfc3339()));

        tracing::info!(job_id = %job_id, model_type = %job.model_type, "Job running");
        Ok(())
    }

    /// Running -> Completed with results
    pub fn complete(
        &self,
        job_id: &str,
        metrics: Metrics,
        remote_artifact_id: Option<String>,
    ) -> Result<(), StoreError> {
        {
            let mut jobs = self.lock();
            let job = jobs.record_mut(job_id)?;
            if job.status != JobStatus::Running {
                return Err(invalid_state(job, "complete"));
            }
            if metrics.is_empty() {
                return Err(StoreError::EmptyMetrics(job_id.to_string()));
            }

            let now = Utc::now();
            job.status = JobStatus::Completed;
            job.completed_at = Some(now);
            job.metrics = metrics;
            job.remote_artifact_id = remote_artifact_id;
            job.progress = 100;
            job.add_log(format!("Job completed at {}", now.to_rfc3339()));

            tracing::info!(job_id = %job_id, metrics = job.metrics.len(), "Job completed");
        }
        self.terminal.notify_waiters();
        Ok(())
    }

    /// Running -> Failed
    pub fn fail(&self, job_id: &str, error: impl Into<String>) -> Result<(), StoreError> {
        {
            let mut jobs = self.lock();
            let job = jobs.record_mut(job_id)?;
            if job.status != JobStatus::Running {
                return Err(invalid_state(job, "fail"));
            }

            let error = error.into();
            job.status = JobStatus::Failed;
            job.completed_at = Some(Utc::now());
            job.add_log(format!("Job failed: {}", error));
            tracing::error!(job_id = %job_id, error = %error, "Job failed");
            job.error = Some(error);
        }
        self.terminal.notify_waiters();
        Ok(())
    }

    /// Pending|Running -> Cancelled. Advisory: a running worker is not
    /// interrupted, it observes the flag and discards its result.
    pub fn cancel(&self, job_id: &str) -> Result<(), StoreError> {
        {
            let mut jobs = self.lock();
            let job = jobs.record_mut(job_id)?;
            if job.is_terminal() {
                return Err(invalid_state(job, "cancel"));
            }

            job.status = JobStatus::Cancelled;
            job.completed_at = Some(Utc::now());
            job.add_log("Job cancelled");
            tracing::info!(job_id = %job_id, "Job cancelled");
        }
        self.terminal.notify_waiters();
        Ok(())
    }

    /// Cancel every job still waiting for a worker
    pub fn cancel_pending(&self) -> Vec<String> {
        let cancelled: Vec<String> = {
            let mut jobs = self.lock();
            let now = Utc::now();
            jobs.entries
                .values_mut()
                .filter(|e| e.record.status == JobStatus::Pending)
                .map(|e| {
                    e.record.status = JobStatus::Cancelled;
                    e.record.completed_at = Some(now);
                    e.record.add_log("Job cancelled at shutdown");
                    e.record.job_id.clone()
                })
                .collect()
        };

        if !cancelled.is_empty() {
            tracing::info!(count = cancelled.len(), "Cancelled pending jobs");
            self.terminal.notify_waiters();
        }
        cancelled
    }

    /// Drop a record no worker has picked up yet. Used to roll back an
    /// admission that could not be scheduled.
    pub(crate) fn discard_pending(&self, job_id: &str) -> Result<(), StoreError> {
        let mut jobs = self.lock();
        let job = jobs.record_mut(job_id)?;
        if job.status != JobStatus::Pending {
            return Err(invalid_state(job, "discard"));
        }
        jobs.entries.remove(job_id);
        tracing::debug!(job_id = %job_id, "Discarded unscheduled job");
        Ok(())
    }

    pub fn is_cancelled(&self, job_id: &str) -> bool {
        self.lock()
            .entries
            .get(job_id)
            .map_or(false, |e| e.record.status == JobStatus::Cancelled)
    }

    /// Remove a terminal job
    pub fn delete(&self, job_id: &str) -> Result<JobRecord, StoreError> {
        let mut jobs = self.lock();
        let job = jobs.record_mut(job_id)?;
        if !job.is_terminal() {
            return Err(invalid_state(job, "delete"));
        }
        jobs.entries
            .remove(job_id)
            .map(|e| e.record)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))
    }

    /// Matching jobs, newest first
    pub fn list(&self, filter: &JobFilter) -> Vec<JobRecord> {
        let jobs = self.lock();
        let mut matched: Vec<&Entry> = jobs
            .entries
            .values()
            .filter(|e| filter.matches(&e.record))
            .collect();
        matched.sort_by(|a, b| {
            b.record
                .created_at
                .cmp(&a.record.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        matched.into_iter().map(|e| e.record.clone()).collect()
    }

    /// One page of `list` plus the total number of matches
    pub fn list_page(
        &self,
        filter: &JobFilter,
        offset: usize,
        limit: usize,
    ) -> (Vec<JobRecord>, usize) {
        let all = self.list(filter);
        let total = all.len();
        let page = all.into_iter().skip(offset).take(limit).collect();
        (page, total)
    }

    pub fn stats(&self) -> JobStats {
        let jobs = self.lock();
        let mut stats = JobStats::default();
        for entry in jobs.entries.values() {
            stats.count(entry.record.status);
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve once the job reaches a terminal state
    pub async fn wait_for_terminal(&self, job_id: &str) -> Result<JobRecord, StoreError> {
        loop {
            let notified = self.terminal.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let job = self.get(job_id)?;
            if job.is_terminal() {
                return Ok(job);
            }
            notified.await;
        }
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn new_job(user: Option<&str>) -> NewJob {
        NewJob {
            user_id: user.map(str::to_string),
            model_type: "linear_regression".to_string(),
            dataset_reference: "sample".to_string(),
            config: Default::default(),
        }
    }

    fn metrics() -> Metrics {
        Metrics::from([("val_r2".to_string(), 0.9)])
    }

    #[test]
    fn test_create_and_get() {
        let store = JobStore::new();
        let id = store.create(new_job(Some("alice")));

        let job = store.get(&id).unwrap();
        assert_eq!(job.job_id, id);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert_eq!(job.user_id.as_deref(), Some("alice"));
        assert_eq!(job.logs.len(), 1);
    }

    #[test]
    fn test_ids_are_unique() {
        let store = JobStore::new();
        let a = store.create(new_job(None));
        let b = store.create(new_job(None));
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_unknown_job_is_not_found() {
        let store = JobStore::new();
        assert_eq!(
            store.update("missing", JobUpdate::progress(10)),
            Err(StoreError::NotFound("missing".to_string()))
        );
        assert!(store.get("missing").is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_full_lifecycle() {
        let store = JobStore::new();
        let id = store.create(new_job(None));

        store.start(&id).unwrap();
        let running = store.get(&id).unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert!(running.started_at.is_some());

        store.update(&id, JobUpdate::progress(40)).unwrap();
        store.complete(&id, metrics(), Some("org/repo".to_string())).unwrap();

        let done = store.get(&id).unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100);
        assert_eq!(done.remote_artifact_id.as_deref(), Some("org/repo"));
        assert!(done.error.is_none());
        assert!(done.completed_at.is_some());
    }

    #[test]
    fn test_progress_is_monotone_and_capped() {
        let store = JobStore::new();
        let id = store.create(new_job(None));
        store.start(&id).unwrap();

        store.update(&id, JobUpdate::progress(40)).unwrap();
        store.update(&id, JobUpdate::progress(30)).unwrap();
        assert_eq!(store.get(&id).unwrap().progress, 40);

        store.update(&id, JobUpdate::progress(100)).unwrap();
        assert_eq!(store.get(&id).unwrap().progress, 99);
    }

    #[test]
    fn test_complete_requires_running() {
        let store = JobStore::new();
        let id = store.create(new_job(None));
        let err = store.complete(&id, metrics(), None).unwrap_err();
        assert!(matches!(err, StoreError::InvalidState { status: JobStatus::Pending, .. }));
    }

    #[test]
    fn test_complete_rejects_empty_metrics() {
        let store = JobStore::new();
        let id = store.create(new_job(None));
        store.start(&id).unwrap();
        let before = store.get(&id).unwrap();

        let err = store.complete(&id, Metrics::new(), None).unwrap_err();
        assert_eq!(err, StoreError::EmptyMetrics(id.clone()));
        assert_eq!(store.get(&id).unwrap(), before);
    }

    #[test]
    fn test_fail_requires_running() {
        let store = JobStore::new();
        let id = store.create(new_job(None));

        let err = store.fail(&id, "x").unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidState { status: JobStatus::Pending, action: "fail", .. }
        ));
        let job = store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.error.is_none());
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn test_discard_pending() {
        let store = JobStore::new();
        let pending = store.create(new_job(None));
        let running = store.create(new_job(None));
        store.start(&running).unwrap();

        store.discard_pending(&pending).unwrap();
        assert!(matches!(store.get(&pending), Err(StoreError::NotFound(_))));

        let err = store.discard_pending(&running).unwrap_err();
        assert!(matches!(err, StoreError::InvalidState { action: "discard", .. }));
        assert_eq!(store.get(&running).unwrap().status, JobStatus::Running);
    }

    #[test]
    fn test_fail_records_error_and_log() {
        let store = JobStore::new();
        let id = store.create(new_job(None));
        store.start(&id).unwrap();
        store.update(&id, JobUpdate::progress(30)).unwrap();
        store.fail(&id, "boom").unwrap();

        let job = store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert_eq!(job.progress, 30);
        assert!(job.metrics.is_empty());
        assert!(job.logs.iter().any(|l| l.message.contains("boom")));
    }

    #[test]
    fn test_cancel_completed_job_is_rejected_without_mutation() {
        let store = JobStore::new();
        let id = store.create(new_job(None));
        store.start(&id).unwrap();
        store.complete(&id, metrics(), None).unwrap();
        let before = store.get(&id).unwrap();

        let err = store.cancel(&id).unwrap_err();
        assert!(matches!(err, StoreError::InvalidState { action: "cancel", .. }));
        assert_eq!(store.get(&id).unwrap(), before);
    }

    #[test]
    fn test_cancelled_job_cannot_be_overwritten() {
        let store = JobStore::new();
        let id = store.create(new_job(None));
        store.start(&id).unwrap();
        store.cancel(&id).unwrap();

        assert!(store.complete(&id, metrics(), None).is_err());
        assert!(store.fail(&id, "late").is_err());
        assert!(store.start(&id).is_err());

        // Logs and progress may still move, results may not
        store.update(&id, JobUpdate::progress(50).with_log("late progress")).unwrap();
        let update = JobUpdate {
            model_path: Some("/tmp/model.json".into()),
            ..Default::default()
        };
        assert!(store.update(&id, update).is_err());

        let job = store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.progress < 100);
        assert!(job.model_path.is_none());
    }

    #[test]
    fn test_list_filters_and_orders_newest_first() {
        let store = JobStore::new();
        let first = store.create(new_job(Some("alice")));
        let second = store.create(new_job(Some("bob")));
        let third = store.create(new_job(Some("alice")));
        store.start(&second).unwrap();

        let all = store.list(&JobFilter::default());
        let ids: Vec<&str> = all.iter().map(|j| j.job_id.as_str()).collect();
        assert_eq!(ids, vec![third.as_str(), second.as_str(), first.as_str()]);

        let alice = store.list(&JobFilter {
            user_id: Some("alice".to_string()),
            ..Default::default()
        });
        assert_eq!(alice.len(), 2);

        let running = store.list(&JobFilter {
            status: Some(JobStatus::Running),
            ..Default::default()
        });
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].job_id, second);
    }

    #[test]
    fn test_list_page() {
        let store = JobStore::new();
        for _ in 0..5 {
            store.create(new_job(None));
        }
        let (page, total) = store.list_page(&JobFilter::default(), 3, 10);
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
    }

    #[test]
    fn test_stats() {
        let store = JobStore::new();
        let a = store.create(new_job(None));
        let b = store.create(new_job(None));
        let c = store.create(new_job(None));
        store.create(new_job(None));
        store.start(&a).unwrap();
        store.start(&b).unwrap();
        store.fail(&b, "x").unwrap();
        store.cancel(&c).unwrap();

        let stats = store.stats();
        assert_eq!(
            stats,
            JobStats {
                total: 4,
                pending: 1,
                running: 1,
                completed: 0,
                failed: 1,
                cancelled: 1,
            }
        );
    }

    #[test]
    fn test_delete_only_terminal() {
        let store = JobStore::new();
        let id = store.create(new_job(None));
        assert!(store.delete(&id).is_err());
        store.cancel(&id).unwrap();
        assert!(store.delete(&id).is_ok());
        assert!(matches!(store.get(&id), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_cancel_pending() {
        let store = JobStore::new();
        let pending = store.create(new_job(None));
        let running = store.create(new_job(None));
        store.start(&running).unwrap();

        let cancelled = store.cancel_pending();
        assert_eq!(cancelled, vec![pending.clone()]);
        assert!(store.is_cancelled(&pending));
        assert!(!store.is_cancelled(&running));
    }

    #[test]
    fn test_repeated_reads_are_identical() {
        let store = JobStore::new();
        let id = store.create(new_job(None));
        store.start(&id).unwrap();
        assert_eq!(store.get(&id).unwrap(), store.get(&id).unwrap());
    }

    #[tokio::test]
    async fn test_wait_for_terminal() {
        let store = Arc::new(JobStore::new());
        let id = store.create(new_job(None));
        store.start(&id).unwrap();

        let waiter = {
            let store = Arc::clone(&store);
            let id = id.clone();
            tokio::spawn(async move { store.wait_for_terminal(&id).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        store.fail(&id, "stopped").unwrap();

        let job = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter timed out")
            .unwrap()
            .unwrap();
        assert_eq!(job.status, JobStatus::Failed);
    }
}
