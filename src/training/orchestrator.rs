// Training orchestrator
//
// Admits training requests, records them in the job store and runs them on
// the worker pool:
//
//   Running -> tracker (10) -> data split (30) -> strategy (40)
//           -> training (40..80) -> artifact (90) -> publish -> Completed
//
// Every failure after admission ends in Failed with the error text stored
// on the record. Cancellation is cooperative: the worker checks for it
// between stages and never overwrites a Cancelled status.

use anyhow::Context;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, error, info, warn};

use super::artifacts::{ArtifactStore, ModelCard};
use super::pool::{ShutdownMode, WorkerPool};
use super::publish::{build_repo_id, publish_with_retry, ArtifactPublisher, FsPublisher};
use super::tracking::{ExperimentTracker, JsonlTracker, RunOutcome, TrackerRun};
use crate::config::{Config, PublicationConfig, PublicationFailurePolicy};
use crate::data::{DatasetService, LocalDatasetService, SplitConfig};
use crate::errors::{AdmissionError, ExecutionError, StoreError};
use crate::jobs::{JobConfig, JobFilter, JobRecord, JobStats, JobStore, JobUpdate, Metrics, NewJob};
use crate::models::{adapter, ModelRegistry};

const PROGRESS_TRACKING: u8 = 10;
const PROGRESS_DATA: u8 = 30;
const PROGRESS_STRATEGY: u8 = 40;
const PROGRESS_TRAINED: u8 = 80;
const PROGRESS_SAVED: u8 = 90;

/// A request to train one model
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingRequest {
    pub user_id: Option<String>,
    pub model_type: String,
    pub dataset_reference: String,
    /// Passed through to the dataset split and the strategy
    pub config: JobConfig,
    /// Publish the artifact to the remote repository after training
    pub publish: bool,
}

impl TrainingRequest {
    pub fn new(model_type: impl Into<String>, dataset_reference: impl Into<String>) -> Self {
        Self {
            model_type: model_type.into(),
            dataset_reference: dataset_reference.into(),
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_config(mut self, config: JobConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_publish(mut self, publish: bool) -> Self {
        self.publish = publish;
        self
    }
}

/// Assembles an orchestrator. Collaborators not supplied explicitly are
/// derived from the config.
pub struct OrchestratorBuilder {
    config: Config,
    registry: Arc<ModelRegistry>,
    store: Option<Arc<JobStore>>,
    datasets: Option<Arc<dyn DatasetService>>,
    publisher: Option<Arc<dyn ArtifactPublisher>>,
    tracker: Option<Arc<dyn ExperimentTracker>>,
}

impl OrchestratorBuilder {
    pub fn new(config: Config, registry: Arc<ModelRegistry>) -> Self {
        Self {
            config,
            registry,
            store: None,
            datasets: None,
            publisher: None,
            tracker: None,
        }
    }

    pub fn store(mut self, store: Arc<JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn datasets(mut self, datasets: Arc<dyn DatasetService>) -> Self {
        self.datasets = Some(datasets);
        self
    }

    pub fn publisher(mut self, publisher: Arc<dyn ArtifactPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Use this tracker even if tracking is disabled in the config
    pub fn tracker(mut self, tracker: Arc<dyn ExperimentTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn build(self) -> anyhow::Result<Orchestrator> {
        let config = self.config;
        config.validate()?;

        let artifacts = ArtifactStore::new(config.storage.models_dir.clone())?;
        let datasets = self.datasets.unwrap_or_else(|| {
            Arc::new(LocalDatasetService::new(config.storage.data_dir.clone()))
                as Arc<dyn DatasetService>
        });
        let publisher = self.publisher.unwrap_or_else(|| {
            Arc::new(FsPublisher::new(config.publication.publish_dir.clone()))
                as Arc<dyn ArtifactPublisher>
        });
        let tracker = self.tracker.or_else(|| {
            config.tracking.enabled.then(|| {
                Arc::new(JsonlTracker::new(config.tracking.runs_dir.clone()))
                    as Arc<dyn ExperimentTracker>
            })
        });

        info!(
            workers = config.workers.max_concurrent_jobs,
            models_dir = %config.storage.models_dir.display(),
            tracking = tracker.is_some(),
            "Orchestrator initialized"
        );

        Ok(Orchestrator {
            inner: Arc::new(Runner {
                store: self.store.unwrap_or_default(),
                registry: self.registry,
                datasets,
                publisher,
                tracker,
                artifacts,
                publication: config.publication.clone(),
                scratch_dir: config.storage.scratch_dir.clone(),
            }),
            pool: WorkerPool::new(config.workers.max_concurrent_jobs),
        })
    }
}

pub struct Orchestrator {
    inner: Arc<Runner>,
    pool: WorkerPool,
}

impl Orchestrator {
    pub fn builder(config: Config, registry: Arc<ModelRegistry>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config, registry)
    }

    /// Orchestrator with the local collaborators described by `config`
    pub fn from_config(config: Config, registry: Arc<ModelRegistry>) -> anyhow::Result<Self> {
        OrchestratorBuilder::new(config, registry).build()
    }

    /// Validate and enqueue a request. Returns once the job is recorded;
    /// execution happens on the worker pool.
    pub async fn submit(&self, request: TrainingRequest) -> Result<String, AdmissionError> {
        let runner = &self.inner;

        if !runner.registry.is_registered(&request.model_type) {
            return Err(AdmissionError::UnknownModelType {
                model_type: request.model_type,
                available: runner.registry.list_types(),
            });
        }

        match runner.datasets.exists(&request.dataset_reference).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(AdmissionError::DatasetUnavailable {
                    reference: request.dataset_reference,
                    reason: "not found".to_string(),
                })
            }
            Err(e) => {
                return Err(AdmissionError::DatasetUnavailable {
                    reference: request.dataset_reference,
                    reason: format!("{:#}", e),
                })
            }
        }

        if self.pool.is_closed() {
            return Err(AdmissionError::ShuttingDown);
        }

        let publish = request.publish;
        let job_id = runner.store.create(NewJob {
            user_id: request.user_id,
            model_type: request.model_type,
            dataset_reference: request.dataset_reference,
            config: request.config,
        });

        let worker = Arc::clone(runner);
        let id = job_id.clone();
        if let Err(e) = self.pool.schedule(async move { worker.run(id, publish).await }) {
            // Pool closed after the check above; leave no orphaned record
            debug!(job_id = %job_id, error = %e, "Scheduling failed, discarding job");
            let _ = runner.store.discard_pending(&job_id);
            return Err(AdmissionError::ShuttingDown);
        }

        debug!(job_id = %job_id, queued = self.pool.queued(), "Job scheduled");
        Ok(job_id)
    }

    pub fn get_status(&self, job_id: &str) -> Result<JobRecord, StoreError> {
        self.inner.store.get(job_id)
    }

    /// One page of matching jobs, newest first, plus the total match count
    pub fn list(&self, filter: &JobFilter, offset: usize, limit: usize) -> (Vec<JobRecord>, usize) {
        self.inner.store.list_page(filter, offset, limit)
    }

    pub fn stats(&self) -> JobStats {
        self.inner.store.stats()
    }

    pub fn cancel(&self, job_id: &str) -> Result<(), StoreError> {
        self.inner.store.cancel(job_id)
    }

    /// Forget a finished job. Its artifact stays on disk.
    pub fn delete(&self, job_id: &str) -> Result<JobRecord, StoreError> {
        self.inner.store.delete(job_id)
    }

    pub async fn wait_for_terminal(&self, job_id: &str) -> Result<JobRecord, StoreError> {
        self.inner.store.wait_for_terminal(job_id).await
    }

    pub fn model_types(&self) -> Vec<String> {
        self.inner.registry.list_types()
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.inner.store
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.inner.artifacts
    }

    pub fn is_shutting_down(&self) -> bool {
        self.pool.is_closed()
    }

    /// Stop admitting jobs and wait for the pool.
    ///
    /// Drain runs every queued job to completion. Cancel marks jobs that have
    /// not started as Cancelled and waits only for running ones.
    pub async fn shutdown(&self, mode: ShutdownMode) {
        info!(mode = ?mode, "Orchestrator shutting down");
        if mode == ShutdownMode::Cancel {
            self.inner.store.cancel_pending();
        }

        self.pool.shutdown(mode).await;

        if mode == ShutdownMode::Cancel {
            // jobs admitted while the pool was closing
            self.inner.store.cancel_pending();
        }
        info!("Orchestrator stopped");
    }
}

/// State shared by every worker task
struct Runner {
    store: Arc<JobStore>,
    registry: Arc<ModelRegistry>,
    datasets: Arc<dyn DatasetService>,
    publisher: Arc<dyn ArtifactPublisher>,
    tracker: Option<Arc<dyn ExperimentTracker>>,
    artifacts: ArtifactStore,
    publication: PublicationConfig,
    /// Parent of per-job scratch directories (system temp if None)
    scratch_dir: Option<PathBuf>,
}

impl Runner {
    /// Worker entry point. Always leaves the job terminal unless it was
    /// cancelled, in which case the Cancelled status is kept.
    async fn run(self: Arc<Self>, job_id: String, publish: bool) {
        let result = match AssertUnwindSafe(self.execute(&job_id, publish))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => Err(ExecutionError::Panicked(panic_message(payload))),
        };

        let Err(err) = result else {
            return;
        };

        if self.store.is_cancelled(&job_id) {
            info!(job_id = %job_id, "Job was cancelled, discarding result");
            return;
        }

        let message = err.to_string();
        if let Err(e) = self.store.fail(&job_id, &message) {
            warn!(job_id = %job_id, error = %e, "Could not record job failure");
        }
    }

    async fn execute(&self, job_id: &str, publish: bool) -> Result<(), ExecutionError> {
        if let Err(e) = self.store.start(job_id) {
            // Cancelled or removed while queued
            info!(job_id = %job_id, reason = %e, "Skipping job");
            return Ok(());
        }
        let job = self.store.get(job_id)?;

        let scratch = self.scratch_dir(job_id)?;
        let mut tracker_run = self.start_tracking(&job).await;
        self.store.update(job_id, JobUpdate::progress(PROGRESS_TRACKING))?;

        let result = self.pipeline(&job, scratch.path(), publish).await;

        if let Some(run) = tracker_run.as_mut() {
            finish_tracking(run.as_mut(), &result).await;
        }

        let scratch_path = scratch.path().to_path_buf();
        if let Err(e) = scratch.close() {
            warn!(job_id = %job_id, path = %scratch_path.display(), error = %e, "Failed to remove scratch directory");
        }

        let (metrics, remote_artifact_id) = result?;
        self.store.complete(job_id, metrics, remote_artifact_id)?;
        Ok(())
    }

    /// Data preparation through publication. Returns metrics and the remote
    /// artifact id.
    async fn pipeline(
        &self,
        job: &JobRecord,
        workdir: &Path,
        publish: bool,
    ) -> Result<(Metrics, Option<String>), ExecutionError> {
        let job_id = job.job_id.as_str();

        self.ensure_active(job_id)?;
        let split_config = SplitConfig::from_job_config(&job.config).map_err(ExecutionError::Data)?;
        let split = self
            .datasets
            .materialize(&job.dataset_reference, &split_config, workdir)
            .await
            .map_err(ExecutionError::Data)?;
        self.checkpoint(
            job_id,
            PROGRESS_DATA,
            format!(
                "Data prepared: {} training rows, {} validation rows",
                split.train_rows, split.validation_rows
            ),
        )?;

        self.ensure_active(job_id)?;
        let strategy = self.registry.get(&job.model_type, &job.config)?;
        self.checkpoint(job_id, PROGRESS_STRATEGY, format!("Initialized {} strategy", job.model_type))?;

        // Training is CPU-bound; keep it off the async workers
        let store = Arc::clone(&self.store);
        let id = job_id.to_string();
        let (strategy, metrics) = tokio::task::spawn_blocking(move || {
            let mut strategy = strategy;
            let report = move |percent: u8| {
                let span = u16::from(PROGRESS_TRAINED - PROGRESS_STRATEGY);
                let mapped = PROGRESS_STRATEGY + (u16::from(percent.min(100)) * span / 100) as u8;
                let _ = store.update(&id, JobUpdate::progress(mapped));
            };
            let metrics = adapter::train(strategy.as_mut(), &split, &report);
            (strategy, metrics)
        })
        .await
        .map_err(|e| {
            if e.is_panic() {
                ExecutionError::Panicked(panic_message(e.into_panic()))
            } else {
                ExecutionError::Training(anyhow::anyhow!("training task was aborted"))
            }
        })?;
        let metrics = metrics?;
        self.checkpoint(job_id, PROGRESS_TRAINED, format!("Training finished with {} metrics", metrics.len()))?;

        self.ensure_active(job_id)?;
        let model_path = self
            .artifacts
            .save(strategy.as_ref(), &job.model_type, job_id)
            .map_err(ExecutionError::Artifact)?;
        self.store.update(
            job_id,
            JobUpdate {
                model_path: Some(model_path.clone()),
                ..JobUpdate::progress(PROGRESS_SAVED)
            }
            .with_log(format!("Model saved to {}", model_path.display())),
        )?;

        let remote_artifact_id = if publish {
            self.ensure_active(job_id)?;
            self.publish(job, &metrics).await?
        } else {
            None
        };

        Ok((metrics, remote_artifact_id))
    }

    /// Write the model card and upload. Failures after retries follow the
    /// configured policy.
    async fn publish(&self, job: &JobRecord, metrics: &Metrics) -> Result<Option<String>, ExecutionError> {
        let job_id = job.job_id.as_str();
        let card = ModelCard {
            model_type: &job.model_type,
            job_id,
            dataset_reference: &job.dataset_reference,
            trained_at: chrono::Utc::now(),
            metrics,
            config: &job.config,
        };
        self.artifacts
            .write_model_card(&card)
            .map_err(ExecutionError::Artifact)?;

        let repo_id = build_repo_id(
            &self.publication.organization,
            job.user_id.as_deref(),
            &job.model_type,
            &job.dataset_reference,
        );
        self.store.append_log(job_id, format!("Publishing model to {}", repo_id))?;

        let local_dir = self.artifacts.model_dir(&job.model_type, job_id);
        match publish_with_retry(self.publisher.as_ref(), &local_dir, &repo_id, &self.publication).await {
            Ok(url) => {
                self.store.append_log(job_id, format!("Model published: {}", url))?;
                Ok(Some(repo_id))
            }
            Err(e) => match self.publication.failure_policy {
                PublicationFailurePolicy::Fatal => Err(e.into()),
                PublicationFailurePolicy::Advisory => {
                    warn!(job_id = %job_id, error = %e, "Publication failed, keeping local artifact");
                    self.store.append_log(job_id, format!("Publication skipped: {}", e))?;
                    Ok(None)
                }
            },
        }
    }

    /// Start a tracker run; failures only produce a log line
    async fn start_tracking(&self, job: &JobRecord) -> Option<Box<dyn TrackerRun>> {
        let tracker = self.tracker.as_ref()?;

        match tracker.start_run(&job.job_id, &job.model_type, &job.config).await {
            Ok(run) => {
                let update = JobUpdate {
                    tracking_run_id: Some(run.run_id().to_string()),
                    run_tracking_url: run.run_url(),
                    ..JobUpdate::log(format!("Tracking run {}", run.run_id()))
                };
                if let Err(e) = self.store.update(&job.job_id, update) {
                    debug!(job_id = %job.job_id, error = %e, "Tracking info not recorded");
                }
                Some(run)
            }
            Err(e) => {
                warn!(job_id = %job.job_id, error = %e, "Experiment tracking unavailable");
                let _ = self
                    .store
                    .append_log(&job.job_id, format!("Experiment tracking unavailable: {:#}", e));
                None
            }
        }
    }

    fn scratch_dir(&self, job_id: &str) -> Result<TempDir, ExecutionError> {
        let prefix = format!("trainhub-{}-", job_id);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);

        match &self.scratch_dir {
            Some(parent) => std::fs::create_dir_all(parent)
                .and_then(|_| builder.tempdir_in(parent))
                .with_context(|| format!("Failed to create scratch directory in {}", parent.display())),
            None => builder.tempdir().context("Failed to create scratch directory"),
        }
        .map_err(ExecutionError::Data)
    }

    fn ensure_active(&self, job_id: &str) -> Result<(), ExecutionError> {
        if self.store.is_cancelled(job_id) {
            return Err(ExecutionError::Cancelled);
        }
        Ok(())
    }

    fn checkpoint(&self, job_id: &str, progress: u8, message: String) -> Result<(), ExecutionError> {
        debug!(job_id = %job_id, progress, "{}", message);
        self.store
            .update(job_id, JobUpdate::progress(progress).with_log(message))?;
        Ok(())
    }
}

async fn finish_tracking(
    run: &mut dyn TrackerRun,
    result: &Result<(Metrics, Option<String>), ExecutionError>,
) {
    let outcome = match result {
        Ok((metrics, _)) => {
            if let Err(e) = run.log_metrics(metrics).await {
                warn!(run_id = %run.run_id(), error = %e, "Failed to log metrics to tracker");
            }
            RunOutcome::Completed
        }
        Err(_) => RunOutcome::Failed,
    };
    if let Err(e) = run.finish(outcome).await {
        warn!(run_id = %run.run_id(), error = %e, "Failed to finish tracker run");
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        error!("Worker panicked with a non-string payload");
        "unknown panic".to_string()
    }
}
