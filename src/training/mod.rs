// Training module - job execution, artifacts and publication

pub mod artifacts;
pub mod orchestrator;
pub mod pool;
pub mod publish;
pub mod tracking;

pub use artifacts::{ArtifactInfo, ArtifactStore, ModelCard};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, TrainingRequest};
pub use pool::{ShutdownMode, WorkerPool};
pub use publish::{build_repo_id, publish_with_retry, ArtifactPublisher, FsPublisher};
pub use tracking::{ExperimentTracker, JsonlTracker, RunEvent, RunOutcome, TrackerRun};
