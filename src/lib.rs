// Trainhub - Asynchronous model-training job orchestrator
// Library exports

pub mod config;
pub mod data; // Dataset service and JSONL tables
pub mod errors;
pub mod jobs; // Job records and the in-memory job store
pub mod models; // Strategy trait, registry, execution adapter
pub mod training; // Orchestrator, worker pool, artifacts, publication
