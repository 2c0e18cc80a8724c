// Error taxonomy for the orchestrator
//
// Admission errors surface synchronously from `submit`. Execution errors are
// captured into the job record and never reach the caller. Store errors
// propagate to whichever API call triggered them.

use thiserror::Error;

use crate::jobs::JobStatus;

/// Rejections raised before a job record exists
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("unknown model type '{model_type}' (available: {})", available.join(", "))]
    UnknownModelType {
        model_type: String,
        available: Vec<String>,
    },

    #[error("dataset '{reference}' is unavailable: {reason}")]
    DatasetUnavailable { reference: String, reason: String },

    #[error("orchestrator is shutting down; no new jobs are accepted")]
    ShuttingDown,
}

/// Errors from job store operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("cannot {action} job {job_id} in state {status}")]
    InvalidState {
        job_id: String,
        status: JobStatus,
        action: &'static str,
    },

    #[error("cannot complete job {0} without metrics")]
    EmptyMetrics(String),
}

/// Lookup failures in the model strategy registry
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("model type '{0}' is not registered")]
    UnknownModelType(String),

    #[error("failed to construct '{model_type}' strategy: {source}")]
    Construction {
        model_type: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Remote publication failure after the retry budget is spent
#[derive(Debug, Error)]
#[error("failed to publish '{repo_id}' after {attempts} attempts: {last_error}")]
pub struct PublicationError {
    pub repo_id: String,
    pub attempts: u32,
    pub last_error: String,
}

/// Failures during job execution. The display text is stored verbatim in
/// the job record.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("data preparation failed: {0:#}")]
    Data(anyhow::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("strategy '{0}' exposes no supported training interface")]
    UnsupportedStrategyInterface(String),

    #[error("training failed: {0:#}")]
    Training(anyhow::Error),

    #[error("strategy '{0}' returned no metrics")]
    EmptyMetrics(String),

    #[error("failed to save model artifact: {0:#}")]
    Artifact(anyhow::Error),

    #[error(transparent)]
    Publication(#[from] PublicationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("job was cancelled")]
    Cancelled,

    #[error("worker panicked: {0}")]
    Panicked(String),
}

/// Worker pool scheduling errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("worker pool is closed")]
    Closed,
}

/// Format an admission error with a suggestion for CLI users
pub fn admission_error_message(error: &AdmissionError) -> String {
    let suggestion = match error {
        AdmissionError::UnknownModelType { .. } => {
            "run `trainhub models` to list the registered model types"
        }
        AdmissionError::DatasetUnavailable { .. } => {
            "use `sample`, a `.jsonl` path, or a table name under the configured data_dir"
        }
        AdmissionError::ShuttingDown => "retry once the orchestrator has restarted",
    };
    wrap_error_with_suggestion(error, suggestion)
}

/// Wrap a generic error with a suggestion
pub fn wrap_error_with_suggestion(error: impl std::fmt::Display, suggestion: &str) -> String {
    format!("{}\n\n\x1b[1;33mSuggestion:\x1b[0m {}", error, suggestion)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_model_type_lists_available() {
        let err = AdmissionError::UnknownModelType {
            model_type: "nonexistent".to_string(),
            available: vec!["linear_regression".to_string(), "ridge_regression".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("nonexistent"));
        assert!(msg.contains("linear_regression, ridge_regression"));
    }

    #[test]
    fn test_invalid_state_message() {
        let err = StoreError::InvalidState {
            job_id: "abc".to_string(),
            status: JobStatus::Completed,
            action: "cancel",
        };
        assert_eq!(err.to_string(), "cannot cancel job abc in state completed");
    }

    #[test]
    fn test_admission_message_has_suggestion() {
        let msg = admission_error_message(&AdmissionError::DatasetUnavailable {
            reference: "missing".to_string(),
            reason: "not found".to_string(),
        });
        assert!(msg.contains("missing"));
        assert!(msg.contains("Suggestion"));
    }
}
