// Remote artifact publication
//
// The orchestrator only sees `ArtifactPublisher`. Transient failures are
// retried with exponential backoff; after the last attempt a
// `PublicationError` is returned and the configured policy decides the
// job's fate.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};

use crate::config::PublicationConfig;
use crate::errors::PublicationError;

/// Remote model repository contract
#[async_trait]
pub trait ArtifactPublisher: Send + Sync {
    /// Create the repository if it does not exist yet
    async fn create_repository(&self, repo_id: &str) -> Result<()>;

    /// Upload every file in `local_dir`; returns the remote URL
    async fn upload(&self, local_dir: &Path, repo_id: &str) -> Result<String>;
}

/// Deterministic repository id for a trained model
///
/// `{org}/{user}_{model_type}_{dataset}__{YYYYmmdd-HHMMSS}-{6 hex}`
pub fn build_repo_id(
    organization: &str,
    user_id: Option<&str>,
    model_type: &str,
    dataset_key: &str,
) -> String {
    let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}/{}_{}_{}__{}-{}",
        organization,
        user_id.unwrap_or("anonymous"),
        model_type,
        dataset_key.replace('/', "-"),
        timestamp,
        &suffix[..6]
    )
}

/// Create the repository and upload, retrying up to `max_attempts` times
pub async fn publish_with_retry(
    publisher: &dyn ArtifactPublisher,
    local_dir: &Path,
    repo_id: &str,
    config: &PublicationConfig,
) -> Result<String, PublicationError> {
    let max_attempts = config.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        let result = async {
            publisher.create_repository(repo_id).await?;
            publisher.upload(local_dir, repo_id).await
        }
        .await;

        match result {
            Ok(url) => {
                tracing::info!(repo_id = %repo_id, attempt, url = %url, "Published model");
                return Ok(url);
            }
            Err(e) => {
                last_error = format!("{:#}", e);
                tracing::warn!(
                    repo_id = %repo_id,
                    attempt,
                    max_attempts,
                    error = %last_error,
                    "Upload attempt failed"
                );
                if attempt < max_attempts {
                    tokio::time::sleep(config.backoff(attempt)).await;
                }
            }
        }
    }

    Err(PublicationError {
        repo_id: repo_id.to_string(),
        attempts: max_attempts,
        last_error,
    })
}

/// Publishes by copying artifacts into `{root}/{repo_id}`
pub struct FsPublisher {
    root: PathBuf,
}

impl FsPublisher {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn repo_dir(&self, repo_id: &str) -> PathBuf {
        self.root.join(repo_id)
    }
}

#[async_trait]
impl ArtifactPublisher for FsPublisher {
    async fn create_repository(&self, repo_id: &str) -> Result<()> {
        let dir = self.repo_dir(repo_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create repository {}", dir.display()))
    }

    async fn upload(&self, local_dir: &Path, repo_id: &str) -> Result<String> {
        let dest = self.repo_dir(repo_id);
        let mut entries = tokio::fs::read_dir(local_dir)
            .await
            .with_context(|| format!("Failed to read {}", local_dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let source = entry.path();
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let target = dest.join(entry.file_name());
            tokio::fs::copy(&source, &target)
                .await
                .with_context(|| format!("Failed to upload {}", source.display()))?;
        }

        Ok(format!("file://{}", dest.display()))
    }
}
