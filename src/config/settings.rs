// Configuration structs

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What happens to a job whose remote publication fails after all retries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublicationFailurePolicy {
    /// Job is marked Failed
    Fatal,
    /// Job completes without a remote artifact; the failure is logged
    #[default]
    Advisory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Trained artifacts: {models_dir}/{model_type}/{job_id}/model.json
    pub models_dir: PathBuf,
    /// Local JSONL datasets
    pub data_dir: PathBuf,
    /// Parent of per-job scratch directories (system temp dir if unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("./models"),
            data_dir: PathBuf::from("./data"),
            scratch_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker pool size
    pub max_concurrent_jobs: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublicationConfig {
    /// Namespace prefix of generated repository ids
    pub organization: String,
    /// Root the filesystem publisher copies artifacts into
    pub publish_dir: PathBuf,
    pub failure_policy: PublicationFailurePolicy,
    /// Upload attempts before giving up
    pub max_attempts: u32,
    /// Delay before retry n is backoff_base_ms * 2^(n-1)
    pub backoff_base_ms: u64,
}

impl Default for PublicationConfig {
    fn default() -> Self {
        Self {
            organization: "trainhub".to_string(),
            publish_dir: PathBuf::from("./published"),
            failure_policy: PublicationFailurePolicy::Advisory,
            max_attempts: 3,
            backoff_base_ms: 2000,
        }
    }
}

impl PublicationConfig {
    /// Delay after failed attempt `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub enabled: bool,
    /// Where the JSONL tracker writes run files
    pub runs_dir: PathBuf,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            runs_dir: PathBuf::from("./runs"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub workers: WorkerConfig,
    pub publication: PublicationConfig,
    pub tracking: TrackingConfig,
}

impl Config {
    /// Defaults with every directory placed under `root`
    pub fn with_root(root: &Path) -> Self {
        let mut config = Self::default();
        config.storage.models_dir = root.join("models");
        config.storage.data_dir = root.join("data");
        config.storage.scratch_dir = Some(root.join("scratch"));
        config.publication.publish_dir = root.join("published");
        config.tracking.runs_dir = root.join("runs");
        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers.max_concurrent_jobs == 0 {
            bail!("workers.max_concurrent_jobs must be at least 1");
        }
        if self.publication.max_attempts == 0 {
            bail!("publication.max_attempts must be at least 1");
        }
        if self.publication.organization.trim().is_empty() {
            bail!("publication.organization must not be empty");
        }
        Ok(())
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.workers.max_concurrent_jobs, 4);
        assert_eq!(config.publication.failure_policy, PublicationFailurePolicy::Advisory);
    }

    #[test]
    fn test_backoff_doubles() {
        let publication = PublicationConfig::default();
        assert_eq!(publication.backoff(1), Duration::from_millis(2000));
        assert_eq!(publication.backoff(2), Duration::from_millis(4000));
        assert_eq!(publication.backoff(3), Duration::from_millis(8000));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = Config::default();
        config.workers.max_concurrent_jobs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = Config::with_root(Path::new("/tmp/trainhub"));
        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("failure_policy = \"advisory\""));
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
