// Configuration loader
// Layers defaults, an optional TOML file and TRAINHUB__* environment variables

use anyhow::{Context, Result};
use config::{Environment, File};
use std::path::{Path, PathBuf};

use super::settings::Config;

/// ~/.trainhub/config.toml
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".trainhub").join("config.toml"))
}

/// Load configuration.
///
/// An explicit `path` must exist; otherwise `~/.trainhub/config.toml` is used
/// when present. Environment variables such as
/// `TRAINHUB__WORKERS__MAX_CONCURRENT_JOBS=8` override both.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let defaults = config::Config::try_from(&Config::default())
        .context("Failed to serialize default configuration")?;

    let mut builder = config::Config::builder().add_source(defaults);

    match path {
        Some(path) => {
            builder = builder.add_source(File::from(path).required(true));
        }
        None => {
            if let Some(default_path) = default_config_path() {
                builder = builder.add_source(File::from(default_path).required(false));
            }
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("TRAINHUB")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let config: Config = builder
        .build()
        .context("Failed to load configuration")?
        .try_deserialize()
        .context("Failed to parse configuration")?;

    config.validate()?;

    tracing::debug!(
        workers = config.workers.max_concurrent_jobs,
        models_dir = %config.storage.models_dir.display(),
        "Configuration loaded"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PublicationFailurePolicy;
    use tempfile::TempDir;

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[workers]\nmax_concurrent_jobs = 2\n\n[publication]\nfailure_policy = \"fatal\"\n",
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.workers.max_concurrent_jobs, 2);
        assert_eq!(config.publication.failure_policy, PublicationFailurePolicy::Fatal);
        // untouched sections keep their defaults
        assert_eq!(config.publication.max_attempts, 3);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(load_config(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[workers]\nmax_concurrent_jobs = 0\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
