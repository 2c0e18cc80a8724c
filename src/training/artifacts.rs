// Local artifact storage
//
// Trained models live at {root}/{model_type}/{job_id}/model.json, with an
// optional README.md model card next to them.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::jobs::{JobConfig, Metrics};
use crate::models::ModelStrategy;

pub const MODEL_FILE: &str = "model.json";
pub const MODEL_CARD_FILE: &str = "README.md";

/// A saved model found on disk
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactInfo {
    pub model_type: String,
    pub job_id: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Summary published alongside a model
#[derive(Debug, Clone)]
pub struct ModelCard<'a> {
    pub model_type: &'a str,
    pub job_id: &'a str,
    pub dataset_reference: &'a str,
    pub trained_at: DateTime<Utc>,
    pub metrics: &'a Metrics,
    pub config: &'a JobConfig,
}

impl ModelCard<'_> {
    pub fn render(&self) -> String {
        let mut card = String::new();
        let _ = writeln!(card, "# {}\n", self.model_type);
        let _ = writeln!(card, "## Model Description");
        let _ = writeln!(card, "- **Model Type**: {}", self.model_type);
        let _ = writeln!(card, "- **Dataset**: {}", self.dataset_reference);
        let _ = writeln!(card, "- **Training Date**: {}", self.trained_at.to_rfc3339());
        let _ = writeln!(card, "- **Job ID**: {}\n", self.job_id);

        let _ = writeln!(card, "## Performance Metrics");
        for (name, value) in self.metrics {
            let _ = writeln!(card, "- **{}**: {:.4}", name, value);
        }

        let _ = writeln!(card, "\n## Training Configuration");
        if self.config.is_empty() {
            let _ = writeln!(card, "- defaults");
        }
        for (param, value) in self.config {
            let _ = writeln!(card, "- **{}**: {}", param, value);
        }
        card
    }
}

pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create models directory: {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn model_dir(&self, model_type: &str, job_id: &str) -> PathBuf {
        self.root.join(model_type).join(job_id)
    }

    pub fn model_path(&self, model_type: &str, job_id: &str) -> PathBuf {
        self.model_dir(model_type, job_id).join(MODEL_FILE)
    }

    /// Persist a trained strategy under the job's model type and return the
    /// artifact path
    pub fn save(
        &self,
        strategy: &dyn ModelStrategy,
        model_type: &str,
        job_id: &str,
    ) -> Result<PathBuf> {
        let dir = self.model_dir(model_type, job_id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create model directory: {}", dir.display()))?;

        let path = dir.join(MODEL_FILE);
        strategy
            .save(&path)
            .with_context(|| format!("Failed to save {} model", model_type))?;

        tracing::info!(job_id = %job_id, path = %path.display(), "Saved model artifact");
        Ok(path)
    }

    /// Write README.md into the artifact directory
    pub fn write_model_card(&self, card: &ModelCard<'_>) -> Result<PathBuf> {
        let path = self.model_dir(card.model_type, card.job_id).join(MODEL_CARD_FILE);
        fs::write(&path, card.render())
            .with_context(|| format!("Failed to write model card: {}", path.display()))?;
        Ok(path)
    }

    /// Every saved model, sorted by model type then job id
    pub fn list(&self) -> Result<Vec<ArtifactInfo>> {
        let mut artifacts = Vec::new();

        for type_entry in fs::read_dir(&self.root)
            .with_context(|| format!("Failed to read models directory: {}", self.root.display()))?
        {
            let type_dir = type_entry?.path();
            if !type_dir.is_dir() {
                continue;
            }
            for job_entry in fs::read_dir(&type_dir)? {
                let job_dir = job_entry?.path();
                let path = job_dir.join(MODEL_FILE);
                if !path.is_file() {
                    continue;
                }
                let size = fs::metadata(&path)?.len();
                artifacts.push(ArtifactInfo {
                    model_type: file_name(&type_dir),
                    job_id: file_name(&job_dir),
                    path,
                    size,
                });
            }
        }

        artifacts.sort_by(|a, b| (&a.model_type, &a.job_id).cmp(&(&b.model_type, &b.job_id)));
        Ok(artifacts)
    }

    /// Remove a saved model; false if it did not exist
    pub fn delete(&self, model_type: &str, job_id: &str) -> Result<bool> {
        let dir = self.model_dir(model_type, job_id);
        if !dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&dir)
            .with_context(|| format!("Failed to delete model directory: {}", dir.display()))?;
        tracing::info!(job_id = %job_id, model_type = %model_type, "Deleted model artifact");
        Ok(true)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ArrayInput, LinearRegressionStrategy};
    use ndarray::array;
    use tempfile::TempDir;

    fn trained() -> LinearRegressionStrategy {
        let mut strategy = LinearRegressionStrategy::new(&JobConfig::new()).unwrap();
        let input = ArrayInput {
            x_train: array![[0.0], [1.0], [2.0]],
            y_train: array![1.0, 3.0, 5.0],
            x_val: array![[3.0]],
            y_val: array![7.0],
        };
        strategy.fit_arrays(&input, &|_| {}).unwrap();
        strategy
    }

    #[test]
    fn test_save_uses_type_and_job_layout() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join("models")).unwrap();

        let path = store.save(&trained(), "linear_regression", "job-1").unwrap();
        assert_eq!(
            path,
            dir.path().join("models/linear_regression/job-1/model.json")
        );
        assert!(path.is_file());
    }

    #[test]
    fn test_list_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().to_path_buf()).unwrap();
        let strategy = trained();
        store.save(&strategy, "linear_regression", "b").unwrap();
        store.save(&strategy, "linear_regression", "a").unwrap();

        let listed = store.list().unwrap();
        let ids: Vec<&str> = listed.iter().map(|a| a.job_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(listed.iter().all(|a| a.size > 0));

        assert!(store.delete("linear_regression", "a").unwrap());
        assert!(!store.delete("linear_regression", "a").unwrap());
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_model_card() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().to_path_buf()).unwrap();
        store.save(&trained(), "linear_regression", "job-9").unwrap();

        let metrics = Metrics::from([("val_r2".to_string(), 0.98765)]);
        let config = JobConfig::new();
        let card = ModelCard {
            model_type: "linear_regression",
            job_id: "job-9",
            dataset_reference: "sample",
            trained_at: Utc::now(),
            metrics: &metrics,
            config: &config,
        };
        let path = store.write_model_card(&card).unwrap();
        let text = fs::read_to_string(path).unwrap();
        assert!(text.contains("**val_r2**: 0.9877"));
        assert!(text.contains("job-9"));
    }
}
