// Dataset service
//
// Probes dataset availability at admission and materializes train/validation
// splits into a job's scratch directory at execution time.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use std::path::{Path, PathBuf};

use super::table::{self, Row};
use crate::jobs::{ConfigExt, JobConfig};

/// Reference that resolves to the built-in synthetic dataset
pub const SAMPLE_DATASET: &str = "sample";

/// How a dataset is split and which columns are used
#[derive(Debug, Clone, PartialEq)]
pub struct SplitConfig {
    pub test_size: f64,
    pub target_column: String,
    /// None = every column except the target
    pub feature_columns: Option<Vec<String>>,
    pub seed: u64,
    /// Synthetic dataset size
    pub n_samples: usize,
    pub n_features: usize,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            test_size: 0.2,
            target_column: "target".to_string(),
            feature_columns: None,
            seed: 42,
            n_samples: 1000,
            n_features: 10,
        }
    }
}

impl SplitConfig {
    /// Read split settings from a job config, falling back to defaults
    pub fn from_job_config(config: &JobConfig) -> Result<Self> {
        let defaults = Self::default();
        let split = Self {
            test_size: config.f64_or("test_size", defaults.test_size)?,
            target_column: config
                .str_or("target_column", &defaults.target_column)?
                .to_string(),
            feature_columns: config.string_list("feature_columns")?,
            seed: config.u64_or("seed", defaults.seed)?,
            n_samples: config.usize_or("n_samples", defaults.n_samples)?,
            n_features: config.usize_or("n_features", defaults.n_features)?,
        };

        if !(split.test_size > 0.0 && split.test_size < 1.0) {
            bail!("test_size must be between 0 and 1, got {}", split.test_size);
        }
        Ok(split)
    }
}

/// Materialized train/validation partitions
#[derive(Debug, Clone)]
pub struct DatasetSplit {
    pub train_path: PathBuf,
    pub validation_path: PathBuf,
    pub target: String,
    pub features: Vec<String>,
    pub train_rows: usize,
    pub validation_rows: usize,
}

/// External data service contract
#[async_trait]
pub trait DatasetService: Send + Sync {
    /// Whether the reference can be materialized
    async fn exists(&self, reference: &str) -> Result<bool>;

    /// Split the dataset into `workdir`
    async fn materialize(
        &self,
        reference: &str,
        split: &SplitConfig,
        workdir: &Path,
    ) -> Result<DatasetSplit>;
}

/// Datasets stored as JSONL tables under a data directory, plus the
/// synthetic `sample` dataset
pub struct LocalDatasetService {
    data_dir: PathBuf,
}

impl LocalDatasetService {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    /// `foo` -> `{data_dir}/foo.jsonl`; explicit `.jsonl` paths are used as
    /// given, relative ones under `data_dir`
    pub fn resolve(&self, reference: &str) -> PathBuf {
        let path = Path::new(reference);
        if reference.ends_with(".jsonl") {
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                self.data_dir.join(path)
            }
        } else {
            self.data_dir.join(format!("{}.jsonl", reference))
        }
    }
}

#[async_trait]
impl DatasetService for LocalDatasetService {
    async fn exists(&self, reference: &str) -> Result<bool> {
        if reference == SAMPLE_DATASET {
            return Ok(true);
        }
        let path = self.resolve(reference);
        tokio::fs::try_exists(&path)
            .await
            .with_context(|| format!("Failed to probe {}", path.display()))
    }

    async fn materialize(
        &self,
        reference: &str,
        split: &SplitConfig,
        workdir: &Path,
    ) -> Result<DatasetSplit> {
        let source = if reference == SAMPLE_DATASET {
            None
        } else {
            Some(self.resolve(reference))
        };
        let split = split.clone();
        let workdir = workdir.to_path_buf();

        tokio::task::spawn_blocking(move || {
            let rows = match &source {
                None => sample_rows(split.n_samples, split.n_features, split.seed),
                Some(path) => table::read_rows(path)?,
            };
            split_rows(rows, &split, &workdir)
        })
        .await
        .context("Dataset preparation task failed")?
    }
}

/// Synthetic linear data: target = x . w + 0.5 + small noise
pub fn sample_rows(n_samples: usize, n_features: usize, seed: u64) -> Vec<Row> {
    let mut rng = StdRng::seed_from_u64(seed);
    let weights: Vec<f64> = (0..n_features).map(|_| rng.gen_range(-2.0..2.0)).collect();

    (0..n_samples)
        .map(|_| {
            let mut row = Row::new();
            let mut target = 0.5;
            for (i, w) in weights.iter().enumerate() {
                let x: f64 = rng.gen_range(-1.0..1.0);
                target += w * x;
                row.insert(format!("feature_{}", i), Value::from(x));
            }
            target += rng.gen_range(-0.05..0.05);
            row.insert("target".to_string(), Value::from(target));
            row
        })
        .collect()
}

/// Shuffle, split and write `train.jsonl` / `validation.jsonl`
pub fn split_rows(mut rows: Vec<Row>, split: &SplitConfig, workdir: &Path) -> Result<DatasetSplit> {
    if rows.len() < 2 {
        bail!("dataset needs at least 2 rows, found {}", rows.len());
    }

    let target = split.target_column.clone();
    let features = match &split.feature_columns {
        Some(columns) => columns.clone(),
        None => {
            let mut columns: Vec<String> =
                rows[0].keys().filter(|k| **k != target).cloned().collect();
            columns.sort();
            columns
        }
    };
    if features.is_empty() {
        bail!("dataset has no feature columns besides '{}'", target);
    }

    let mut columns = features.clone();
    columns.push(target.clone());
    table::validate_rows(&rows, &columns)?;

    let mut rng = StdRng::seed_from_u64(split.seed);
    rows.shuffle(&mut rng);

    let n_val = ((rows.len() as f64) * split.test_size).round() as usize;
    let n_val = n_val.clamp(1, rows.len() - 1);
    let validation = rows.split_off(rows.len() - n_val);

    let train_path = workdir.join("train.jsonl");
    let validation_path = workdir.join("validation.jsonl");
    table::write_rows(&train_path, &rows, &columns)?;
    table::write_rows(&validation_path, &validation, &columns)?;

    Ok(DatasetSplit {
        train_path,
        validation_path,
        target,
        features,
        train_rows: rows.len(),
        validation_rows: validation.len(),
    })
}
