// Built-in linear strategies
//
// linear_regression: closed-form least squares, array-shaped input only.
// ridge_regression: L2-regularized gradient descent, accepts both shapes and
// reports progress once per tenth of its epochs.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use super::metrics::regression_metrics;
use super::strategy::{ArrayInput, Capabilities, ModelStrategy, PathInput, ProgressFn};
use crate::data::table;
use crate::jobs::{ConfigExt, JobConfig, Metrics};

/// Fitted coefficients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearModel {
    pub weights: Vec<f64>,
    pub intercept: f64,
}

impl LinearModel {
    pub fn predict(&self, x: &Array2<f64>) -> Array1<f64> {
        let w = Array1::from_vec(self.weights.clone());
        x.dot(&w) + self.intercept
    }
}

/// On-disk artifact format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedLinearModel {
    pub model_type: String,
    pub model: LinearModel,
    pub features: Option<Vec<String>>,
    pub trained_at: Option<DateTime<Utc>>,
    pub metrics: Metrics,
    pub config: JobConfig,
}

impl SavedLinearModel {
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read model artifact: {}", path.display()))?;
        serde_json::from_str(&json).context("Failed to parse model artifact")
    }
}

struct Fitted {
    model: LinearModel,
    features: Option<Vec<String>>,
    trained_at: DateTime<Utc>,
    metrics: Metrics,
}

fn save_fitted(model_type: &str, fitted: Option<&Fitted>, config: &JobConfig, path: &Path) -> Result<()> {
    let fitted = fitted.with_context(|| format!("{} has not been trained", model_type))?;
    let saved = SavedLinearModel {
        model_type: model_type.to_string(),
        model: fitted.model.clone(),
        features: fitted.features.clone(),
        trained_at: Some(fitted.trained_at),
        metrics: fitted.metrics.clone(),
        config: config.clone(),
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(&saved).context("Failed to serialize model")?;
    fs::write(path, json).with_context(|| format!("Failed to write model: {}", path.display()))?;
    Ok(())
}

fn check_shapes(input: &ArrayInput) -> Result<()> {
    if input.x_train.nrows() == 0 {
        bail!("training set is empty");
    }
    if input.x_train.nrows() != input.y_train.len() || input.x_val.nrows() != input.y_val.len() {
        bail!("feature and target row counts differ");
    }
    if input.x_train.ncols() != input.x_val.ncols() {
        bail!(
            "train has {} features but validation has {}",
            input.x_train.ncols(),
            input.x_val.ncols()
        );
    }
    Ok(())
}

fn evaluate(model: &LinearModel, input: &ArrayInput) -> Metrics {
    let mut metrics = regression_metrics("train", input.y_train.view(), &model.predict(&input.x_train));
    if input.x_val.nrows() > 0 {
        metrics.extend(regression_metrics("val", input.y_val.view(), &model.predict(&input.x_val)));
    }
    metrics
}

fn load_path_input(input: &PathInput) -> Result<ArrayInput> {
    let (x_train, y_train) = table::read_arrays(&input.train_path, &input.target, &input.features)?;
    let (x_val, y_val) = table::read_arrays(&input.validation_path, &input.target, &input.features)?;
    Ok(ArrayInput {
        x_train,
        y_train,
        x_val,
        y_val,
    })
}

/// Column means, zeros if `enabled` is false
fn centering(x: &Array2<f64>, y: &Array1<f64>, enabled: bool) -> (Array1<f64>, f64) {
    if !enabled {
        return (Array1::zeros(x.ncols()), 0.0);
    }
    let x_mean = x
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(x.ncols()));
    (x_mean, y.mean().unwrap_or(0.0))
}

/// Solve `a x = b` by Gaussian elimination with partial pivoting
pub fn solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Result<Array1<f64>> {
    let n = b.len();
    if a.nrows() != n || a.ncols() != n {
        bail!("system must be square, got {:?} for {} unknowns", a.shape(), n);
    }

    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))
            .unwrap_or(col);
        if a[[pivot, col]].abs() < 1e-12 {
            bail!("matrix is singular (collinear features?)");
        }
        if pivot != col {
            for k in 0..n {
                a.swap([pivot, k], [col, k]);
            }
            b.swap(pivot, col);
        }

        for row in col + 1..n {
            let factor = a[[row, col]] / a[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = Array1::zeros(n);
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[[row, k]] * x[k]).sum();
        x[row] = (b[row] - tail) / a[[row, row]];
    }
    Ok(x)
}

/// Ordinary least squares
pub struct LinearRegressionStrategy {
    config: JobConfig,
    fit_intercept: bool,
    fitted: Option<Fitted>,
}

impl LinearRegressionStrategy {
    pub const MODEL_TYPE: &'static str = "linear_regression";

    pub fn new(config: &JobConfig) -> Result<Self> {
        Ok(Self {
            fit_intercept: config.bool_or("fit_intercept", true)?,
            config: config.clone(),
            fitted: None,
        })
    }
}

impl ModelStrategy for LinearRegressionStrategy {
    fn model_type(&self) -> &str {
        Self::MODEL_TYPE
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::ARRAYS
    }

    fn fit_arrays(&mut self, input: &ArrayInput, progress: ProgressFn<'_>) -> Result<Metrics> {
        check_shapes(input)?;
        let trained_at = Utc::now();

        let (x_mean, y_mean) = centering(&input.x_train, &input.y_train, self.fit_intercept);
        let xc = &input.x_train - &x_mean;
        let yc = &input.y_train - y_mean;

        let gram = xc.t().dot(&xc);
        let rhs = xc.t().dot(&yc);
        let weights = solve(gram, rhs)?;
        progress(50);

        let model = LinearModel {
            intercept: y_mean - x_mean.dot(&weights),
            weights: weights.to_vec(),
        };
        let metrics = evaluate(&model, input);
        progress(100);

        self.fitted = Some(Fitted {
            model,
            features: None,
            trained_at,
            metrics: metrics.clone(),
        });
        Ok(metrics)
    }

    fn save(&self, path: &Path) -> Result<()> {
        save_fitted(Self::MODEL_TYPE, self.fitted.as_ref(), &self.config, path)
    }
}

/// L2-regularized linear regression trained by full-batch gradient descent
pub struct RidgeRegressionStrategy {
    config: JobConfig,
    alpha: f64,
    learning_rate: f64,
    epochs: usize,
    fit_intercept: bool,
    fitted: Option<Fitted>,
}

impl RidgeRegressionStrategy {
    pub const MODEL_TYPE: &'static str = "ridge_regression";

    pub fn new(config: &JobConfig) -> Result<Self> {
        let strategy = Self {
            alpha: config.f64_or("alpha", 0.001)?,
            learning_rate: config.f64_or("learning_rate", 0.1)?,
            epochs: config.usize_or("epochs", 300)?,
            fit_intercept: config.bool_or("fit_intercept", true)?,
            config: config.clone(),
            fitted: None,
        };
        if strategy.alpha < 0.0 {
            bail!("alpha must be non-negative");
        }
        if strategy.learning_rate <= 0.0 {
            bail!("learning_rate must be positive");
        }
        if strategy.epochs == 0 {
            bail!("epochs must be at least 1");
        }
        Ok(strategy)
    }

    fn fit(&mut self, input: &ArrayInput, features: Option<Vec<String>>, progress: ProgressFn<'_>) -> Result<Metrics> {
        check_shapes(input)?;
        let trained_at = Utc::now();
        let n = input.x_train.nrows() as f64;

        let (x_mean, y_mean) = centering(&input.x_train, &input.y_train, self.fit_intercept);
        let xc = &input.x_train - &x_mean;
        let yc = &input.y_train - y_mean;

        let mut w = Array1::<f64>::zeros(xc.ncols());
        let report_every = (self.epochs / 10).max(1);
        for epoch in 1..=self.epochs {
            let residual = xc.dot(&w) - &yc;
            let grad = xc.t().dot(&residual) / n + &w * self.alpha;
            w = w - grad * self.learning_rate;

            if w.iter().any(|v| !v.is_finite()) {
                bail!("gradient descent diverged at epoch {} (lower learning_rate)", epoch);
            }
            if epoch % report_every == 0 {
                progress((epoch * 100 / self.epochs) as u8);
            }
        }

        let model = LinearModel {
            intercept: y_mean - x_mean.dot(&w),
            weights: w.to_vec(),
        };
        let mut metrics = evaluate(&model, input);
        metrics.insert("epochs".to_string(), self.epochs as f64);

        self.fitted = Some(Fitted {
            model,
            features,
            trained_at,
            metrics: metrics.clone(),
        });
        Ok(metrics)
    }
}

impl ModelStrategy for RidgeRegressionStrategy {
    fn model_type(&self) -> &str {
        Self::MODEL_TYPE
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::BOTH
    }

    fn fit_paths(&mut self, input: &PathInput, progress: ProgressFn<'_>) -> Result<Metrics> {
        let arrays = load_path_input(input)?;
        self.fit(&arrays, Some(input.features.clone()), progress)
    }

    fn fit_arrays(&mut self, input: &ArrayInput, progress: ProgressFn<'_>) -> Result<Metrics> {
        self.fit(input, None, progress)
    }

    fn save(&self, path: &Path) -> Result<()> {
        save_fitted(Self::MODEL_TYPE, self.fitted.as_ref(), &self.config, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{sample_rows, split_rows, SplitConfig};
    use ndarray::array;
    use std::sync::atomic::{AtomicU8, Ordering};
    use tempfile::TempDir;

    fn line_input() -> ArrayInput {
        // y = 2a - b + 1
        let x_train = array![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0], [2.0, 1.0]];
        let y_train = array![1.0, 3.0, 0.0, 2.0, 4.0];
        let x_val = array![[3.0, 2.0]];
        let y_val = array![5.0];
        ArrayInput {
            x_train,
            y_train,
            x_val,
            y_val,
        }
    }

    #[test]
    fn test_solve() {
        let a = array![[2.0, 1.0], [1.0, 3.0]];
        let b = array![3.0, 5.0];
        let x = solve(a, b).unwrap();
        assert!((x[0] - 0.8).abs() < 1e-9);
        assert!((x[1] - 1.4).abs() < 1e-9);
    }

    #[test]
    fn test_solve_singular() {
        let a = array![[1.0, 2.0], [2.0, 4.0]];
        assert!(solve(a, array![1.0, 2.0]).is_err());
    }

    #[test]
    fn test_linear_regression_recovers_coefficients() {
        let mut strategy = LinearRegressionStrategy::new(&JobConfig::new()).unwrap();
        assert_eq!(strategy.capabilities(), Capabilities::ARRAYS);

        let last = AtomicU8::new(0);
        let metrics = strategy
            .fit_arrays(&line_input(), &|p| last.store(p, Ordering::SeqCst))
            .unwrap();

        assert_eq!(last.load(Ordering::SeqCst), 100);
        assert!(metrics["train_mse"] < 1e-12);
        assert!(metrics["val_mse"] < 1e-12);

        let model = &strategy.fitted.as_ref().unwrap().model;
        assert!((model.weights[0] - 2.0).abs() < 1e-9);
        assert!((model.weights[1] + 1.0).abs() < 1e-9);
        assert!((model.intercept - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_linear_regression_rejects_paths() {
        let mut strategy = LinearRegressionStrategy::new(&JobConfig::new()).unwrap();
        let input = PathInput {
            train_path: "a.jsonl".into(),
            validation_path: "b.jsonl".into(),
            target: "target".to_string(),
            features: vec![],
        };
        assert!(strategy.fit_paths(&input, &|_| {}).is_err());
    }

    #[test]
    fn test_ridge_from_paths_and_save() {
        let dir = TempDir::new().unwrap();
        let split = split_rows(sample_rows(200, 3, 9), &SplitConfig::default(), dir.path()).unwrap();
        let input = PathInput {
            train_path: split.train_path,
            validation_path: split.validation_path,
            target: split.target,
            features: split.features,
        };

        let mut strategy = RidgeRegressionStrategy::new(&JobConfig::new()).unwrap();
        let reports = std::sync::Mutex::new(Vec::new());
        let metrics = strategy
            .fit_paths(&input, &|p| reports.lock().unwrap().push(p))
            .unwrap();

        let reports = reports.into_inner().unwrap();
        assert_eq!(reports.len(), 10);
        assert!(reports.windows(2).all(|w| w[0] <= w[1]));
        assert!(metrics["val_r2"] > 0.9, "val_r2 = {}", metrics["val_r2"]);

        let path = dir.path().join("out/model.json");
        strategy.save(&path).unwrap();
        let saved = SavedLinearModel::load(&path).unwrap();
        assert_eq!(saved.model_type, "ridge_regression");
        assert_eq!(saved.features.unwrap().len(), 3);
        assert_eq!(saved.model.weights.len(), 3);
    }

    #[test]
    fn test_save_before_training_fails() {
        let dir = TempDir::new().unwrap();
        let strategy = RidgeRegressionStrategy::new(&JobConfig::new()).unwrap();
        assert!(strategy.save(&dir.path().join("model.json")).is_err());
    }

    #[test]
    fn test_ridge_rejects_bad_config() {
        let cfg = serde_json::json!({"epochs": 0}).as_object().cloned().unwrap();
        assert!(RidgeRegressionStrategy::new(&cfg).is_err());
    }
}
