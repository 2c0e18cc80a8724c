// Model strategy trait
//
// A strategy is one pluggable training implementation for a model family.
// Each strategy declares which call shapes it accepts; the execution adapter
// picks one and invokes it.

use anyhow::Result;
use ndarray::{Array1, Array2};
use std::path::{Path, PathBuf};

use crate::jobs::Metrics;

/// Callback a strategy uses to report training progress (0-100 within the
/// training stage)
pub type ProgressFn<'a> = &'a (dyn Fn(u8) + Send + Sync);

/// Call shapes a strategy accepts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// `fit_paths`: train/validation files plus target and feature names
    pub path_based: bool,
    /// `fit_arrays`: four in-memory arrays
    pub array_based: bool,
}

impl Capabilities {
    pub const PATHS: Self = Self {
        path_based: true,
        array_based: false,
    };

    pub const ARRAYS: Self = Self {
        path_based: false,
        array_based: true,
    };

    pub const BOTH: Self = Self {
        path_based: true,
        array_based: true,
    };
}

/// Input for path-based training
#[derive(Debug, Clone)]
pub struct PathInput {
    pub train_path: PathBuf,
    pub validation_path: PathBuf,
    pub target: String,
    pub features: Vec<String>,
}

/// Input for array-based training
#[derive(Debug, Clone)]
pub struct ArrayInput {
    pub x_train: Array2<f64>,
    pub y_train: Array1<f64>,
    pub x_val: Array2<f64>,
    pub y_val: Array1<f64>,
}

/// Training implementation for one model family
pub trait ModelStrategy: Send {
    /// Registered type identifier (e.g. "linear_regression")
    fn model_type(&self) -> &str;

    /// Call shapes this strategy implements
    fn capabilities(&self) -> Capabilities;

    /// Train from files on disk
    fn fit_paths(&mut self, input: &PathInput, progress: ProgressFn<'_>) -> Result<Metrics> {
        let _ = (input, progress);
        anyhow::bail!("{} does not accept path-based input", self.model_type())
    }

    /// Train from in-memory arrays
    fn fit_arrays(&mut self, input: &ArrayInput, progress: ProgressFn<'_>) -> Result<Metrics> {
        let _ = (input, progress);
        anyhow::bail!("{} does not accept array-based input", self.model_type())
    }

    /// Persist the trained model to `path`
    fn save(&self, path: &Path) -> Result<()>;
}
