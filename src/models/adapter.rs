// Execution adapter
//
// Picks a call shape from the capabilities a strategy declares and invokes
// it, so the orchestrator never depends on a particular training signature.
// Path-based input wins over array-based input when both are accepted.

use super::strategy::{ArrayInput, Capabilities, ModelStrategy, PathInput, ProgressFn};
use crate::data::{table, DatasetSplit};
use crate::errors::ExecutionError;
use crate::jobs::Metrics;

/// Call shapes the adapter knows how to build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallShape {
    PathBased,
    ArrayBased,
}

impl CallShape {
    /// Preferred shape for the declared capabilities
    pub fn select(capabilities: Capabilities) -> Option<Self> {
        if capabilities.path_based {
            Some(CallShape::PathBased)
        } else if capabilities.array_based {
            Some(CallShape::ArrayBased)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallShape::PathBased => "path-based",
            CallShape::ArrayBased => "array-based",
        }
    }
}

/// A fully built training call
#[derive(Debug, Clone)]
pub enum TrainCall {
    PathBased(PathInput),
    ArrayBased(ArrayInput),
}

impl TrainCall {
    /// Build the call for `shape` from a materialized split
    pub fn build(shape: CallShape, split: &DatasetSplit) -> Result<Self, ExecutionError> {
        match shape {
            CallShape::PathBased => Ok(TrainCall::PathBased(PathInput {
                train_path: split.train_path.clone(),
                validation_path: split.validation_path.clone(),
                target: split.target.clone(),
                features: split.features.clone(),
            })),
            CallShape::ArrayBased => {
                let (x_train, y_train) =
                    table::read_arrays(&split.train_path, &split.target, &split.features)
                        .map_err(ExecutionError::Data)?;
                let (x_val, y_val) =
                    table::read_arrays(&split.validation_path, &split.target, &split.features)
                        .map_err(ExecutionError::Data)?;
                Ok(TrainCall::ArrayBased(ArrayInput {
                    x_train,
                    y_train,
                    x_val,
                    y_val,
                }))
            }
        }
    }

    pub fn shape(&self) -> CallShape {
        match self {
            TrainCall::PathBased(_) => CallShape::PathBased,
            TrainCall::ArrayBased(_) => CallShape::ArrayBased,
        }
    }
}

/// Invoke a strategy with a prepared call
pub fn invoke(
    strategy: &mut dyn ModelStrategy,
    call: &TrainCall,
    progress: ProgressFn<'_>,
) -> Result<Metrics, ExecutionError> {
    let metrics = match call {
        TrainCall::PathBased(input) => strategy.fit_paths(input, progress),
        TrainCall::ArrayBased(input) => strategy.fit_arrays(input, progress),
    }
    .map_err(ExecutionError::Training)?;

    if metrics.is_empty() {
        return Err(ExecutionError::EmptyMetrics(strategy.model_type().to_string()));
    }
    Ok(metrics)
}

/// Negotiate the call shape, build the call and run training
pub fn train(
    strategy: &mut dyn ModelStrategy,
    split: &DatasetSplit,
    progress: ProgressFn<'_>,
) -> Result<Metrics, ExecutionError> {
    let shape = CallShape::select(strategy.capabilities()).ok_or_else(|| {
        ExecutionError::UnsupportedStrategyInterface(strategy.model_type().to_string())
    })?;

    tracing::debug!(
        model_type = %strategy.model_type(),
        shape = shape.as_str(),
        "Invoking strategy"
    );
    let call = TrainCall::build(shape, split)?;
    invoke(strategy, &call, progress)
}
