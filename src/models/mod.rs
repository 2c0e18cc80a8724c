// Model strategies
// Strategy trait, registry, execution adapter and the built-in linear models

pub mod adapter;
pub mod linear;
pub mod metrics;
pub mod registry;
pub mod strategy;

pub use adapter::{CallShape, TrainCall};
pub use linear::{LinearModel, LinearRegressionStrategy, RidgeRegressionStrategy, SavedLinearModel};
pub use registry::{register_builtin_strategies, ModelRegistry, RegistryBuilder, StrategyConstructor};
pub use strategy::{ArrayInput, Capabilities, ModelStrategy, PathInput, ProgressFn};
