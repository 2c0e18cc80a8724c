// Model strategy registry
//
// Maps a model type identifier to a strategy constructor. Registration goes
// through `RegistryBuilder`; `build()` freezes the set, so every registration
// happens before the registry can be read and lookups need no locking.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;

use super::linear::{LinearRegressionStrategy, RidgeRegressionStrategy};
use super::strategy::ModelStrategy;
use crate::errors::RegistryError;
use crate::jobs::JobConfig;

/// Builds a fresh strategy instance from a job config
pub type StrategyConstructor =
    Arc<dyn Fn(&JobConfig) -> Result<Box<dyn ModelStrategy>> + Send + Sync>;

/// Mutable registration phase
pub struct RegistryBuilder {
    constructors: HashMap<String, StrategyConstructor>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Register a constructor under `type_id`, replacing any previous one
    pub fn register<F>(&mut self, type_id: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(&JobConfig) -> Result<Box<dyn ModelStrategy>> + Send + Sync + 'static,
    {
        let type_id = type_id.into();
        if self
            .constructors
            .insert(type_id.clone(), Arc::new(constructor))
            .is_some()
        {
            tracing::warn!(model_type = %type_id, "Replaced existing strategy registration");
        }
        self
    }

    /// Freeze the registrations
    pub fn build(self) -> ModelRegistry {
        tracing::debug!(count = self.constructors.len(), "Model registry initialized");
        ModelRegistry {
            constructors: self.constructors,
        }
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Register the strategies shipped with the crate, in a fixed order
pub fn register_builtin_strategies(builder: &mut RegistryBuilder) {
    builder
        .register(LinearRegressionStrategy::MODEL_TYPE, |cfg| {
            Ok(Box::new(LinearRegressionStrategy::new(cfg)?))
        })
        .register(RidgeRegressionStrategy::MODEL_TYPE, |cfg| {
            Ok(Box::new(RidgeRegressionStrategy::new(cfg)?))
        });
}

/// Read-only registry of model strategies
pub struct ModelRegistry {
    constructors: HashMap<String, StrategyConstructor>,
}

impl ModelRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Registry holding only the built-in strategies
    pub fn builtin() -> Self {
        let mut builder = RegistryBuilder::new();
        register_builtin_strategies(&mut builder);
        builder.build()
    }

    /// Construct a strategy instance for `type_id`
    pub fn get(&self, type_id: &str, config: &JobConfig) -> Result<Box<dyn ModelStrategy>, RegistryError> {
        let constructor = self
            .constructors
            .get(type_id)
            .ok_or_else(|| RegistryError::UnknownModelType(type_id.to_string()))?;

        constructor(config).map_err(|source| RegistryError::Construction {
            model_type: type_id.to_string(),
            source,
        })
    }

    /// Registered type identifiers, sorted
    pub fn list_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.constructors.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn is_registered(&self, type_id: &str) -> bool {
        self.constructors.contains_key(type_id)
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::Metrics;
    use crate::models::{Capabilities, ProgressFn};
    use std::path::Path;

    struct MockStrategy;

    impl ModelStrategy for MockStrategy {
        fn model_type(&self) -> &str {
            "mock"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::default()
        }

        fn save(&self, _path: &Path) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_builtin_types() {
        let registry = ModelRegistry::builtin();
        assert_eq!(
            registry.list_types(),
            vec!["linear_regression".to_string(), "ridge_regression".to_string()]
        );
        assert!(registry.is_registered("linear_regression"));
        assert!(!registry.is_registered("nonexistent"));
    }

    #[test]
    fn test_get_constructs_instance() {
        let registry = ModelRegistry::builtin();
        let strategy = registry.get("ridge_regression", &JobConfig::new()).unwrap();
        assert_eq!(strategy.model_type(), "ridge_regression");
    }

    #[test]
    fn test_unknown_type() {
        let registry = ModelRegistry::builtin();
        let err = registry.get("nonexistent", &JobConfig::new()).err().unwrap();
        assert!(matches!(err, RegistryError::UnknownModelType(t) if t == "nonexistent"));
    }

    #[test]
    fn test_constructor_errors_are_wrapped() {
        let registry = ModelRegistry::builtin();
        let cfg = serde_json::json!({"learning_rate": -1.0})
            .as_object()
            .cloned()
            .unwrap();
        let err = registry.get("ridge_regression", &cfg).err().unwrap();
        assert!(matches!(err, RegistryError::Construction { .. }));
    }

    #[test]
    fn test_custom_registration_replaces() {
        let mut builder = ModelRegistry::builder();
        register_builtin_strategies(&mut builder);
        builder.register("linear_regression", |_| Ok(Box::new(MockStrategy)));
        let registry = builder.build();

        assert_eq!(registry.len(), 2);
        let strategy = registry.get("linear_regression", &JobConfig::new()).unwrap();
        assert_eq!(strategy.model_type(), "mock");

        // default trait methods refuse both shapes
        let mut strategy = strategy;
        let noop: ProgressFn<'_> = &|_| {};
        let fit: Result<Metrics> = strategy.fit_arrays(
            &crate::models::ArrayInput {
                x_train: ndarray::Array2::zeros((1, 1)),
                y_train: ndarray::Array1::zeros(1),
                x_val: ndarray::Array2::zeros((1, 1)),
                y_val: ndarray::Array1::zeros(1),
            },
            noop,
        );
        assert!(fit.is_err());
    }
}
