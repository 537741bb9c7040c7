//! Model Registry - active adapters and their historical accuracy
//!
//! Accuracy scores are maintained by the external model-lifecycle process
//! and injected through `[models.accuracy]`.

use std::sync::Arc;
use tracing::{info, warn};

use super::predictors::{self, Predictor};
use crate::config::ModelsConfig;
use crate::types::RiskType;

/// An adapter paired with its ensemble weight.
#[derive(Clone)]
pub struct RegisteredModel {
    pub predictor: Arc<dyn Predictor>,
    /// Historical accuracy (0.0-1.0)
    pub accuracy: f64,
}

impl std::fmt::Debug for RegisteredModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredModel")
            .field("id", &self.predictor.id())
            .field("accuracy", &self.accuracy)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: Vec<RegisteredModel>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from the enabled built-in adapters.
    ///
    /// Unknown ids are skipped with a warning so a typo cannot take the
    /// whole ensemble down.
    pub fn from_config(config: &ModelsConfig) -> Self {
        let mut registry = Self::new();
        for id in &config.enabled {
            match predictors::builtin(id) {
                Some(predictor) => registry.register(predictor, config.accuracy_for(id)),
                None => warn!(model = %id, "Unknown model id in [models].enabled, skipping"),
            }
        }
        info!(models = ?registry.model_ids(), "Model registry ready");
        registry
    }

    /// Add (or replace) an adapter.
    pub fn register(&mut self, predictor: Arc<dyn Predictor>, accuracy: f64) {
        let accuracy = if accuracy.is_finite() { accuracy.clamp(0.0, 1.0) } else { 0.0 };
        self.models.retain(|m| m.predictor.id() != predictor.id());
        self.models.push(RegisteredModel { predictor, accuracy });
    }

    /// Adapters that produce predictions for `risk`.
    pub fn for_risk(&self, risk: RiskType) -> Vec<RegisteredModel> {
        self.models
            .iter()
            .filter(|m| m.predictor.supports(risk))
            .cloned()
            .collect()
    }

    pub fn model_ids(&self) -> Vec<String> {
        self.models.iter().map(|m| m.predictor.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn from_config_uses_accuracy_map() {
        let config = ModelsConfig {
            enabled: vec!["water-balance".to_string(), "bogus".to_string()],
            accuracy: BTreeMap::from([("water-balance".to_string(), 0.9)]),
            default_accuracy: 0.7,
        };
        let registry = ModelRegistry::from_config(&config);
        assert_eq!(registry.len(), 1);
        let drought = registry.for_risk(RiskType::Drought);
        assert_eq!(drought.len(), 1);
        assert_eq!(drought[0].accuracy, 0.9);
        assert!(registry.for_risk(RiskType::Frost).is_empty());
    }

    #[test]
    fn register_replaces_same_id() {
        let mut registry = ModelRegistry::new();
        registry.register(Arc::new(predictors::WaterBalancePredictor), 0.5);
        registry.register(Arc::new(predictors::WaterBalancePredictor), 1.7);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.for_risk(RiskType::Flood)[0].accuracy, 1.0);
    }
}
