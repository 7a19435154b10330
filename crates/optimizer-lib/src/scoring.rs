//! Scoring engines
//!
//! A scoring engine turns a feature vector into scores. Strategies that
//! delegate part of their decision (for example to a trained model) look an
//! engine up by name in the [`ScoringRegistry`].

use crate::error::{OptimizerError, Result};
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

#[async_trait]
pub trait ScoringEngine: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Free-form JSON describing the expected features and returned scores
    fn metainfo(&self) -> String;

    async fn calculate_score(&self, features: &[f64]) -> Result<Vec<f64>>;
}

/// Number of features [`DummyScorer`] expects
pub const DUMMY_SCORER_FEATURES: usize = 9;

/// Threshold scorer used for testing the scoring pipeline
///
/// Features are `[avg_cpu, max_cpu, avg_ram, max_ram, avg_disk, max_disk,
/// instance_count, node_count, migrations]`. The result holds a single
/// class: `0` (underloaded), `1` (balanced) or `2` (overloaded).
pub struct DummyScorer;

impl DummyScorer {
    pub const NAME: &'static str = "dummy_scorer";
}

#[async_trait]
impl ScoringEngine for DummyScorer {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Dummy Scorer calculating the load class from simple thresholds"
    }

    fn metainfo(&self) -> String {
        json!({
            "feature_columns": [
                "avg_cpu", "max_cpu", "avg_ram", "max_ram", "avg_disk",
                "max_disk", "instance_count", "node_count", "migrations"
            ],
            "result_columns": ["load_class"],
            "workloads": ["underloaded", "balanced", "overloaded"],
        })
        .to_string()
    }

    async fn calculate_score(&self, features: &[f64]) -> Result<Vec<f64>> {
        if features.len() != DUMMY_SCORER_FEATURES {
            return Err(OptimizerError::invalid(format!(
                "{} expects {} features, got {}",
                Self::NAME,
                DUMMY_SCORER_FEATURES,
                features.len()
            )));
        }
        let (avg_cpu, max_cpu, avg_ram) = (features[0], features[1], features[2]);
        let class = if max_cpu > 80.0 || avg_ram > 80.0 {
            2.0
        } else if avg_cpu < 20.0 && avg_ram < 20.0 {
            0.0
        } else {
            1.0
        };
        Ok(vec![class])
    }
}

/// Name -> scoring engine lookup
#[derive(Clone, Default)]
pub struct ScoringRegistry {
    engines: BTreeMap<&'static str, Arc<dyn ScoringEngine>>,
}

impl ScoringRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(DummyScorer));
        registry
    }

    pub fn register(&mut self, engine: Arc<dyn ScoringEngine>) {
        self.engines.insert(engine.name(), engine);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ScoringEngine>> {
        self.engines
            .get(name)
            .cloned()
            .ok_or_else(|| OptimizerError::invalid(format!("unknown scoring engine '{}'", name)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ScoringEngine>> {
        self.engines.values()
    }
}
