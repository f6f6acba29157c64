use crate::evaluation::EvaluationResult;
use crate::selector::SelectionOutcome;
use crate::split::TrainSize;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use waf_common::{ModelRegistry, Result};

/// Selection summary of one endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointReport {
    pub signature: String,
    /// Whether the registry holds a model for this endpoint
    pub covered: bool,
    pub best: EvaluationResult,
    pub evaluations: Vec<EvaluationResult>,
}

/// Per-signature record of a training run, written next to the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionReport {
    pub generated_at: DateTime<Utc>,
    pub seed: u64,
    pub train_size: TrainSize,
    pub endpoints: Vec<EndpointReport>,
}

impl SelectionReport {
    pub fn new(outcomes: &[SelectionOutcome], registry: &ModelRegistry, seed: u64, train_size: TrainSize) -> Self {
        let endpoints = outcomes
            .iter()
            .map(|outcome| EndpointReport {
                signature: outcome.signature().to_string(),
                covered: registry.lookup(outcome.signature()).is_some(),
                best: outcome.best.clone(),
                evaluations: outcome.evaluations.clone(),
            })
            .collect();
        Self {
            generated_at: Utc::now(),
            seed,
            train_size,
            endpoints,
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
