use crate::error::{Result, WafError};
use crate::features::{FeaturePipeline, FeatureVector};
use crate::request::{EndpointSignature, Label, Request};
use crate::scorer::{Hyperparameters, OneClassSvm};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::info;

/// Outcome of scoring one request against its endpoint model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    pub decision: f64,
    pub label: Label,
}

impl Score {
    pub fn is_anomalous(&self) -> bool {
        self.label == Label::Anomalous
    }
}

/// Fitted pipeline and scorer for one endpoint signature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedModel {
    signature: EndpointSignature,
    pipeline: FeaturePipeline,
    scorer: OneClassSvm,
}

impl TrainedModel {
    pub fn new(signature: EndpointSignature, pipeline: FeaturePipeline, scorer: OneClassSvm) -> Result<Self> {
        if pipeline.feature_count() != scorer.feature_count() {
            return Err(WafError::Model(format!(
                "{signature}: pipeline yields {} features but scorer expects {}",
                pipeline.feature_count(),
                scorer.feature_count()
            )));
        }
        Ok(Self {
            signature,
            pipeline,
            scorer,
        })
    }

    pub fn signature(&self) -> &EndpointSignature {
        &self.signature
    }

    pub fn pipeline(&self) -> &FeaturePipeline {
        &self.pipeline
    }

    pub fn scorer(&self) -> &OneClassSvm {
        &self.scorer
    }

    pub fn hyperparameters(&self) -> Hyperparameters {
        self.scorer.hyperparameters()
    }

    pub fn feature_count(&self) -> usize {
        self.scorer.feature_count()
    }

    pub fn features(&self, request: &Request) -> FeatureVector {
        self.pipeline.transform(request)
    }

    pub fn score(&self, request: &Request) -> Result<Score> {
        self.score_features(&self.features(request))
    }

    /// Score a vector already produced by this model's pipeline
    pub fn score_features(&self, features: &FeatureVector) -> Result<Score> {
        let decision = self.scorer.decision(features.values())?;
        Ok(Score {
            decision,
            label: crate::scorer::label_for(decision),
        })
    }
}

/// Read-only map from endpoint signature to its trained model.
///
/// Built once before traffic is served and shared behind an `Arc`; there is no
/// mutation API, so concurrent lookups need no locking.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<TrainedModel>", into = "Vec<TrainedModel>")]
pub struct ModelRegistry {
    models: HashMap<EndpointSignature, TrainedModel>,
}

impl From<Vec<TrainedModel>> for ModelRegistry {
    fn from(models: Vec<TrainedModel>) -> Self {
        Self::from_models(models)
    }
}

impl From<ModelRegistry> for Vec<TrainedModel> {
    fn from(registry: ModelRegistry) -> Self {
        let mut models: Vec<TrainedModel> = registry.models.into_values().collect();
        models.sort_by(|a, b| a.signature.cmp(&b.signature));
        models
    }
}

impl ModelRegistry {
    /// Later models replace earlier ones with the same signature
    pub fn from_models(models: impl IntoIterator<Item = TrainedModel>) -> Self {
        let models = models
            .into_iter()
            .map(|m| (m.signature.clone(), m))
            .collect();
        Self { models }
    }

    /// `None` means the endpoint has no coverage
    pub fn lookup(&self, signature: &EndpointSignature) -> Option<&TrainedModel> {
        self.models.get(signature)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Covered signatures in sorted order
    pub fn signatures(&self) -> Vec<&EndpointSignature> {
        let mut signatures: Vec<_> = self.models.keys().collect();
        signatures.sort();
        signatures
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let registry: ModelRegistry = serde_json::from_str(&content)?;
        info!(
            path = %path.as_ref().display(),
            models = registry.len(),
            "Loaded model registry"
        );
        Ok(registry)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string(self)?;
        fs::write(path.as_ref(), content)?;
        info!(
            path = %path.as_ref().display(),
            models = self.len(),
            "Saved model registry"
        );
        Ok(())
    }
}
