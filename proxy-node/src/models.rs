use crate::config::ModelConfig;
use crate::error::Result;
use tracing::{info, warn};
use trainer_node::{quick_fit, JsonCorpus, QUICK_FIT};
use waf_common::{Canonicalizer, ModelRegistry};

/// Load the detection models the proxy scores against.
///
/// A trainer-written registry wins; otherwise one model per endpoint is
/// quick-fitted from the corpus. With neither configured the registry is
/// empty and every request passes through.
pub fn load_registry(model: &ModelConfig, canonicalizer: &Canonicalizer) -> Result<ModelRegistry> {
    if let Some(path) = &model.registry_path {
        let registry = ModelRegistry::load(path)?;
        info!(path = %path, models = registry.len(), "Loaded model registry");
        return Ok(registry);
    }

    if let Some(path) = &model.corpus_path {
        let corpus = JsonCorpus::from_file(path, canonicalizer)?;
        if corpus.dropped() > 0 {
            warn!(dropped = corpus.dropped(), "Some corpus samples were malformed");
        }
        info!(
            path = %path,
            nu = QUICK_FIT.nu,
            gamma = QUICK_FIT.gamma,
            "Quick-fitting models from corpus"
        );
        return Ok(quick_fit(
            &corpus,
            &model.transformers,
            QUICK_FIT,
            model.train_size,
            model.seed,
        )?);
    }

    warn!("No registry or corpus configured, all traffic will pass through");
    Ok(ModelRegistry::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use waf_common::EndpointSignature;

    fn write_corpus(dir: &TempDir) -> String {
        let samples: Vec<_> = (0..30)
            .map(|i| {
                serde_json::json!({
                    "method": "GET",
                    "url": "/search",
                    "query": format!("q=item{}", i % 5),
                    "label": "normal"
                })
            })
            .collect();
        let path = dir.path().join("corpus.json");
        std::fs::write(&path, serde_json::json!({ "samples": samples }).to_string()).unwrap();
        path.to_str().unwrap().to_string()
    }

    #[test]
    fn test_quick_fit_from_corpus() {
        let dir = TempDir::new().unwrap();
        let model = ModelConfig {
            corpus_path: Some(write_corpus(&dir)),
            ..ModelConfig::default()
        };
        let registry = load_registry(&model, &Canonicalizer::default()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup(&EndpointSignature::new("GET", "/search")).is_some());
    }

    #[test]
    fn test_registry_file_takes_precedence() {
        let dir = TempDir::new().unwrap();
        let corpus_path = write_corpus(&dir);
        let fitted = load_registry(
            &ModelConfig {
                corpus_path: Some(corpus_path.clone()),
                ..ModelConfig::default()
            },
            &Canonicalizer::default(),
        )
        .unwrap();
        let registry_path = dir.path().join("registry.json");
        fitted.save(&registry_path).unwrap();

        let model = ModelConfig {
            registry_path: Some(registry_path.to_str().unwrap().to_string()),
            corpus_path: Some("/nonexistent/corpus.json".to_string()),
            ..ModelConfig::default()
        };
        let loaded = load_registry(&model, &Canonicalizer::default()).unwrap();
        assert_eq!(loaded.signatures(), fitted.signatures());
    }

    #[test]
    fn test_nothing_configured_gives_empty_registry() {
        let registry = load_registry(&ModelConfig::default(), &Canonicalizer::default()).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_missing_registry_file_is_error() {
        let model = ModelConfig {
            registry_path: Some("/nonexistent/registry.json".to_string()),
            ..ModelConfig::default()
        };
        assert!(load_registry(&model, &Canonicalizer::default()).is_err());
    }
}
