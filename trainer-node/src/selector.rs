//! Grid search over one-class scorer hyperparameters, per endpoint

use crate::cache::{EvaluationMemo, FeatureCache, MemoKey};
use crate::corpus::CorpusProvider;
use crate::evaluation::{evaluate, Evaluated, EvaluationResult};
use crate::split::TrainSize;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use waf_common::{
    EndpointSignature, Hyperparameters, ModelRegistry, Result, TrainedModel, TransformerSpec, WafError,
};

/// Seed for splits and scorer initialization unless configured otherwise
pub const DEFAULT_SEED: u64 = 2;

/// Hyperparameters of the single-fit path
pub const QUICK_FIT: Hyperparameters = Hyperparameters::new(0.01, 0.01);

const DEFAULT_AXIS: [f64; 4] = [0.1, 0.01, 0.001, 0.0001];

/// `nu × gamma` search grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub nu: Vec<f64>,
    pub gamma: Vec<f64>,
}

impl Default for Grid {
    fn default() -> Self {
        Self {
            nu: DEFAULT_AXIS.to_vec(),
            gamma: DEFAULT_AXIS.to_vec(),
        }
    }
}

impl Grid {
    /// Combinations in grid order: `nu` outer, `gamma` inner
    pub fn combinations(&self) -> Vec<Hyperparameters> {
        self.nu
            .iter()
            .flat_map(|&nu| self.gamma.iter().map(move |&gamma| Hyperparameters::new(nu, gamma)))
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.nu.is_empty() || self.gamma.is_empty() {
            return Err(WafError::Config("search grid axes cannot be empty".to_string()));
        }
        for hp in self.combinations() {
            hp.validate()?;
        }
        Ok(())
    }
}

/// Winning model of one endpoint plus every evaluation that was considered
#[derive(Debug, Clone)]
pub struct SelectionOutcome {
    pub best: EvaluationResult,
    pub evaluations: Vec<EvaluationResult>,
    pub model: TrainedModel,
}

impl SelectionOutcome {
    pub fn signature(&self) -> &EndpointSignature {
        &self.best.signature
    }
}

/// Picks the best grid combination for each endpoint of a feature cache
pub struct Selector {
    cache: Arc<FeatureCache>,
    memo: Arc<EvaluationMemo>,
    grid: Grid,
}

impl Selector {
    pub fn new(cache: Arc<FeatureCache>, memo: Arc<EvaluationMemo>, grid: Grid) -> Result<Self> {
        grid.validate()?;
        Ok(Self { cache, memo, grid })
    }

    pub fn memo(&self) -> &EvaluationMemo {
        &self.memo
    }

    /// Evaluate every combination for `signature` and keep the best one.
    ///
    /// Higher f-score wins, then higher TPR; remaining ties keep the earliest
    /// combination in grid order.
    pub fn select(&self, signature: &EndpointSignature) -> Result<SelectionOutcome> {
        let prepared = self
            .cache
            .get(signature)
            .ok_or_else(|| WafError::Corpus(format!("no prepared features for {signature}")))?;
        let seed = self.cache.seed();
        let train_size = self.cache.train_size();

        let mut evaluations = Vec::new();
        let mut best: Option<Arc<Evaluated>> = None;
        for hp in self.grid.combinations() {
            let key = MemoKey::new(&prepared, hp, seed, train_size);
            let evaluated = self
                .memo
                .get_or_evaluate(key, || evaluate(&prepared, hp, seed))?;
            evaluations.push(evaluated.result.clone());

            let replace = match &best {
                None => true,
                Some(current) => evaluated.result.is_better_than(&current.result),
            };
            if replace {
                best = Some(evaluated);
            }
        }

        let best = best.ok_or_else(|| WafError::Config("search grid is empty".to_string()))?;
        let model = TrainedModel::new(
            signature.clone(),
            prepared.pipeline.clone(),
            best.scorer.clone(),
        )?;
        info!(signature = %signature, best = %best.result, "Selected hyperparameters");

        Ok(SelectionOutcome {
            best: best.result.clone(),
            evaluations,
            model,
        })
    }

    /// Run [`Selector::select`] for every cached endpoint in parallel on the
    /// blocking pool. Outcomes are returned in signature order.
    pub async fn select_all(self: Arc<Self>) -> Result<Vec<SelectionOutcome>> {
        let tasks = self.cache.signatures().into_iter().map(|signature| {
            let selector = Arc::clone(&self);
            tokio::task::spawn_blocking(move || selector.select(&signature))
        });

        let mut outcomes = Vec::new();
        for joined in join_all(tasks).await {
            let outcome = joined
                .map_err(|e| WafError::InvalidState(format!("selection task failed: {e}")))??;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

/// Registry of the selected models. Endpoints without training samples are
/// left uncovered so the proxy passes their traffic through.
pub fn build_registry(outcomes: &[SelectionOutcome]) -> ModelRegistry {
    let models = outcomes.iter().filter_map(|outcome| {
        if outcome.best.train_normal == 0 {
            warn!(signature = %outcome.signature(), "No training samples, endpoint left uncovered");
            None
        } else {
            Some(outcome.model.clone())
        }
    });
    let registry = ModelRegistry::from_models(models);
    info!(models = registry.len(), "Built model registry");
    registry
}

/// Fit one scorer per endpoint with fixed hyperparameters, skipping the search
pub fn quick_fit(
    provider: &dyn CorpusProvider,
    specs: &[TransformerSpec],
    hyperparameters: Hyperparameters,
    train_size: TrainSize,
    seed: u64,
) -> Result<ModelRegistry> {
    let cache = FeatureCache::build(provider, specs, train_size, seed);
    let mut outcomes = Vec::new();
    for signature in cache.signatures() {
        let Some(prepared) = cache.get(&signature) else {
            continue;
        };
        let evaluated = evaluate(&prepared, hyperparameters, seed)?;
        let model = TrainedModel::new(signature, prepared.pipeline.clone(), evaluated.scorer)?;
        outcomes.push(SelectionOutcome {
            best: evaluated.result.clone(),
            evaluations: vec![evaluated.result],
            model,
        });
    }
    Ok(build_registry(&outcomes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::InMemoryCorpus;
    use waf_common::{Canonicalizer, Label};

    fn corpus() -> InMemoryCorpus {
        let c = Canonicalizer::default();
        let mut corpus: InMemoryCorpus = (0..60)
            .map(|i| c.request("GET", "/a", "", &format!("q=v{}", i % 6), ""))
            .collect();
        for i in 0..5 {
            corpus.push(
                c.request("GET", "/a", "", &format!("q={}", "%27%20OR%201=1--".repeat(i + 3)), "")
                    .with_label(Label::Anomalous, Some("sqli".to_string())),
            );
        }
        corpus
    }

    fn selector(train_size: TrainSize) -> Selector {
        let cache = FeatureCache::build(&corpus(), &TransformerSpec::default_table(), train_size, DEFAULT_SEED);
        Selector::new(Arc::new(cache), Arc::new(EvaluationMemo::new()), Grid::default()).unwrap()
    }

    #[test]
    fn test_grid_order() {
        let combos = Grid::default().combinations();
        assert_eq!(combos.len(), 16);
        assert_eq!(combos[0], Hyperparameters::new(0.1, 0.1));
        assert_eq!(combos[1], Hyperparameters::new(0.1, 0.01));
        assert_eq!(combos[4], Hyperparameters::new(0.01, 0.1));
        assert_eq!(combos[15], Hyperparameters::new(0.0001, 0.0001));
    }

    #[test]
    fn test_invalid_grid_rejected() {
        let grid = Grid {
            nu: vec![],
            gamma: vec![0.1],
        };
        assert!(grid.validate().is_err());
        let grid = Grid {
            nu: vec![1.5],
            gamma: vec![0.1],
        };
        assert!(grid.validate().is_err());
    }

    #[test]
    fn test_best_is_maximal() {
        let selector = selector(TrainSize::Count(40));
        let outcome = selector.select(&EndpointSignature::new("GET", "/a")).unwrap();
        assert_eq!(outcome.evaluations.len(), 16);
        for other in &outcome.evaluations {
            assert!(!other.is_better_than(&outcome.best));
        }
        let first_best = outcome
            .evaluations
            .iter()
            .position(|r| r.f_score == outcome.best.f_score && r.tpr == outcome.best.tpr)
            .unwrap();
        assert_eq!(outcome.evaluations[first_best], outcome.best);
        assert_eq!(outcome.model.hyperparameters(), outcome.best.hyperparameters);
    }

    #[test]
    fn test_selection_is_deterministic() {
        let sig = EndpointSignature::new("GET", "/a");
        let a = selector(TrainSize::Count(40)).select(&sig).unwrap();
        let b = selector(TrainSize::Count(40)).select(&sig).unwrap();
        assert_eq!(a.best, b.best);
        assert_eq!(a.evaluations, b.evaluations);
    }

    #[test]
    fn test_unknown_signature() {
        assert!(selector(TrainSize::Count(40))
            .select(&EndpointSignature::new("GET", "/missing"))
            .is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_select_all_memoizes() {
        let selector = Arc::new(selector(TrainSize::Count(40)));
        let first = Arc::clone(&selector).select_all().await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(selector.memo().len(), 16);

        let again = selector.select(&EndpointSignature::new("GET", "/a")).unwrap();
        assert_eq!(selector.memo().hits(), 16);
        assert_eq!(again.best, first[0].best);
    }

    #[test]
    fn test_quick_fit_and_uncovered_endpoints() {
        let c = Canonicalizer::default();
        let mut corpus = corpus();
        corpus.push(
            c.request("POST", "/only-attacks", "", "", "x=<script>")
                .with_label(Label::Anomalous, None),
        );
        let registry = quick_fit(
            &corpus,
            &TransformerSpec::default_table(),
            QUICK_FIT,
            TrainSize::Count(500),
            DEFAULT_SEED,
        )
        .unwrap();
        assert_eq!(registry.len(), 1);
        let model = registry.lookup(&EndpointSignature::new("GET", "/a")).unwrap();
        assert_eq!(model.hyperparameters(), QUICK_FIT);
        assert!(registry
            .lookup(&EndpointSignature::new("POST", "/only-attacks"))
            .is_none());
    }
}
