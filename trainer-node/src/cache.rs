use crate::corpus::CorpusProvider;
use crate::evaluation::Evaluated;
use crate::split::{split, TrainSize};
use dashmap::DashMap;
use ndarray::Array2;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use waf_common::{EndpointSignature, FeaturePipeline, Hyperparameters, Result, TransformerSpec};

/// Split, fitted pipeline and feature matrices of one endpoint
#[derive(Debug)]
pub struct PreparedEndpoint {
    pub signature: EndpointSignature,
    /// Fingerprint of the corpus samples the matrices were built from
    pub fingerprint: String,
    pub pipeline: FeaturePipeline,
    pub train: Array2<f64>,
    pub test_normal: Array2<f64>,
    pub test_anomalous: Array2<f64>,
}

/// Feature matrices for every endpoint, built once before selection starts
#[derive(Debug)]
pub struct FeatureCache {
    endpoints: BTreeMap<EndpointSignature, Arc<PreparedEndpoint>>,
    train_size: TrainSize,
    seed: u64,
}

impl FeatureCache {
    /// Split every endpoint of `provider`, fit its pipeline on the training
    /// normals and transform all three splits
    pub fn build(
        provider: &dyn CorpusProvider,
        specs: &[TransformerSpec],
        train_size: TrainSize,
        seed: u64,
    ) -> Self {
        let mut endpoints = BTreeMap::new();
        for signature in provider.signatures() {
            let samples = provider.get(&signature);
            let fingerprint = samples.fingerprint();
            let parts = split(&samples, train_size, seed);
            let pipeline = FeaturePipeline::fitted(specs, &parts.train_normal);

            let prepared = PreparedEndpoint {
                train: pipeline.transform_batch(&parts.train_normal),
                test_normal: pipeline.transform_batch(&parts.test_normal),
                test_anomalous: pipeline.transform_batch(&parts.test_anomalous),
                signature: signature.clone(),
                fingerprint,
                pipeline,
            };
            debug!(
                signature = %signature,
                train = prepared.train.nrows(),
                test_normal = prepared.test_normal.nrows(),
                test_anomalous = prepared.test_anomalous.nrows(),
                features = prepared.pipeline.feature_count(),
                "Prepared endpoint features"
            );
            endpoints.insert(signature, Arc::new(prepared));
        }
        info!(endpoints = endpoints.len(), %train_size, seed, "Feature cache built");
        Self {
            endpoints,
            train_size,
            seed,
        }
    }

    pub fn get(&self, signature: &EndpointSignature) -> Option<Arc<PreparedEndpoint>> {
        self.endpoints.get(signature).cloned()
    }

    pub fn signatures(&self) -> Vec<EndpointSignature> {
        self.endpoints.keys().cloned().collect()
    }

    pub fn train_size(&self) -> TrainSize {
        self.train_size
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoKey {
    signature: EndpointSignature,
    nu_bits: u64,
    gamma_bits: u64,
    seed: u64,
    train_size: (u8, u64),
    fingerprint: String,
}

impl MemoKey {
    pub fn new(
        prepared: &PreparedEndpoint,
        hyperparameters: Hyperparameters,
        seed: u64,
        train_size: TrainSize,
    ) -> Self {
        Self {
            signature: prepared.signature.clone(),
            nu_bits: hyperparameters.nu.to_bits(),
            gamma_bits: hyperparameters.gamma.to_bits(),
            seed,
            train_size: train_size.key(),
            fingerprint: prepared.fingerprint.clone(),
        }
    }

    /// Stable file name for this key
    pub fn digest(&self) -> String {
        let signature = self.signature.to_string();
        let mut hasher = Sha256::new();
        hasher.update((signature.len() as u64).to_le_bytes());
        hasher.update(signature.as_bytes());
        hasher.update(self.nu_bits.to_le_bytes());
        hasher.update(self.gamma_bits.to_le_bytes());
        hasher.update(self.seed.to_le_bytes());
        hasher.update([self.train_size.0]);
        hasher.update(self.train_size.1.to_le_bytes());
        hasher.update(self.fingerprint.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Evaluations keyed by (signature, hyperparameters, seed, train size, corpus fingerprint).
///
/// With a cache directory every evaluation is also written as
/// `<digest>.json`, so repeated runs over the same corpus skip fitting.
#[derive(Debug, Default)]
pub struct EvaluationMemo {
    entries: DashMap<MemoKey, Arc<Evaluated>>,
    dir: Option<PathBuf>,
    hits: AtomicU64,
}

impl EvaluationMemo {
    /// Memo that lives only as long as this process
    pub fn new() -> Self {
        Self::default()
    }

    /// Memo backed by `dir`, created if missing
    pub fn persistent<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        info!(dir = %dir.display(), "Evaluation cache enabled");
        Ok(Self {
            dir: Some(dir),
            ..Self::default()
        })
    }

    /// Cached evaluation for `key`, computing and storing it on a miss.
    /// No lock is held while `evaluate` runs.
    pub fn get_or_evaluate<F>(&self, key: MemoKey, evaluate: F) -> Result<Arc<Evaluated>>
    where
        F: FnOnce() -> Result<Evaluated>,
    {
        if let Some(hit) = self.entries.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(hit.value()));
        }
        if let Some(stored) = self.load(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            let stored = self.entries.entry(key).or_insert(Arc::new(stored));
            return Ok(Arc::clone(stored.value()));
        }

        let evaluated = Arc::new(evaluate()?);
        self.store(&key, &evaluated);
        let stored = self.entries.entry(key).or_insert(evaluated);
        Ok(Arc::clone(stored.value()))
    }

    fn path_for(&self, key: &MemoKey) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", key.digest())))
    }

    /// Unreadable entries count as misses
    fn load(&self, key: &MemoKey) -> Option<Evaluated> {
        let path = self.path_for(key)?;
        let content = fs::read(&path).ok()?;
        match serde_json::from_slice(&content) {
            Ok(evaluated) => {
                debug!(path = %path.display(), "Loaded cached evaluation");
                Some(evaluated)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable cached evaluation");
                None
            }
        }
    }

    /// Write failures only cost a recomputation on the next run
    fn store(&self, key: &MemoKey, evaluated: &Evaluated) {
        let Some(path) = self.path_for(key) else {
            return;
        };
        let written = serde_json::to_vec(evaluated)
            .map_err(|e| e.to_string())
            .and_then(|json| fs::write(&path, json).map_err(|e| e.to_string()));
        if let Err(e) = written {
            warn!(path = %path.display(), error = %e, "Failed to cache evaluation");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::InMemoryCorpus;
    use crate::evaluation::evaluate;
    use tempfile::TempDir;
    use waf_common::Canonicalizer;

    fn corpus() -> InMemoryCorpus {
        let c = Canonicalizer::default();
        (0..30)
            .map(|i| c.request("GET", "/a", "", &format!("q=v{}", i % 5), ""))
            .collect()
    }

    #[test]
    fn test_build_uses_training_normals_only() {
        let cache = FeatureCache::build(&corpus(), &TransformerSpec::default_table(), TrainSize::Count(20), 2);
        let prepared = cache.get(&EndpointSignature::new("GET", "/a")).unwrap();
        assert_eq!(prepared.train.nrows(), 20);
        assert_eq!(prepared.test_normal.nrows(), 10);
        assert_eq!(prepared.test_anomalous.nrows(), 0);
        assert_eq!(prepared.train.ncols(), prepared.pipeline.feature_count());
        assert!(cache.get(&EndpointSignature::new("GET", "/b")).is_none());
    }

    #[test]
    fn test_memo_reuses_evaluations() {
        let cache = FeatureCache::build(&corpus(), &TransformerSpec::default_table(), TrainSize::Count(20), 2);
        let prepared = cache.get(&EndpointSignature::new("GET", "/a")).unwrap();
        let memo = EvaluationMemo::new();
        let hp = Hyperparameters::new(0.1, 0.1);

        let key = MemoKey::new(&prepared, hp, 2, cache.train_size());
        let first = memo.get_or_evaluate(key.clone(), || evaluate(&prepared, hp, 2)).unwrap();
        let second = memo
            .get_or_evaluate(key, || panic!("memoized evaluation recomputed"))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(memo.len(), 1);
        assert_eq!(memo.hits(), 1);

        let other = MemoKey::new(&prepared, hp, 3, cache.train_size());
        memo.get_or_evaluate(other, || evaluate(&prepared, hp, 3)).unwrap();
        assert_eq!(memo.len(), 2);
    }

    #[test]
    fn test_persistent_memo_skips_recomputation_across_runs() {
        let dir = TempDir::new().unwrap();
        let cache = FeatureCache::build(&corpus(), &TransformerSpec::default_table(), TrainSize::Count(20), 2);
        let prepared = cache.get(&EndpointSignature::new("GET", "/a")).unwrap();
        let hp = Hyperparameters::new(0.1, 0.1);
        let key = MemoKey::new(&prepared, hp, 2, cache.train_size());

        let first = {
            let memo = EvaluationMemo::persistent(dir.path()).unwrap();
            memo.get_or_evaluate(key.clone(), || evaluate(&prepared, hp, 2)).unwrap()
        };
        assert!(dir.path().join(format!("{}.json", key.digest())).exists());

        let memo = EvaluationMemo::persistent(dir.path()).unwrap();
        let second = memo
            .get_or_evaluate(key, || panic!("cached evaluation recomputed"))
            .unwrap();
        assert_eq!(memo.hits(), 1);
        assert_eq!(second.result.signature, first.result.signature);
        assert_eq!(second.result.hyperparameters, first.result.hyperparameters);
        assert_eq!(
            (second.result.tp, second.result.tn, second.result.train_normal_correct),
            (first.result.tp, first.result.tn, first.result.train_normal_correct)
        );
    }

    #[test]
    fn test_unreadable_cache_entry_is_recomputed() {
        let dir = TempDir::new().unwrap();
        let cache = FeatureCache::build(&corpus(), &TransformerSpec::default_table(), TrainSize::Count(20), 2);
        let prepared = cache.get(&EndpointSignature::new("GET", "/a")).unwrap();
        let hp = Hyperparameters::new(0.1, 0.1);
        let key = MemoKey::new(&prepared, hp, 2, cache.train_size());
        std::fs::write(dir.path().join(format!("{}.json", key.digest())), b"not json").unwrap();

        let memo = EvaluationMemo::persistent(dir.path()).unwrap();
        let evaluated = memo.get_or_evaluate(key, || evaluate(&prepared, hp, 2)).unwrap();
        assert_eq!(memo.hits(), 0);
        assert_eq!(evaluated.result.train_normal, 20);
    }

    #[test]
    fn test_digest_depends_on_every_key_part() {
        let cache = FeatureCache::build(&corpus(), &TransformerSpec::default_table(), TrainSize::Count(20), 2);
        let prepared = cache.get(&EndpointSignature::new("GET", "/a")).unwrap();
        let base = MemoKey::new(&prepared, Hyperparameters::new(0.1, 0.1), 2, TrainSize::Count(20));
        let digests = [
            MemoKey::new(&prepared, Hyperparameters::new(0.01, 0.1), 2, TrainSize::Count(20)),
            MemoKey::new(&prepared, Hyperparameters::new(0.1, 0.01), 2, TrainSize::Count(20)),
            MemoKey::new(&prepared, Hyperparameters::new(0.1, 0.1), 3, TrainSize::Count(20)),
            MemoKey::new(&prepared, Hyperparameters::new(0.1, 0.1), 2, TrainSize::Count(21)),
        ]
        .map(|key| key.digest());
        assert_eq!(base.digest(), base.clone().digest());
        assert!(digests.iter().all(|d| *d != base.digest()));
    }
}
