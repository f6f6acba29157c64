use std::sync::Arc;
use tempfile::TempDir;
use trainer_node::{
    build_registry, quick_fit, split, CorpusProvider, EvaluationMemo, FeatureCache, Grid,
    InMemoryCorpus, JsonCorpus, SelectionReport, Selector, TrainSize, DEFAULT_SEED, QUICK_FIT,
};
use waf_common::{
    Canonicalizer, EndpointSignature, Family, FieldSource, Label, ModelRegistry, TransformerSpec,
};

/// Body values of three lengths, each made of distinct characters
const NORMAL_VALUES: [&str; 3] = ["abc123", "abcd123", "abcde123"];

fn length_entropy_specs() -> Vec<TransformerSpec> {
    vec![
        TransformerSpec::new(FieldSource::BodyParams, Family::Length),
        TransformerSpec::new(FieldSource::BodyParams, Family::Entropy),
    ]
}

fn scenario_corpus(normal: usize) -> InMemoryCorpus {
    let c = Canonicalizer::default();
    (0..normal)
        .map(|i| {
            c.request("GET", "/a", "Host: shop", "", &format!("comment={}", NORMAL_VALUES[i % 3]))
                .with_label(Label::Normal, None)
        })
        .collect()
}

#[test]
fn test_trained_endpoint_separates_normal_and_oversized_bodies() {
    let corpus = scenario_corpus(600);
    let registry = quick_fit(
        &corpus,
        &length_entropy_specs(),
        QUICK_FIT,
        TrainSize::Count(500),
        DEFAULT_SEED,
    )
    .unwrap();
    let model = registry.lookup(&EndpointSignature::new("GET", "/a")).unwrap();
    assert_eq!(model.feature_count(), 5);

    let c = Canonicalizer::default();
    let held_out = c.request("GET", "/a", "Host: shop", "", "comment=wxyz789");
    let score = model.score(&held_out).unwrap();
    assert_eq!(score.label, Label::Normal, "decision {}", score.decision);

    let mean_len = NORMAL_VALUES.iter().map(|v| v.len()).sum::<usize>() / NORMAL_VALUES.len();
    let oversized = c.request(
        "GET",
        "/a",
        "Host: shop",
        "",
        &format!("comment={}", "x".repeat(mean_len * 50)),
    );
    let score = model.score(&oversized).unwrap();
    assert_eq!(score.label, Label::Anomalous, "decision {}", score.decision);
}

#[test]
fn test_selection_is_deterministic_for_fixed_seed() {
    let c = Canonicalizer::default();
    let mut corpus = scenario_corpus(90);
    for i in 0..10 {
        corpus.push(
            c.request("GET", "/a", "", "", &format!("comment={}", "<script>".repeat(i + 1)))
                .with_label(Label::Anomalous, Some("xss".to_string())),
        );
    }

    let run = || {
        let cache = FeatureCache::build(&corpus, &length_entropy_specs(), TrainSize::Count(60), 7);
        let selector = Selector::new(Arc::new(cache), Arc::new(EvaluationMemo::new()), Grid::default()).unwrap();
        selector.select(&EndpointSignature::new("GET", "/a")).unwrap()
    };
    let first = run();
    let second = run();
    assert_eq!(first.best, second.best);
    assert_eq!(first.best.p, 30);
    assert_eq!(first.best.n, 10);
    assert_eq!(first.best.train_normal, 60);
}

#[test]
fn test_second_run_reuses_cached_evaluations() {
    let dir = TempDir::new().unwrap();
    let corpus = scenario_corpus(90);
    let signature = EndpointSignature::new("GET", "/a");

    let run = || {
        let cache = FeatureCache::build(&corpus, &length_entropy_specs(), TrainSize::Count(60), 7);
        let memo = Arc::new(EvaluationMemo::persistent(dir.path()).unwrap());
        let selector = Selector::new(Arc::new(cache), Arc::clone(&memo), Grid::default()).unwrap();
        (selector.select(&signature).unwrap(), memo)
    };

    let (first, memo) = run();
    assert_eq!(memo.hits(), 0);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 16);

    let (second, memo) = run();
    assert_eq!(memo.hits(), 16);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 16);
    assert_eq!(second.best.hyperparameters, first.best.hyperparameters);
    assert_eq!((second.best.tp, second.best.tn), (first.best.tp, first.best.tn));
    assert_eq!(second.model.hyperparameters(), first.model.hyperparameters());
}

#[test]
fn test_degenerate_endpoints_yield_zero_metrics() {
    let c = Canonicalizer::default();
    let mut corpus = InMemoryCorpus::new();
    corpus.push(
        c.request("POST", "/upload", "", "", "file=%00%00")
            .with_label(Label::Anomalous, None),
    );

    let cache = FeatureCache::build(&corpus, &TransformerSpec::default_table(), TrainSize::Count(500), 2);
    let selector = Selector::new(Arc::new(cache), Arc::new(EvaluationMemo::new()), Grid::default()).unwrap();
    let outcome = selector.select(&EndpointSignature::new("POST", "/upload")).unwrap();

    assert_eq!(outcome.best.train_normal, 0);
    assert_eq!(outcome.best.p, 0);
    assert_eq!(outcome.best.n, 1);
    assert_eq!(outcome.best.f_score, 0.0);
    assert_eq!(outcome.best.tpr, 0.0);
    // First combination in grid order wins every tie
    assert_eq!(outcome.best.hyperparameters, Grid::default().combinations()[0]);

    assert!(build_registry(&[outcome]).is_empty());
}

#[test]
fn test_zero_test_buckets_give_zero_f_score() {
    let corpus = scenario_corpus(30);
    let samples = corpus.get(&EndpointSignature::new("GET", "/a"));
    let parts = split(&samples, TrainSize::Count(500), DEFAULT_SEED);
    assert_eq!(parts.train_normal.len(), 30);
    assert!(parts.test_normal.is_empty());

    let cache = FeatureCache::build(&corpus, &length_entropy_specs(), TrainSize::Count(500), DEFAULT_SEED);
    let selector = Selector::new(Arc::new(cache), Arc::new(EvaluationMemo::new()), Grid::default()).unwrap();
    let outcome = selector.select(&EndpointSignature::new("GET", "/a")).unwrap();
    assert_eq!((outcome.best.p, outcome.best.n), (0, 0));
    assert_eq!(outcome.best.f_score, 0.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_json_corpus_to_registry_file() {
    let dir = TempDir::new().unwrap();
    let corpus_path = dir.path().join("corpus.json");

    let mut samples = Vec::new();
    for i in 0..40 {
        samples.push(serde_json::json!({
            "method": "GET",
            "url": "/search",
            "headers": "Host: shop\nX-Proxy-Test-Req-Class: normal",
            "query": format!("q={}", NORMAL_VALUES[i % 3]),
            "label": "normal"
        }));
        samples.push(serde_json::json!({
            "method": "POST",
            "url": "/login",
            "body": format!("user={}&pass=pw{}", NORMAL_VALUES[i % 3], i % 3),
            "label": "normal"
        }));
    }
    samples.push(serde_json::json!({
        "method": "GET",
        "url": "/search",
        "query": format!("q={}", "%3Cscript%3E".repeat(20)),
        "label": "anomalous",
        "attack": "xss"
    }));
    samples.push(serde_json::json!({"method": "GET", "label": "normal"}));
    std::fs::write(&corpus_path, serde_json::json!({ "samples": samples }).to_string()).unwrap();

    let corpus = JsonCorpus::from_file(&corpus_path, &Canonicalizer::default()).unwrap();
    assert_eq!(corpus.dropped(), 1);
    assert_eq!(corpus.signatures().len(), 2);

    let cache = Arc::new(FeatureCache::build(
        &corpus,
        &TransformerSpec::default_table(),
        TrainSize::Fraction(0.75),
        DEFAULT_SEED,
    ));
    let selector = Arc::new(Selector::new(cache, Arc::new(EvaluationMemo::new()), Grid::default()).unwrap());
    let outcomes = selector.select_all().await.unwrap();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].signature().to_string(), "GET /search");
    assert_eq!(outcomes[0].best.train_normal, 30);
    assert_eq!(outcomes[0].best.n, 1);

    let registry = build_registry(&outcomes);
    let registry_path = dir.path().join("registry.json");
    registry.save(&registry_path).unwrap();

    let report = SelectionReport::new(&outcomes, &registry, DEFAULT_SEED, TrainSize::Fraction(0.75));
    let report_path = dir.path().join("report.json");
    report.save(&report_path).unwrap();
    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(written["endpoints"].as_array().unwrap().len(), 2);
    assert_eq!(written["endpoints"][0]["evaluations"].as_array().unwrap().len(), 16);
    assert_eq!(written["train_size"], serde_json::json!(0.75));

    let loaded = ModelRegistry::load(&registry_path).unwrap();
    assert_eq!(loaded.len(), 2);
    let model = loaded
        .lookup(&EndpointSignature::new("POST", "/login"))
        .unwrap();
    assert_eq!(model.hyperparameters(), outcomes[1].best.hyperparameters);
}
