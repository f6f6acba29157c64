use crate::cache::PreparedEndpoint;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;
use waf_common::{EndpointSignature, Hyperparameters, Label, OneClassSvm, Result};

/// A fitted scorer together with its evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluated {
    pub result: EvaluationResult,
    pub scorer: OneClassSvm,
}

/// Fit a scorer on the training matrix and score every split
pub fn evaluate(prepared: &PreparedEndpoint, hyperparameters: Hyperparameters, seed: u64) -> Result<Evaluated> {
    let scorer = OneClassSvm::fit(prepared.train.view(), hyperparameters, seed)?;
    let train = scorer.predict_batch(prepared.train.view())?;
    let test_normal = scorer.predict_batch(prepared.test_normal.view())?;
    let test_anomalous = scorer.predict_batch(prepared.test_anomalous.view())?;

    let result = EvaluationResult::from_predictions(
        prepared.signature.clone(),
        hyperparameters,
        &train,
        &test_normal,
        &test_anomalous,
    );
    debug!(%result, "Evaluated hyperparameters");
    Ok(Evaluated { result, scorer })
}

/// Confusion counts and rates of one fitted scorer, with normal as the positive class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub signature: EndpointSignature,
    pub hyperparameters: Hyperparameters,
    /// Training normals and how many of them the scorer kept as normal
    pub train_normal: usize,
    pub train_normal_correct: usize,
    /// Test normals
    pub p: usize,
    pub tp: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
    /// Test anomalous
    pub n: usize,
    pub tn: usize,
    pub fp: usize,
    pub tpr: f64,
    pub fnr: f64,
    pub tnr: f64,
    pub fpr: f64,
    pub f_score: f64,
}

impl EvaluationResult {
    /// Derive every count and rate from the predicted labels of each split.
    /// Empty splits give zero counts and zero rates.
    pub fn from_predictions(
        signature: EndpointSignature,
        hyperparameters: Hyperparameters,
        train: &[Label],
        test_normal: &[Label],
        test_anomalous: &[Label],
    ) -> Self {
        let count = |labels: &[Label], wanted: Label| labels.iter().filter(|&&l| l == wanted).count();

        let train_normal = train.len();
        let train_normal_correct = count(train, Label::Normal);

        let p = test_normal.len();
        let tp = count(test_normal, Label::Normal);
        let fn_ = p - tp;
        let n = test_anomalous.len();
        let tn = count(test_anomalous, Label::Anomalous);
        let fp = n - tn;

        Self {
            signature,
            hyperparameters,
            train_normal,
            train_normal_correct,
            p,
            tp,
            fn_,
            n,
            tn,
            fp,
            tpr: ratio(tp, p),
            fnr: ratio(fn_, p),
            tnr: ratio(tn, n),
            fpr: ratio(fp, n),
            f_score: ratio(2 * tp, 2 * tp + fp + fn_),
        }
    }

    /// Higher f-score wins, then higher TPR. Equal results are not better.
    pub fn is_better_than(&self, other: &EvaluationResult) -> bool {
        if self.f_score != other.f_score {
            return self.f_score > other.f_score;
        }
        self.tpr > other.tpr
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

impl fmt::Display for EvaluationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} nu={} gamma={} train={}/{} P={} TP={} FN={} N={} TN={} FP={} TPR={:.4} FNR={:.4} TNR={:.4} FPR={:.4} F={:.4}",
            self.signature,
            self.hyperparameters.nu,
            self.hyperparameters.gamma,
            self.train_normal_correct,
            self.train_normal,
            self.p,
            self.tp,
            self.fn_,
            self.n,
            self.tn,
            self.fp,
            self.tpr,
            self.fnr,
            self.tnr,
            self.fpr,
            self.f_score
        )
    }
}
