//! ν-one-class support vector machine with an RBF kernel, fitted with
//! `linfa-svm`.
//!
//! The kernel is `K(x, y) = exp(-γ·|x − y|²)`, which is linfa's Gaussian
//! kernel with `eps = 1/γ`. The decision value is `f(x) = Σ αᵢ K(xᵢ, x) − ρ`
//! and a sample is normal iff `f(x) > 0`.

use crate::error::{Result, WafError};
use crate::request::Label;
use linfa::prelude::{Dataset, Fit, Pr};
use linfa_svm::{Svm, SvmError};
use ndarray::{ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Stopping tolerance on the maximal KKT violation
const TOLERANCE: f64 = 1e-4;

/// Scorer hyperparameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    /// Upper bound on the training outlier fraction, in (0, 1]
    pub nu: f64,
    /// RBF kernel scale, > 0
    pub gamma: f64,
}

impl Hyperparameters {
    pub const fn new(nu: f64, gamma: f64) -> Self {
        Self { nu, gamma }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.nu > 0.0 && self.nu <= 1.0) {
            return Err(WafError::Model(format!("nu must be in (0, 1], got {}", self.nu)));
        }
        if !(self.gamma > 0.0 && self.gamma.is_finite()) {
            return Err(WafError::Model(format!("gamma must be positive, got {}", self.gamma)));
        }
        Ok(())
    }
}

impl From<SvmError> for WafError {
    fn from(err: SvmError) -> Self {
        WafError::Model(err.to_string())
    }
}

/// Fitted one-class scorer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneClassSvm {
    hyperparameters: Hyperparameters,
    feature_count: usize,
    /// `None` when fitted on no samples
    model: Option<Svm<f64, bool>>,
}

impl OneClassSvm {
    /// Fit on the rows of `samples`. The solver gives the initial α mass to
    /// the leading rows, so the seed shuffles the row order first. An empty
    /// sample set yields a model that marks every input anomalous.
    pub fn fit(samples: ArrayView2<f64>, hyperparameters: Hyperparameters, seed: u64) -> Result<Self> {
        hyperparameters.validate()?;
        let (rows, feature_count) = samples.dim();

        if rows == 0 {
            debug!("Fitting one-class scorer on an empty sample set");
            return Ok(Self {
                hyperparameters,
                feature_count,
                model: None,
            });
        }

        let mut order: Vec<usize> = (0..rows).collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed));
        let dataset = Dataset::from(samples.select(Axis(0), &order));

        let fitted: std::result::Result<Svm<f64, bool>, SvmError> = Svm::<f64, Pr>::params()
            .nu_weight(hyperparameters.nu)
            .gaussian_kernel(1.0 / hyperparameters.gamma)
            .eps(TOLERANCE)
            .fit(&dataset);
        let model = fitted?;

        debug!(
            rows,
            feature_count,
            support_vectors = model.nsupport(),
            rho = model.rho,
            "Fitted one-class scorer: {}",
            model
        );

        Ok(Self {
            hyperparameters,
            feature_count,
            model: Some(model),
        })
    }

    pub fn hyperparameters(&self) -> Hyperparameters {
        self.hyperparameters
    }

    pub fn feature_count(&self) -> usize {
        self.feature_count
    }

    pub fn support_vector_count(&self) -> usize {
        self.model.as_ref().map_or(0, |model| model.nsupport())
    }

    /// Signed distance to the learned boundary; positive means normal
    pub fn decision(&self, sample: &[f64]) -> Result<f64> {
        if sample.len() != self.feature_count {
            return Err(WafError::Model(format!(
                "expected {} features, got {}",
                self.feature_count,
                sample.len()
            )));
        }
        Ok(match &self.model {
            Some(model) => model.weighted_sum(&ArrayView1::from(sample)) - model.rho,
            None => f64::NEG_INFINITY,
        })
    }

    pub fn predict(&self, sample: &[f64]) -> Result<Label> {
        Ok(label_for(self.decision(sample)?))
    }

    /// Labels for every row of `samples`
    pub fn predict_batch(&self, samples: ArrayView2<f64>) -> Result<Vec<Label>> {
        samples
            .outer_iter()
            .map(|row| match row.as_slice() {
                Some(slice) => self.predict(slice),
                None => self.predict(&row.to_vec()),
            })
            .collect()
    }
}

pub fn label_for(decision: f64) -> Label {
    if decision > 0.0 {
        Label::Normal
    } else {
        Label::Anomalous
    }
}
