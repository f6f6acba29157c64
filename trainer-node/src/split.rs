use crate::corpus::EndpointSamples;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use waf_common::{Request, Result, WafError};

/// How many normal samples go to the training split.
///
/// Written as a plain number: an integer is a count, a float a fraction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrainSize {
    /// Absolute count, clamped to the available samples
    Count(usize),
    /// Fraction of the available samples in (0, 1], rounded down
    Fraction(f64),
}

impl Default for TrainSize {
    fn default() -> Self {
        TrainSize::Count(500)
    }
}

impl TrainSize {
    pub fn validate(&self) -> Result<()> {
        match *self {
            TrainSize::Fraction(f) if !(f > 0.0 && f <= 1.0) => Err(WafError::Config(format!(
                "train fraction must be in (0, 1], got {f}"
            ))),
            _ => Ok(()),
        }
    }

    /// Training sample count for `available` normal samples
    pub fn resolve(&self, available: usize) -> usize {
        match *self {
            TrainSize::Count(n) => n.min(available),
            TrainSize::Fraction(f) => ((available as f64 * f).floor() as usize).min(available),
        }
    }

    /// Hashable identity used in memo keys
    pub(crate) fn key(&self) -> (u8, u64) {
        match *self {
            TrainSize::Count(n) => (0, n as u64),
            TrainSize::Fraction(f) => (1, f.to_bits()),
        }
    }
}

impl fmt::Display for TrainSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainSize::Count(n) => write!(f, "{n}"),
            TrainSize::Fraction(x) => write!(f, "{x}"),
        }
    }
}

/// Train/test partition of one endpoint's samples
#[derive(Debug, Clone, Default)]
pub struct Split {
    pub train_normal: Vec<Request>,
    pub test_normal: Vec<Request>,
    pub test_anomalous: Vec<Request>,
}

/// Shuffle the normal samples with `seed` and cut off the training part.
/// Every anomalous sample goes to the test split.
pub fn split(samples: &EndpointSamples, train_size: TrainSize, seed: u64) -> Split {
    let mut normal = samples.normal.clone();
    let mut rng = StdRng::seed_from_u64(seed);
    normal.shuffle(&mut rng);

    let train_count = train_size.resolve(normal.len());
    let test_normal = normal.split_off(train_count);

    Split {
        train_normal: normal,
        test_normal,
        test_anomalous: samples.anomalous.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use waf_common::Canonicalizer;

    fn samples(normal: usize, anomalous: usize) -> EndpointSamples {
        let c = Canonicalizer::default();
        EndpointSamples {
            normal: (0..normal)
                .map(|i| c.request("GET", "/a", "", &format!("id={i}"), ""))
                .collect(),
            anomalous: (0..anomalous)
                .map(|i| c.request("GET", "/a", "", &format!("id={i}<script>"), ""))
                .collect(),
        }
    }

    #[test]
    fn test_resolve() {
        assert_eq!(TrainSize::Count(500).resolve(120), 120);
        assert_eq!(TrainSize::Count(10).resolve(120), 10);
        assert_eq!(TrainSize::Fraction(0.5).resolve(7), 3);
        assert_eq!(TrainSize::Fraction(1.0).resolve(7), 7);
        assert!(TrainSize::Fraction(0.0).validate().is_err());
        assert!(TrainSize::Fraction(0.7).validate().is_ok());
    }

    #[test]
    fn test_anomalous_all_in_test() {
        let s = split(&samples(20, 5), TrainSize::Count(15), 2);
        assert_eq!(s.train_normal.len(), 15);
        assert_eq!(s.test_normal.len(), 5);
        assert_eq!(s.test_anomalous.len(), 5);
    }

    #[test]
    fn test_split_is_seeded() {
        let input = samples(50, 0);
        let a = split(&input, TrainSize::Fraction(0.5), 9);
        let b = split(&input, TrainSize::Fraction(0.5), 9);
        assert_eq!(a.train_normal, b.train_normal);
        assert_eq!(a.test_normal, b.test_normal);
        assert_eq!(a.train_normal.len(), 25);
    }

    #[test]
    fn test_empty_input() {
        let s = split(&EndpointSamples::default(), TrainSize::Count(500), 2);
        assert!(s.train_normal.is_empty());
        assert!(s.test_normal.is_empty());
        assert!(s.test_anomalous.is_empty());
    }

    proptest! {
        #[test]
        fn prop_split_partitions_normals(normal in 0usize..40, count in 0usize..60, seed in any::<u64>()) {
            let input = samples(normal, 2);
            let s = split(&input, TrainSize::Count(count), seed);
            prop_assert_eq!(s.train_normal.len(), count.min(normal));
            prop_assert_eq!(s.train_normal.len() + s.test_normal.len(), normal);
            for request in &input.normal {
                let in_train = s.train_normal.contains(request);
                let in_test = s.test_normal.contains(request);
                prop_assert!(in_train != in_test);
            }
        }
    }
}
