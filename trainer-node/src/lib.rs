//! Offline trainer for the anomaly filter.
//!
//! Splits each endpoint's corpus, fits feature pipelines on the training
//! normals, grid-searches one-class scorer hyperparameters and assembles the
//! model registry served by the proxy.

pub mod cache;
pub mod config;
pub mod corpus;
pub mod evaluation;
pub mod report;
pub mod selector;
pub mod split;

pub use cache::{EvaluationMemo, FeatureCache, PreparedEndpoint};
pub use config::TrainerConfig;
pub use corpus::{CorpusProvider, EndpointSamples, InMemoryCorpus, JsonCorpus};
pub use evaluation::{evaluate, Evaluated, EvaluationResult};
pub use report::{EndpointReport, SelectionReport};
pub use selector::{build_registry, quick_fit, Grid, SelectionOutcome, Selector, DEFAULT_SEED, QUICK_FIT};
pub use split::{split, Split, TrainSize};
