// Shared request model, feature extraction and one-class scoring
pub mod canonicalize;
pub mod error;
pub mod features;
pub mod registry;
pub mod request;
pub mod scorer;

pub use canonicalize::{Canonicalizer, Exclusions, DEFAULT_EXCLUDED_HEADERS};
pub use error::{Result, WafError};
pub use features::{
    FeatureName, FeaturePipeline, FeatureVector, Family, FieldSource, TransformerSpec,
};
pub use registry::{ModelRegistry, Score, TrainedModel};
pub use request::{EndpointSignature, FieldMap, Label, Request};
pub use scorer::{Hyperparameters, OneClassSvm};
