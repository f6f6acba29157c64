use super::{Family, FeatureName, FieldSource, TransformerSpec};
use crate::canonicalize::render_request;
use crate::request::Request;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// One `(source, family)` transformer with the keys frozen at fit time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldTransformer {
    spec: TransformerSpec,
    keys: Vec<String>,
}

impl FieldTransformer {
    pub fn new(spec: TransformerSpec) -> Self {
        Self {
            spec,
            keys: Vec::new(),
        }
    }

    pub fn spec(&self) -> TransformerSpec {
        self.spec
    }

    /// Sorted distinct keys seen during fit; empty for whole-request sources
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    fn fit(&mut self, requests: &[Request]) {
        let mut keys = BTreeSet::new();
        for request in requests {
            if let Some(fields) = self.spec.source.fields(request) {
                keys.extend(fields.keys().cloned());
            }
        }
        self.keys = keys.into_iter().collect();
    }

    fn width(&self) -> usize {
        if !self.spec.family.is_numeric() {
            return 0;
        }
        let parts = self.spec.family.sub_parts().len();
        if self.spec.source.is_per_field() {
            self.keys.len() * parts
        } else {
            parts
        }
    }

    fn transform_into(&self, request: &Request, out: &mut Vec<f64>) {
        let family = self.spec.family;
        if !family.is_numeric() {
            return;
        }
        match self.spec.source.fields(request) {
            Some(fields) => {
                let parts = family.sub_parts().len();
                for key in &self.keys {
                    match fields.get(key) {
                        Some(value) => out.extend(family.evaluate(value)),
                        None => out.extend(std::iter::repeat(0.0).take(parts)),
                    }
                }
            }
            None => out.extend(family.evaluate(&render_request(request))),
        }
    }

    fn inspect_into(&self, request: &Request, out: &mut Vec<(FeatureName, String)>) {
        let name = |key: &str| FeatureName {
            family: self.spec.family,
            sub_part: self.spec.family.sub_parts()[0],
            source: self.spec.source,
            key: key.to_string(),
        };
        match self.spec.source.fields(request) {
            Some(fields) => {
                for key in &self.keys {
                    let value = fields.get(key).cloned().unwrap_or_default();
                    out.push((name(key), value));
                }
            }
            None => out.push((name(""), inspection_text(request))),
        }
    }

    fn names_into(&self, out: &mut Vec<FeatureName>) {
        if !self.spec.family.is_numeric() {
            return;
        }
        let family = self.spec.family;
        let source = self.spec.source;
        let push_parts = |key: &str, out: &mut Vec<FeatureName>| {
            for sub_part in family.sub_parts() {
                out.push(FeatureName {
                    family,
                    sub_part: *sub_part,
                    source,
                    key: key.to_string(),
                });
            }
        };
        if source.is_per_field() {
            for key in &self.keys {
                push_parts(key, out);
            }
        } else {
            push_parts("", out);
        }
    }
}

/// Whole-request text shown by `inspect`. Numeric features always use the
/// canonical rendering so corpus samples and live traffic agree.
fn inspection_text(request: &Request) -> String {
    if request.original_text().is_empty() {
        render_request(request)
    } else {
        request.original_text().to_string()
    }
}

/// Numeric features of one request, in pipeline column order
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    names: Arc<[FeatureName]>,
    values: Vec<f64>,
}

impl FeatureVector {
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn names(&self) -> &[FeatureName] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FeatureName, f64)> {
        self.names.iter().zip(self.values.iter().copied())
    }
}

/// Ordered set of transformers turning a request into a fixed-width vector.
///
/// Columns are ordered by family, then source, then key, then sub-part. The
/// ordering depends only on the transformer table and the fitted key sets, so
/// a fitted pipeline produces identical layouts on every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturePipeline {
    transformers: Vec<FieldTransformer>,
    fitted: bool,
    #[serde(skip)]
    layout: OnceLock<Arc<[FeatureName]>>,
}

impl FeaturePipeline {
    pub fn new(specs: &[TransformerSpec]) -> Self {
        let mut specs = specs.to_vec();
        specs.sort_by_key(|s| s.order_key());
        specs.dedup();
        Self {
            transformers: specs.into_iter().map(FieldTransformer::new).collect(),
            fitted: false,
            layout: OnceLock::new(),
        }
    }

    /// New pipeline over `specs` fitted on `requests`
    pub fn fitted(specs: &[TransformerSpec], requests: &[Request]) -> Self {
        let mut pipeline = Self::new(specs);
        pipeline.fit(requests);
        pipeline
    }

    /// Record the distinct keys of every per-field transformer
    pub fn fit(&mut self, requests: &[Request]) {
        for transformer in &mut self.transformers {
            transformer.fit(requests);
        }
        self.fitted = true;
        self.layout = OnceLock::new();
        debug!(
            samples = requests.len(),
            features = self.feature_count(),
            "Fitted feature pipeline"
        );
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    pub fn transformers(&self) -> &[FieldTransformer] {
        &self.transformers
    }

    /// Distinct keys recorded for `source` by the first matching transformer
    pub fn known_keys(&self, source: FieldSource) -> Option<&[String]> {
        self.transformers
            .iter()
            .find(|t| t.spec.source == source && source.is_per_field())
            .map(|t| t.keys())
    }

    /// Width of the numeric vector
    pub fn feature_count(&self) -> usize {
        self.transformers.iter().map(FieldTransformer::width).sum()
    }

    pub fn feature_names(&self) -> Arc<[FeatureName]> {
        self.layout
            .get_or_init(|| {
                let mut names = Vec::with_capacity(self.feature_count());
                for transformer in &self.transformers {
                    transformer.names_into(&mut names);
                }
                Arc::from(names)
            })
            .clone()
    }

    /// Numeric features of `request`; raw-family entries are skipped
    pub fn transform(&self, request: &Request) -> FeatureVector {
        let mut values = Vec::with_capacity(self.feature_count());
        for transformer in &self.transformers {
            transformer.transform_into(request, &mut values);
        }
        FeatureVector {
            names: self.feature_names(),
            values,
        }
    }

    /// Feature matrix with one row per request
    pub fn transform_batch(&self, requests: &[Request]) -> Array2<f64> {
        let width = self.feature_count();
        let mut data = Vec::with_capacity(requests.len() * width);
        for request in requests {
            for transformer in &self.transformers {
                transformer.transform_into(request, &mut data);
            }
        }
        Array2::from_shape_vec((requests.len(), width), data)
            .unwrap_or_else(|_| Array2::zeros((requests.len(), width)))
    }

    /// Raw strings of the raw-family transformers, keyed like numeric columns
    pub fn inspect(&self, request: &Request) -> Vec<(FeatureName, String)> {
        let mut out = Vec::new();
        for transformer in &self.transformers {
            if transformer.spec.family == Family::Raw {
                transformer.inspect_into(request, &mut out);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonicalize::Canonicalizer;

    fn corpus() -> Vec<Request> {
        let c = Canonicalizer::default();
        vec![
            c.request("POST", "/login", "", "lang=en", "user=alice&pass=secret1"),
            c.request("POST", "/login", "", "", "user=bob&remember=on"),
        ]
    }

    #[test]
    fn test_keys_sorted_and_frozen() {
        let mut pipeline = FeaturePipeline::fitted(&TransformerSpec::default_table(), &corpus());
        assert!(pipeline.is_fitted());
        assert_eq!(
            pipeline.known_keys(FieldSource::BodyParams).unwrap(),
            &["pass".to_string(), "remember".to_string(), "user".to_string()]
        );
        assert_eq!(
            pipeline.known_keys(FieldSource::QueryParams).unwrap(),
            &["lang".to_string()]
        );

        // 4 keys x (5 + 1 + 4) sub-parts
        assert_eq!(pipeline.feature_count(), 40);

        let c = Canonicalizer::default();
        let unseen = c.request("POST", "/login", "", "debug=1", "user=eve");
        let v = pipeline.transform(&unseen);
        assert_eq!(v.len(), 40);

        pipeline.fit(&corpus()[..1]);
        assert_eq!(pipeline.feature_count(), 30);
    }

    #[test]
    fn test_column_order() {
        let pipeline = FeaturePipeline::fitted(&TransformerSpec::default_table(), &corpus());
        let names = pipeline.feature_names();
        assert_eq!(names.len(), pipeline.feature_count());

        assert_eq!(names[0].family, Family::CharDistribution);
        assert_eq!(names[0].source, FieldSource::QueryParams);
        assert_eq!(names[0].key, "lang");
        assert_eq!(names[0].sub_part, "N1B0");
        assert_eq!(names[4].sub_part, "N1B4");
        assert_eq!(names[5].source, FieldSource::BodyParams);
        assert_eq!(names[5].key, "pass");
        assert_eq!(names[20].family, Family::Entropy);
        assert_eq!(names[24].family, Family::Length);
        assert_eq!(names[24].sub_part, "ALL");
        assert_eq!(names[39].to_string(), "Length/OTHER/Bp/user");
    }

    #[test]
    fn test_missing_key_emits_zeros() {
        let specs = [TransformerSpec::new(FieldSource::BodyParams, Family::Length)];
        let pipeline = FeaturePipeline::fitted(&specs, &corpus());
        let c = Canonicalizer::default();
        let v = pipeline.transform(&c.request("POST", "/login", "", "", "user=ab12"));
        // pass, remember, user
        assert_eq!(
            v.values(),
            &[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 4.0, 2.0, 2.0, 0.0]
        );
    }

    #[test]
    fn test_transform_is_stable() {
        let pipeline = FeaturePipeline::fitted(&TransformerSpec::default_table(), &corpus());
        let request = &corpus()[0];
        let a = pipeline.transform(request);
        let b = pipeline.transform(request);
        assert_eq!(a, b);

        let batch = pipeline.transform_batch(&corpus());
        assert_eq!(batch.dim(), (2, 40));
        assert_eq!(batch.row(0).to_vec(), a.values().to_vec());
    }

    #[test]
    fn test_whole_request_and_raw_inspection() {
        let specs = [
            TransformerSpec::new(FieldSource::Request, Family::Length),
            TransformerSpec::new(FieldSource::BodyParams, Family::Raw),
            TransformerSpec::new(FieldSource::Request, Family::Raw),
        ];
        let pipeline = FeaturePipeline::fitted(&specs, &corpus());
        assert_eq!(pipeline.feature_count(), 4);

        let request = corpus()[1].clone().with_original_text("POST /login\n\nuser=bob");
        let v = pipeline.transform(&request);
        assert_eq!(v.values()[0], "POST /login\n\n\nremember=on&user=bob".len() as f64);
        assert_eq!(v, pipeline.transform(&corpus()[1]));

        let raw = pipeline.inspect(&request);
        assert_eq!(raw.len(), 4);
        assert_eq!(raw[0].0.key, "");
        assert_eq!(raw[0].1, "POST /login\n\nuser=bob");
        assert_eq!(raw[1].0.key, "pass");
        assert_eq!(raw[1].1, "");
        assert_eq!(raw[3].1, "bob");
    }

    #[test]
    fn test_serialized_pipeline_keeps_layout() {
        let pipeline = FeaturePipeline::fitted(&TransformerSpec::default_table(), &corpus());
        let json = serde_json::to_string(&pipeline).unwrap();
        let restored: FeaturePipeline = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.feature_names(), pipeline.feature_names());
        assert_eq!(
            restored.transform(&corpus()[1]).values(),
            pipeline.transform(&corpus()[1]).values()
        );
    }
}
