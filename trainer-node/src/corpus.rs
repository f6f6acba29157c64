//! Labelled training corpora, grouped by endpoint signature

use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};
use waf_common::canonicalize::{render_headers, render_params};
use waf_common::{Canonicalizer, EndpointSignature, Label, Request, Result, WafError};

/// Normal and anomalous samples of one endpoint
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EndpointSamples {
    pub normal: Vec<Request>,
    pub anomalous: Vec<Request>,
}

impl EndpointSamples {
    pub fn is_empty(&self) -> bool {
        self.normal.is_empty() && self.anomalous.is_empty()
    }

    /// SHA-256 over the canonical content of every sample, in order
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (label, requests) in [("normal", &self.normal), ("anomalous", &self.anomalous)] {
            hasher.update(label.as_bytes());
            hasher.update(requests.len().to_le_bytes());
            for request in requests {
                for part in [
                    request.method().to_string(),
                    request.url().to_string(),
                    render_headers(request.headers()),
                    render_params(request.query_params()),
                    render_params(request.body_params()),
                ] {
                    hasher.update(part.len().to_le_bytes());
                    hasher.update(part.as_bytes());
                }
            }
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Source of labelled requests per endpoint.
///
/// Unknown signatures yield empty sample lists rather than an error.
pub trait CorpusProvider: Send + Sync {
    fn signatures(&self) -> Vec<EndpointSignature>;

    fn get(&self, signature: &EndpointSignature) -> EndpointSamples;
}

/// Corpus held in memory, keyed by signature
#[derive(Debug, Clone, Default)]
pub struct InMemoryCorpus {
    endpoints: BTreeMap<EndpointSignature, EndpointSamples>,
}

impl InMemoryCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a request under its own signature. Requests without a true label
    /// are counted as normal.
    pub fn push(&mut self, request: Request) {
        let samples = self.endpoints.entry(request.signature()).or_default();
        match request.true_label() {
            Some(Label::Anomalous) => samples.anomalous.push(request),
            _ => samples.normal.push(request),
        }
    }

    pub fn insert(&mut self, signature: EndpointSignature, samples: EndpointSamples) {
        self.endpoints.insert(signature, samples);
    }

    /// Keep only the listed signatures; an empty list keeps everything
    pub fn retain_endpoints(&mut self, endpoints: &[EndpointSignature]) {
        if endpoints.is_empty() {
            return;
        }
        let wanted: BTreeSet<&EndpointSignature> = endpoints.iter().collect();
        self.endpoints.retain(|sig, _| wanted.contains(sig));
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

impl FromIterator<Request> for InMemoryCorpus {
    fn from_iter<I: IntoIterator<Item = Request>>(iter: I) -> Self {
        let mut corpus = Self::new();
        for request in iter {
            corpus.push(request);
        }
        corpus
    }
}

impl CorpusProvider for InMemoryCorpus {
    fn signatures(&self) -> Vec<EndpointSignature> {
        self.endpoints.keys().cloned().collect()
    }

    fn get(&self, signature: &EndpointSignature) -> EndpointSamples {
        self.endpoints.get(signature).cloned().unwrap_or_default()
    }
}

/// One sample of a JSON corpus snapshot
#[derive(Debug, Deserialize)]
struct RawSample {
    method: String,
    url: String,
    #[serde(default)]
    headers: String,
    #[serde(default)]
    query: String,
    #[serde(default)]
    body: String,
    label: String,
    #[serde(default)]
    attack: Option<String>,
    #[serde(default)]
    raw: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Snapshot {
    samples: Vec<serde_json::Value>,
}

/// Corpus loaded from a JSON snapshot of the form
/// `{"samples": [{"method", "url", "headers", "query", "body", "label", "attack"?, "raw"?}]}`.
///
/// Samples that fail to parse, have an empty method or url, or carry an
/// unknown label are dropped with a warning.
#[derive(Debug, Clone, Default)]
pub struct JsonCorpus {
    inner: InMemoryCorpus,
    dropped: usize,
}

impl JsonCorpus {
    pub fn from_file<P: AsRef<Path>>(path: P, canonicalizer: &Canonicalizer) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            WafError::Corpus(format!("cannot read {}: {e}", path.as_ref().display()))
        })?;
        let corpus = Self::from_json(&content, canonicalizer)?;
        info!(
            path = %path.as_ref().display(),
            endpoints = corpus.inner.len(),
            dropped = corpus.dropped,
            "Loaded corpus snapshot"
        );
        Ok(corpus)
    }

    pub fn from_json(content: &str, canonicalizer: &Canonicalizer) -> Result<Self> {
        let snapshot: Snapshot = serde_json::from_str(content)
            .map_err(|e| WafError::Corpus(format!("invalid corpus snapshot: {e}")))?;

        let mut corpus = Self::default();
        for (index, value) in snapshot.samples.into_iter().enumerate() {
            match parse_sample(value, canonicalizer) {
                Ok(request) => corpus.inner.push(request),
                Err(e) => {
                    warn!(index, error = %e, "Dropping malformed corpus sample");
                    corpus.dropped += 1;
                }
            }
        }
        debug!(endpoints = corpus.inner.len(), "Parsed corpus snapshot");
        Ok(corpus)
    }

    /// Keep only the listed signatures; an empty list keeps everything
    pub fn with_endpoints(mut self, endpoints: &[EndpointSignature]) -> Self {
        self.inner.retain_endpoints(endpoints);
        self
    }

    /// Number of samples dropped while loading
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

impl CorpusProvider for JsonCorpus {
    fn signatures(&self) -> Vec<EndpointSignature> {
        self.inner.signatures()
    }

    fn get(&self, signature: &EndpointSignature) -> EndpointSamples {
        self.inner.get(signature)
    }
}

fn parse_sample(value: serde_json::Value, canonicalizer: &Canonicalizer) -> Result<Request> {
    let sample: RawSample = serde_json::from_value(value)?;
    let method = sample.method.trim();
    let url = sample.url.trim();
    if method.is_empty() || url.is_empty() {
        return Err(WafError::Parse("sample has an empty method or url".to_string()));
    }
    let label: Label = sample.label.parse()?;

    let original_text = sample
        .raw
        .unwrap_or_else(|| sample_text(method, url, &sample.headers, &sample.query, &sample.body));

    Ok(canonicalizer
        .request(method, url, &sample.headers, &sample.query, &sample.body)
        .with_original_text(original_text)
        .with_label(label, sample.attack.filter(|a| !a.is_empty())))
}

fn sample_text(method: &str, url: &str, headers: &str, query: &str, body: &str) -> String {
    let mut text = format!("{method} {url}");
    if !query.is_empty() {
        text.push('?');
        text.push_str(query);
    }
    text.push('\n');
    text.push_str(headers.trim_end());
    if !body.is_empty() {
        text.push_str("\n\n");
        text.push_str(body);
    }
    text
}
