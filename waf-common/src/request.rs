use crate::error::{Result, WafError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Canonical key/value map used for headers, query params and body params
pub type FieldMap = BTreeMap<String, String>;

/// Traffic class of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Normal,
    Anomalous,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Normal => "normal",
            Label::Anomalous => "anomalous",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = WafError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(Label::Normal),
            "anomalous" => Ok(Label::Anomalous),
            other => Err(WafError::Parse(format!("unknown label '{other}'"))),
        }
    }
}

/// `(method, url)` pair identifying one trained model
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointSignature {
    pub method: String,
    pub url: String,
}

impl EndpointSignature {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
        }
    }
}

impl fmt::Display for EndpointSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

impl FromStr for EndpointSignature {
    type Err = WafError;

    /// Parses the `"METHOD URL"` form
    fn from_str(s: &str) -> Result<Self> {
        let (method, url) = s
            .trim()
            .split_once(' ')
            .ok_or_else(|| WafError::Parse(format!("invalid endpoint signature '{s}'")))?;
        let url = url.trim();
        if method.is_empty() || url.is_empty() {
            return Err(WafError::Parse(format!("invalid endpoint signature '{s}'")));
        }
        Ok(Self::new(method, url))
    }
}

/// Canonical HTTP request shared by corpus samples and live traffic.
///
/// All maps are produced by the [`Canonicalizer`](crate::Canonicalizer), so keys are
/// lowercase and unique. Everything except the predicted label is fixed at
/// construction; the predicted label may be assigned once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    method: String,
    url: String,
    headers: FieldMap,
    query_params: FieldMap,
    body_params: FieldMap,
    original_text: String,
    true_label: Option<Label>,
    attack: Option<String>,
    predicted_label: Option<Label>,
}

impl Request {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: FieldMap::new(),
            query_params: FieldMap::new(),
            body_params: FieldMap::new(),
            original_text: String::new(),
            true_label: None,
            attack: None,
            predicted_label: None,
        }
    }

    pub fn with_headers(mut self, headers: FieldMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_query_params(mut self, query_params: FieldMap) -> Self {
        self.query_params = query_params;
        self
    }

    pub fn with_body_params(mut self, body_params: FieldMap) -> Self {
        self.body_params = body_params;
        self
    }

    pub fn with_original_text(mut self, original_text: impl Into<String>) -> Self {
        self.original_text = original_text.into();
        self
    }

    /// Attach the ground-truth label and optional attack subtype
    pub fn with_label(mut self, label: Label, attack: Option<String>) -> Self {
        self.true_label = Some(label);
        self.attack = attack;
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &FieldMap {
        &self.headers
    }

    pub fn query_params(&self) -> &FieldMap {
        &self.query_params
    }

    pub fn body_params(&self) -> &FieldMap {
        &self.body_params
    }

    pub fn original_text(&self) -> &str {
        &self.original_text
    }

    pub fn true_label(&self) -> Option<Label> {
        self.true_label
    }

    pub fn attack(&self) -> Option<&str> {
        self.attack.as_deref()
    }

    pub fn predicted_label(&self) -> Option<Label> {
        self.predicted_label
    }

    /// Record the model's verdict. Fails if a verdict was already recorded.
    pub fn set_predicted_label(&mut self, label: Label) -> Result<()> {
        if let Some(existing) = self.predicted_label {
            return Err(WafError::InvalidState(format!(
                "predicted label already set to '{existing}' for {}",
                self.signature()
            )));
        }
        self.predicted_label = Some(label);
        Ok(())
    }

    pub fn signature(&self) -> EndpointSignature {
        EndpointSignature::new(self.method.clone(), self.url.clone())
    }
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.method == other.method
            && self.url == other.url
            && self.headers == other.headers
            && self.query_params == other.query_params
            && self.body_params == other.body_params
    }
}

impl Eq for Request {}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_signature_roundtrip() {
        let sig: EndpointSignature = "POST /tienda1/publico/anadir.jsp".parse().unwrap();
        assert_eq!(sig.method, "POST");
        assert_eq!(sig.url, "/tienda1/publico/anadir.jsp");
        assert_eq!(sig.to_string(), "POST /tienda1/publico/anadir.jsp");
        assert!("GET".parse::<EndpointSignature>().is_err());
    }

    #[test]
    fn test_equality_ignores_labels_and_text() {
        let a = Request::new("GET", "/a")
            .with_query_params(map(&[("id", "1")]))
            .with_original_text("GET /a?id=1")
            .with_label(Label::Normal, None);
        let b = Request::new("GET", "/a").with_query_params(map(&[("id", "1")]));
        assert_eq!(a, b);

        let c = Request::new("GET", "/a").with_query_params(map(&[("id", "2")]));
        assert_ne!(a, c);
    }

    #[test]
    fn test_predicted_label_set_once() {
        let mut req = Request::new("GET", "/a");
        assert!(req.predicted_label().is_none());
        req.set_predicted_label(Label::Anomalous).unwrap();
        assert_eq!(req.predicted_label(), Some(Label::Anomalous));
        assert!(req.set_predicted_label(Label::Normal).is_err());
        assert_eq!(req.predicted_label(), Some(Label::Anomalous));
    }

    #[test]
    fn test_label_parsing() {
        assert_eq!("Normal".parse::<Label>().unwrap(), Label::Normal);
        assert_eq!(" anomalous ".parse::<Label>().unwrap(), Label::Anomalous);
        assert!("attack".parse::<Label>().is_err());
    }
}
