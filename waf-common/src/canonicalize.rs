//! Normalization of raw header, query and body text into canonical maps

use crate::request::{FieldMap, Request};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use tracing::trace;

/// Headers injected by corpus replay tooling that must never reach a model
pub const DEFAULT_EXCLUDED_HEADERS: &[&str] = &[
    "x-proxy-test-ds-url",
    "x-proxy-test-req-class",
    "x-proxy-test-req-n",
];

const HEADER_PAIR_SEP: char = '\n';
const HEADER_KV_SEP: &str = ": ";
const PARAM_PAIR_SEP: char = '&';
const PARAM_KV_SEP: &str = "=";

/// Per-source key exclusion lists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Exclusions {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub query_params: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub body_params: Vec<String>,
}

impl Default for Exclusions {
    fn default() -> Self {
        Self {
            headers: DEFAULT_EXCLUDED_HEADERS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            query_params: Vec::new(),
            body_params: Vec::new(),
        }
    }
}

impl Exclusions {
    /// No exclusions at all
    pub fn none() -> Self {
        Self {
            headers: Vec::new(),
            query_params: Vec::new(),
            body_params: Vec::new(),
        }
    }
}

/// Turns raw request fragments into canonical key/value maps.
///
/// Rules shared by every source: elements are trimmed, keys lowercased, pairs
/// without a separator dropped, the last duplicate wins, and excluded keys are
/// removed. Query and body values are additionally percent-decoded.
#[derive(Debug, Clone)]
pub struct Canonicalizer {
    excluded_headers: Vec<String>,
    excluded_query: Vec<String>,
    excluded_body: Vec<String>,
}

impl Default for Canonicalizer {
    fn default() -> Self {
        Self::new(&Exclusions::default())
    }
}

impl Canonicalizer {
    pub fn new(exclusions: &Exclusions) -> Self {
        let normalize = |keys: &[String]| -> Vec<String> {
            keys.iter().map(|k| k.trim().to_lowercase()).collect()
        };
        Self {
            excluded_headers: normalize(&exclusions.headers),
            excluded_query: normalize(&exclusions.query_params),
            excluded_body: normalize(&exclusions.body_params),
        }
    }

    /// Parse a raw header block (`name: value` lines)
    pub fn headers(&self, raw: &str) -> FieldMap {
        split_pairs(
            raw,
            HEADER_PAIR_SEP,
            HEADER_KV_SEP,
            &self.excluded_headers,
            |v| Cow::Borrowed(v),
        )
    }

    /// Canonicalize header fields already split by an HTTP front end
    pub fn header_fields<'a, I>(&self, fields: I) -> FieldMap
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut map = FieldMap::new();
        for (name, value) in fields {
            map.insert(name.trim().to_lowercase(), value.trim().to_string());
        }
        remove_excluded(&mut map, &self.excluded_headers);
        map
    }

    /// Parse a raw query string (without the leading `?`)
    pub fn query(&self, raw: &str) -> FieldMap {
        split_pairs(
            raw,
            PARAM_PAIR_SEP,
            PARAM_KV_SEP,
            &self.excluded_query,
            decode_value,
        )
    }

    /// Parse a urlencoded request body
    pub fn body(&self, raw: &str) -> FieldMap {
        split_pairs(
            raw,
            PARAM_PAIR_SEP,
            PARAM_KV_SEP,
            &self.excluded_body,
            decode_value,
        )
    }

    /// Build a canonical request from raw fragments
    pub fn request(
        &self,
        method: &str,
        url: &str,
        raw_headers: &str,
        raw_query: &str,
        raw_body: &str,
    ) -> Request {
        Request::new(method, url)
            .with_headers(self.headers(raw_headers))
            .with_query_params(self.query(raw_query))
            .with_body_params(self.body(raw_body))
    }
}

fn split_pairs<F>(raw: &str, pair_sep: char, kv_sep: &str, excluded: &[String], decode: F) -> FieldMap
where
    F: for<'v> Fn(&'v str) -> Cow<'v, str>,
{
    let mut map = FieldMap::new();
    for element in raw.split(pair_sep) {
        let element = element.trim();
        if element.is_empty() {
            continue;
        }
        match element.split_once(kv_sep) {
            Some((key, value)) => {
                map.insert(key.trim().to_lowercase(), decode(value.trim()).into_owned());
            }
            None => trace!(element, "Dropping pair without separator"),
        }
    }
    remove_excluded(&mut map, excluded);
    map
}

fn remove_excluded(map: &mut FieldMap, excluded: &[String]) {
    for key in excluded {
        map.remove(key);
    }
}

/// Percent-decode a query/body value; `+` is a space, invalid UTF-8 is replaced
pub fn decode_value(value: &str) -> Cow<'_, str> {
    if !value.contains(['%', '+']) {
        return Cow::Borrowed(value);
    }
    let spaced = value.replace('+', " ");
    let decoded = urlencoding::decode_binary(spaced.as_bytes());
    Cow::Owned(String::from_utf8_lossy(&decoded).into_owned())
}

/// Render a header map back into a raw header block
pub fn render_headers(headers: &FieldMap) -> String {
    headers
        .iter()
        .map(|(k, v)| format!("{k}{HEADER_KV_SEP}{v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render a param map back into urlencoded form
pub fn render_params(params: &FieldMap) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}{PARAM_KV_SEP}{}", urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Text form of a canonical request used for whole-request features
pub fn render_request(request: &Request) -> String {
    let mut text = request.method().to_string();
    text.push(' ');
    text.push_str(request.url());
    if !request.query_params().is_empty() {
        text.push('?');
        text.push_str(&render_params(request.query_params()));
    }
    text.push('\n');
    text.push_str(&render_headers(request.headers()));
    if !request.body_params().is_empty() {
        text.push_str("\n\n");
        text.push_str(&render_params(request.body_params()));
    }
    text
}
