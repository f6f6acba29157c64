//! Per-request state threaded through every proxy stage

use crate::error::{ProxyError, Result};
use std::fmt;
use tracing::{debug, Span};
use waf_common::{Request, Score};

/// Methods forwarded to the upstream
pub const SUPPORTED_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "HEAD"];

/// Headers that describe one hop and are never relayed
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// Request head as handed over by an HTTP front end
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRequest {
    pub method: String,
    pub scheme: String,
    pub path: String,
    /// Raw query string, without the leading `?`
    pub query: String,
    pub headers: Vec<(String, String)>,
}

impl InboundRequest {
    /// Build from a request-line target in origin form (`/p?q`) or absolute
    /// form (`http://host/p?q`). A `://` inside an origin-form path or query
    /// is not a scheme.
    pub fn from_target(method: &str, target: &str, headers: Vec<(String, String)>) -> Self {
        let absolute = target
            .find("://")
            .filter(|&end| !target.starts_with('/') && !target[..end].contains(['/', '?']));
        let (scheme, rest) = match absolute {
            Some(end) => {
                let authority = &target[end + 3..];
                let path_start = authority.find(['/', '?']).unwrap_or(authority.len());
                (target[..end].to_ascii_lowercase(), &authority[path_start..])
            }
            None => ("http".to_string(), target),
        };
        let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
        Self {
            method: method.to_string(),
            scheme,
            path: if path.is_empty() { "/".to_string() } else { path.to_string() },
            query: query.to_string(),
            headers,
        }
    }

    /// First header with `name`, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Declared body length; a missing header means no body
    pub fn content_length(&self) -> Result<usize> {
        match self.header("content-length") {
            None => Ok(0),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ProxyError::Parse(format!("invalid content-length '{raw}'"))),
        }
    }

    /// `Err(Protocol)` for methods and schemes the upstream contract excludes
    pub fn check_supported(&self) -> Result<()> {
        if !SUPPORTED_METHODS.contains(&self.method.as_str()) {
            return Err(ProxyError::Protocol(format!("method {}", self.method)));
        }
        if self.scheme != "http" {
            return Err(ProxyError::Protocol(format!("scheme {}", self.scheme)));
        }
        Ok(())
    }

    /// Path plus query, as sent on the upstream request line
    pub fn target(&self) -> String {
        if self.query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query)
        }
    }
}

/// Response relayed to (or generated for) the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ProxyResponse {
    /// Plain-text response whose body is `"{status} {reason}"`
    pub fn plain(status: u16, reason: &str) -> Self {
        Self {
            status,
            reason: reason.to_string(),
            headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
            body: format!("{status} {reason}").into_bytes(),
        }
    }

    pub fn forbidden() -> Self {
        Self::plain(403, "Forbidden")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Serialize for the client. Framing headers are regenerated and the
    /// connection is always closed afterwards.
    pub fn to_bytes(&self, include_body: bool) -> Vec<u8> {
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason);
        for (name, value) in &self.headers {
            if is_hop_by_hop(name) || name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        out.push_str("Connection: close\r\n\r\n");

        let mut bytes = out.into_bytes();
        if include_body {
            bytes.extend_from_slice(&self.body);
        }
        bytes
    }
}

/// Lifecycle position of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    HeadersFiltered,
    BodyRead,
    RequestFiltered,
    Forwarded,
    ResponseReceived,
    ResponseFiltered,
    Sent,
    Blocked,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::HeadersFiltered => "headers_filtered",
            Stage::BodyRead => "body_read",
            Stage::RequestFiltered => "request_filtered",
            Stage::Forwarded => "forwarded",
            Stage::ResponseReceived => "response_received",
            Stage::ResponseFiltered => "response_filtered",
            Stage::Sent => "sent",
            Stage::Blocked => "blocked",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Sent | Stage::Blocked)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything known about one in-flight request
#[derive(Debug)]
pub struct RequestContext {
    id: u64,
    stage: Stage,
    inbound: InboundRequest,
    body: Vec<u8>,
    request: Option<Request>,
    score: Option<Score>,
    response: Option<ProxyResponse>,
}

impl RequestContext {
    pub fn new(id: u64, inbound: InboundRequest) -> Self {
        Self {
            id,
            stage: Stage::Received,
            inbound,
            body: Vec::new(),
            request: None,
            score: None,
            response: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Move to `stage` and record it on the enclosing request span
    pub(crate) fn advance(&mut self, stage: Stage) {
        debug!(from = %self.stage, to = %stage, "Stage transition");
        self.stage = stage;
        Span::current().record("stage", stage.as_str());
    }

    pub fn inbound(&self) -> &InboundRequest {
        &self.inbound
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub(crate) fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }

    /// Canonical form of the request, available once the body has been read
    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    pub fn request_mut(&mut self) -> Option<&mut Request> {
        self.request.as_mut()
    }

    pub(crate) fn set_request(&mut self, request: Request) {
        self.request = Some(request);
    }

    pub fn score(&self) -> Option<&Score> {
        self.score.as_ref()
    }

    pub fn set_score(&mut self, score: Score) {
        self.score = Some(score);
    }

    pub fn has_response(&self) -> bool {
        self.response.is_some()
    }

    pub fn response(&self) -> Option<&ProxyResponse> {
        self.response.as_ref()
    }

    pub fn response_mut(&mut self) -> Option<&mut ProxyResponse> {
        self.response.as_mut()
    }

    /// Set a plain-text response; later stages are skipped
    pub fn set_response(&mut self, status: u16, reason: &str) {
        self.response = Some(ProxyResponse::plain(status, reason));
    }

    pub fn replace_response(&mut self, response: ProxyResponse) {
        self.response = Some(response);
    }

    pub(crate) fn take_response(&mut self) -> Option<ProxyResponse> {
        self.response.take()
    }
}
