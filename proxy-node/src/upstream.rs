//! One-shot HTTP/1.1 client for the origin server, on hyper's
//! connection-level API

use crate::context::{is_hop_by_hop, InboundRequest, ProxyResponse};
use crate::error::{ProxyError, Result};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::client::conn::http1;
use hyper::ext::ReasonPhrase;
use hyper::header::{CONNECTION, CONTENT_LENGTH, HOST};
use hyper::Request;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// Forwards requests to a fixed origin, one connection per exchange
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    addr: SocketAddr,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self { addr, timeout }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Send the request and read the full response within the configured
    /// timeout. Connection failures map to `Upstream`, expiry to `Timeout`.
    pub async fn forward(&self, inbound: &InboundRequest, body: &[u8]) -> Result<ProxyResponse> {
        let request = build_request(inbound, body, self.addr)?;
        match tokio::time::timeout(self.timeout, self.exchange(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProxyError::Timeout(format!(
                "upstream {} did not answer within {}ms",
                self.addr,
                self.timeout.as_millis()
            ))),
        }
    }

    async fn exchange(&self, request: Request<Full<Bytes>>) -> Result<ProxyResponse> {
        let stream = TcpStream::connect(self.addr)
            .await
            .map_err(|e| ProxyError::Upstream(format!("connect to {}: {e}", self.addr)))?;
        let (mut sender, connection) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| ProxyError::Upstream(format!("handshake with {}: {e}", self.addr)))?;
        debug!(upstream = %self.addr, "Connected to upstream");

        let upstream = self.addr;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(upstream = %upstream, error = %e, "Upstream connection ended with error");
            }
        });

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| ProxyError::Upstream(format!("exchange with {}: {e}", self.addr)))?;
        let (parts, incoming) = response.into_parts();
        let body = incoming
            .collect()
            .await
            .map_err(|e| ProxyError::Upstream(format!("response body from {}: {e}", self.addr)))?
            .to_bytes();

        let reason = parts
            .extensions
            .get::<ReasonPhrase>()
            .map(|phrase| String::from_utf8_lossy(phrase.as_bytes()).into_owned())
            .or_else(|| parts.status.canonical_reason().map(str::to_string))
            .unwrap_or_default();
        let headers = parts
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        Ok(ProxyResponse {
            status: parts.status.as_u16(),
            reason,
            headers,
            body: body.to_vec(),
        })
    }
}

/// Request for the origin. Hop-by-hop and framing headers are left to hyper;
/// the connection is never reused.
pub fn build_request(
    inbound: &InboundRequest,
    body: &[u8],
    upstream: SocketAddr,
) -> Result<Request<Full<Bytes>>> {
    let mut builder = Request::builder()
        .method(inbound.method.as_str())
        .uri(inbound.target());
    for (name, value) in &inbound.headers {
        if is_hop_by_hop(name) || name.eq_ignore_ascii_case(CONTENT_LENGTH.as_str()) {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_str());
    }
    if inbound.header(HOST.as_str()).is_none() {
        builder = builder.header(HOST, upstream.to_string());
    }
    builder
        .header(CONNECTION, "close")
        .body(Full::new(Bytes::copy_from_slice(body)))
        .map_err(|e| ProxyError::Parse(format!("request not representable upstream: {e}")))
}
