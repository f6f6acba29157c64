//! Request lifecycle: filter hooks around a single upstream exchange

use crate::context::{InboundRequest, ProxyResponse, RequestContext, Stage};
use crate::hooks::FilterHook;
use crate::telemetry::{
    REQUESTS_BLOCKED, REQUESTS_FORWARDED, REQUESTS_NOT_IMPLEMENTED, REQUESTS_RECEIVED,
    UPSTREAM_ERRORS,
};
use crate::upstream::UpstreamClient;
use metrics::counter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, error, info, info_span, warn, Instrument};
use waf_common::{Canonicalizer, Request};

/// Drives each request through header filtering, body read, request
/// filtering, forwarding and response filtering.
///
/// Shared across connection tasks; the only mutable state is the request id
/// counter.
pub struct ProxyPipeline {
    hooks: Vec<Arc<dyn FilterHook>>,
    upstream: UpstreamClient,
    canonicalizer: Canonicalizer,
    max_body_bytes: usize,
    next_id: AtomicU64,
}

impl ProxyPipeline {
    pub fn new(upstream: UpstreamClient, canonicalizer: Canonicalizer, max_body_bytes: usize) -> Self {
        Self {
            hooks: Vec::new(),
            upstream,
            canonicalizer,
            max_body_bytes,
            next_id: AtomicU64::new(0),
        }
    }

    /// Append a hook; hooks run in the order they were added
    pub fn with_hook(mut self, hook: Arc<dyn FilterHook>) -> Self {
        info!(hook = hook.name(), "Registered filter hook");
        self.hooks.push(hook);
        self
    }

    pub fn upstream(&self) -> &UpstreamClient {
        &self.upstream
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Process one request whose body (if any) is readable from `body`.
    /// Always produces a response for the client.
    pub async fn handle<R>(&self, inbound: InboundRequest, body: &mut R) -> ProxyResponse
    where
        R: AsyncRead + Unpin,
    {
        let id = self.next_request_id();
        let ctx = RequestContext::new(id, inbound);
        self.process(ctx, body)
            .instrument(info_span!(
                "request",
                request_id = id,
                stage = Stage::Received.as_str()
            ))
            .await
    }

    async fn process<R>(&self, mut ctx: RequestContext, body: &mut R) -> ProxyResponse
    where
        R: AsyncRead + Unpin,
    {
        counter!(REQUESTS_RECEIVED, 1);
        info!(
            method = %ctx.inbound().method,
            path = %ctx.inbound().path,
            "Request received"
        );

        if let Err(e) = ctx.inbound().check_supported() {
            counter!(REQUESTS_NOT_IMPLEMENTED, 1);
            warn!(error = %e, "Rejecting request without reading body");
            let (status, reason) = e.status();
            ctx.set_response(status, reason);
            return finish(ctx, Stage::Sent);
        }

        for hook in &self.hooks {
            if ctx.has_response() {
                break;
            }
            hook.filter_request_headers(&mut ctx);
        }
        ctx.advance(Stage::HeadersFiltered);
        if ctx.has_response() {
            return blocked(ctx);
        }

        let length = match ctx.inbound().content_length() {
            Ok(length) => length,
            Err(e) => {
                warn!(error = %e, "Treating request as bodiless");
                0
            }
        };
        if length > self.max_body_bytes {
            warn!(length, limit = self.max_body_bytes, "Request body too large");
            ctx.set_response(413, "Payload Too Large");
            return blocked(ctx);
        }
        let mut bytes = vec![0u8; length];
        if let Err(e) = body.read_exact(&mut bytes).await {
            warn!(error = %e, "Failed to read request body");
            ctx.set_response(400, "Bad Request");
            return finish(ctx, Stage::Sent);
        }
        ctx.set_body(bytes);

        let request = self.canonicalize(&ctx);
        debug!(
            headers = ?request.headers(),
            query = ?request.query_params(),
            body = ?request.body_params(),
            "Canonical request"
        );
        ctx.set_request(request);
        ctx.advance(Stage::BodyRead);

        for hook in &self.hooks {
            if ctx.has_response() {
                break;
            }
            hook.filter_request(&mut ctx);
        }
        ctx.advance(Stage::RequestFiltered);
        if ctx.has_response() {
            return blocked(ctx);
        }

        counter!(REQUESTS_FORWARDED, 1);
        ctx.advance(Stage::Forwarded);
        let mut response = match self.upstream.forward(ctx.inbound(), ctx.body()).await {
            Ok(response) => response,
            Err(e) => {
                counter!(UPSTREAM_ERRORS, 1);
                error!(upstream = %self.upstream.addr(), error = %e, "Upstream exchange failed");
                let (status, reason) = e.status();
                ctx.set_response(status, reason);
                return finish(ctx, Stage::Sent);
            }
        };
        ctx.advance(Stage::ResponseReceived);
        debug!(status = response.status, bytes = response.body.len(), "Upstream response");

        for hook in &self.hooks {
            hook.filter_response(&ctx, &mut response);
        }
        ctx.advance(Stage::ResponseFiltered);

        ctx.replace_response(response);
        finish(ctx, Stage::Sent)
    }

    fn canonicalize(&self, ctx: &RequestContext) -> Request {
        let inbound = ctx.inbound();
        let headers = self
            .canonicalizer
            .header_fields(inbound.headers.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        let body = String::from_utf8_lossy(ctx.body());

        Request::new(&inbound.method, &inbound.path)
            .with_headers(headers)
            .with_query_params(self.canonicalizer.query(&inbound.query))
            .with_body_params(self.canonicalizer.body(&body))
    }
}

fn blocked(ctx: RequestContext) -> ProxyResponse {
    counter!(REQUESTS_BLOCKED, 1);
    finish(ctx, Stage::Blocked)
}

fn finish(mut ctx: RequestContext, stage: Stage) -> ProxyResponse {
    ctx.advance(stage);
    let response = ctx
        .take_response()
        .unwrap_or_else(|| ProxyResponse::plain(500, "Internal Server Error"));
    info!(status = response.status, "Request complete");
    response
}
