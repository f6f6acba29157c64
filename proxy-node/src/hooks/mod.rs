//! Filter hooks invoked at the three inspection points of the pipeline

mod anomaly;

pub use anomaly::AnomalyFilter;

use crate::context::{ProxyResponse, RequestContext};

/// Inspection callback registered with the pipeline.
///
/// Hooks run in registration order. A request hook that sets a response on
/// the context stops the remaining request hooks and skips the upstream.
pub trait FilterHook: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs before the body is read
    fn filter_request_headers(&self, _ctx: &mut RequestContext) {}

    /// Runs once the body is read and the canonical request is available
    fn filter_request(&self, _ctx: &mut RequestContext) {}

    /// Runs on the upstream response before it is relayed; may rewrite it
    fn filter_response(&self, _ctx: &RequestContext, _response: &mut ProxyResponse) {}
}
