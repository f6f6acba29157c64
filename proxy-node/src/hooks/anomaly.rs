use super::FilterHook;
use crate::context::RequestContext;
use crate::telemetry::{REQUESTS_ANOMALOUS, SCORING_DURATION};
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};
use waf_common::ModelRegistry;

/// Scores each request against the model of its endpoint signature.
///
/// Endpoints without a model pass through untouched. Anomalous requests get
/// a 403 when blocking is enabled; otherwise the score is only logged.
pub struct AnomalyFilter {
    registry: Arc<ModelRegistry>,
    blocking_enabled: bool,
}

impl AnomalyFilter {
    pub fn new(registry: Arc<ModelRegistry>, blocking_enabled: bool) -> Self {
        Self {
            registry,
            blocking_enabled,
        }
    }

    pub fn blocking_enabled(&self) -> bool {
        self.blocking_enabled
    }
}

impl FilterHook for AnomalyFilter {
    fn name(&self) -> &'static str {
        "anomaly"
    }

    fn filter_request(&self, ctx: &mut RequestContext) {
        let Some(request) = ctx.request() else {
            return;
        };
        let signature = request.signature();
        let Some(model) = self.registry.lookup(&signature) else {
            debug!(signature = %signature, "No detection model, passing through");
            return;
        };

        let start = Instant::now();
        let features = model.features(request);
        for (name, value) in features.iter() {
            debug!(feature = %name, value, "Extracted feature");
        }
        let score = match model.score_features(&features) {
            Ok(score) => score,
            Err(e) => {
                error!(signature = %signature, error = %e, "Scoring failed, passing through");
                return;
            }
        };
        histogram!(SCORING_DURATION, start.elapsed().as_secs_f64());
        if let Some(request) = ctx.request_mut() {
            if let Err(e) = request.set_predicted_label(score.label) {
                debug!(error = %e, "Prediction already recorded");
            }
        }
        ctx.set_score(score);

        if !score.is_anomalous() {
            debug!(signature = %signature, score = score.decision, "Request scored normal");
            return;
        }

        counter!(REQUESTS_ANOMALOUS, 1);
        warn!(
            signature = %signature,
            score = score.decision,
            blocking = self.blocking_enabled,
            "Anomalous request"
        );
        if self.blocking_enabled {
            ctx.set_response(403, "Forbidden");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::InboundRequest;
    use trainer_node::{quick_fit, InMemoryCorpus, TrainSize, DEFAULT_SEED, QUICK_FIT};
    use waf_common::{Canonicalizer, Family, FieldSource, TransformerSpec};

    fn registry() -> Arc<ModelRegistry> {
        let c = Canonicalizer::default();
        let corpus: InMemoryCorpus = (0..60)
            .map(|i| c.request("GET", "/a", "", &format!("q={}", ["abc1", "abcd12", "abcde123"][i % 3]), ""))
            .collect();
        let specs = [
            TransformerSpec::new(FieldSource::QueryParams, Family::Length),
            TransformerSpec::new(FieldSource::QueryParams, Family::Entropy),
        ];
        Arc::new(quick_fit(&corpus, &specs, QUICK_FIT, TrainSize::Count(500), DEFAULT_SEED).unwrap())
    }

    fn context(method: &str, target: &str) -> RequestContext {
        let inbound = InboundRequest::from_target(method, target, Vec::new());
        let request = Canonicalizer::default().request(
            &inbound.method,
            &inbound.path,
            "",
            &inbound.query,
            "",
        );
        let mut ctx = RequestContext::new(1, inbound);
        ctx.set_request(request);
        ctx
    }

    #[test]
    fn test_anomalous_request_blocked() {
        let filter = AnomalyFilter::new(registry(), true);
        let mut ctx = context("GET", &format!("/a?q={}", "x".repeat(300)));
        filter.filter_request(&mut ctx);
        assert!(ctx.score().unwrap().is_anomalous());
        assert_eq!(ctx.request().unwrap().predicted_label(), Some(waf_common::Label::Anomalous));
        assert_eq!(ctx.response().unwrap().status, 403);
    }

    #[test]
    fn test_observe_only_mode_does_not_block() {
        let filter = AnomalyFilter::new(registry(), false);
        let mut ctx = context("GET", &format!("/a?q={}", "x".repeat(300)));
        filter.filter_request(&mut ctx);
        assert!(ctx.score().unwrap().is_anomalous());
        assert!(!ctx.has_response());
    }

    #[test]
    fn test_unknown_endpoint_passes_through() {
        let filter = AnomalyFilter::new(registry(), true);
        let mut ctx = context("POST", "/unknown?q=anything");
        filter.filter_request(&mut ctx);
        assert!(ctx.score().is_none());
        assert!(!ctx.has_response());
    }
}
