use crate::auth::TokenVerifier;
use microhost_control::Orchestrator;
use microhost_metrics::PrometheusMetrics;
use microhost_models::Config;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub orchestrator: Arc<Orchestrator>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub metrics: Arc<PrometheusMetrics>,
}

impl AppState {
    pub fn new(
        config: Config,
        orchestrator: Arc<Orchestrator>,
        verifier: Arc<dyn TokenVerifier>,
    ) -> Self {
        let metrics = orchestrator.metrics().clone();
        Self {
            config,
            orchestrator,
            verifier,
            metrics,
        }
    }
}
