use microhost_models::OrchestratorError;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

fn metric_err(e: prometheus::Error) -> OrchestratorError {
    OrchestratorError::internal(e.to_string())
}

pub struct PrometheusMetrics {
    registry: Registry,
    lifecycle_ops_total: IntCounterVec,
    builds_total: IntCounterVec,
    build_duration_seconds: Histogram,
    reconcile_cycles_total: IntCounter,
    reconcile_starts_total: IntCounter,
    reconcile_failures_total: IntCounter,
    reconcile_duration_seconds: Histogram,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self, OrchestratorError> {
        let registry = Registry::new();

        let lifecycle_ops_total = IntCounterVec::new(
            Opts::new(
                "microhost_lifecycle_operations_total",
                "Container lifecycle operations by operation and outcome",
            ),
            &["operation", "outcome"],
        )
        .map_err(metric_err)?;

        let builds_total = IntCounterVec::new(
            Opts::new("microhost_image_builds_total", "Image builds by outcome"),
            &["outcome"],
        )
        .map_err(metric_err)?;

        let build_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "microhost_image_build_duration_seconds",
                "Image build duration in seconds",
            )
            .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]),
        )
        .map_err(metric_err)?;

        let reconcile_cycles_total = IntCounter::new(
            "microhost_reconcile_cycles_total",
            "Completed reconciliation cycles",
        )
        .map_err(metric_err)?;

        let reconcile_starts_total = IntCounter::new(
            "microhost_reconcile_starts_total",
            "Containers started by the reconciler",
        )
        .map_err(metric_err)?;

        let reconcile_failures_total = IntCounter::new(
            "microhost_reconcile_failures_total",
            "Per-record reconciliation failures",
        )
        .map_err(metric_err)?;

        let reconcile_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "microhost_reconcile_duration_seconds",
            "Reconciliation cycle duration in seconds",
        ))
        .map_err(metric_err)?;

        registry
            .register(Box::new(lifecycle_ops_total.clone()))
            .map_err(metric_err)?;
        registry
            .register(Box::new(builds_total.clone()))
            .map_err(metric_err)?;
        registry
            .register(Box::new(build_duration_seconds.clone()))
            .map_err(metric_err)?;
        registry
            .register(Box::new(reconcile_cycles_total.clone()))
            .map_err(metric_err)?;
        registry
            .register(Box::new(reconcile_starts_total.clone()))
            .map_err(metric_err)?;
        registry
            .register(Box::new(reconcile_failures_total.clone()))
            .map_err(metric_err)?;
        registry
            .register(Box::new(reconcile_duration_seconds.clone()))
            .map_err(metric_err)?;

        Ok(Self {
            registry,
            lifecycle_ops_total,
            builds_total,
            build_duration_seconds,
            reconcile_cycles_total,
            reconcile_starts_total,
            reconcile_failures_total,
            reconcile_duration_seconds,
        })
    }

    pub fn record_operation(&self, operation: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.lifecycle_ops_total
            .with_label_values(&[operation, outcome])
            .inc();
    }

    pub fn record_build(&self, success: bool, duration_secs: f64) {
        let outcome = if success { "success" } else { "failure" };
        self.builds_total.with_label_values(&[outcome]).inc();
        self.build_duration_seconds.observe(duration_secs);
    }

    pub fn record_reconcile_cycle(&self, started: usize, failed: usize, duration_secs: f64) {
        self.reconcile_cycles_total.inc();
        self.reconcile_starts_total.inc_by(started as u64);
        self.reconcile_failures_total.inc_by(failed as u64);
        self.reconcile_duration_seconds.observe(duration_secs);
    }

    pub fn operation_count(&self, operation: &str, success: bool) -> u64 {
        let outcome = if success { "success" } else { "failure" };
        self.lifecycle_ops_total
            .with_label_values(&[operation, outcome])
            .get()
    }

    pub fn reconcile_cycles(&self) -> u64 {
        self.reconcile_cycles_total.get()
    }

    pub fn get_metrics(&self) -> Result<String, OrchestratorError> {
        let metric_families = self.registry.gather();
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(metric_err)?;

        String::from_utf8(buffer).map_err(|e| OrchestratorError::internal(e.to_string()))
    }
}
