use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector for the admission gate
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,

    // Decision metrics
    total_requests: IntCounterVec,
    allowed_requests: IntCounterVec,
    denied_requests: IntCounterVec,

    // Store metrics
    store_failures: IntCounter,

    decision_duration: Histogram,
}

impl Metrics {
    /// Create a new metrics instance
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let total_requests = IntCounterVec::new(
            Opts::new(
                "admission_requests_total",
                "Total number of admission checks",
            ),
            &["resource", "operation"],
        )?;

        let allowed_requests = IntCounterVec::new(
            Opts::new(
                "admission_allowed_total",
                "Number of requests admitted",
            ),
            &["resource", "operation"],
        )?;

        let denied_requests = IntCounterVec::new(
            Opts::new(
                "admission_denied_total",
                "Number of requests denied with a retry-after",
            ),
            &["resource", "operation"],
        )?;

        let store_failures = IntCounter::new(
            "admission_store_failures_total",
            "Number of checks resolved by the store failure policy",
        )?;

        let decision_duration = Histogram::with_opts(HistogramOpts::new(
            "admission_decision_duration_seconds",
            "Duration of admission decisions in seconds",
        ))?;

        registry.register(Box::new(total_requests.clone()))?;
        registry.register(Box::new(allowed_requests.clone()))?;
        registry.register(Box::new(denied_requests.clone()))?;
        registry.register(Box::new(store_failures.clone()))?;
        registry.register(Box::new(decision_duration.clone()))?;

        Ok(Self {
            registry,
            total_requests,
            allowed_requests,
            denied_requests,
            store_failures,
            decision_duration,
        })
    }

    /// Get the Prometheus registry for this metrics instance
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_total_request(&self, resource: &str, operation: &str) {
        self.total_requests.with_label_values(&[resource, operation]).inc();
    }

    pub fn record_allowed_request(&self, resource: &str, operation: &str) {
        self.allowed_requests.with_label_values(&[resource, operation]).inc();
    }

    pub fn record_denied_request(&self, resource: &str, operation: &str) {
        self.denied_requests.with_label_values(&[resource, operation]).inc();
    }

    pub fn record_store_failure(&self) {
        self.store_failures.inc();
    }

    /// Number of store failures seen so far
    pub fn store_failures(&self) -> u64 {
        self.store_failures.get()
    }

    /// Create a timer for measuring decision duration
    pub fn start_decision_timer(&self) -> prometheus::HistogramTimer {
        self.decision_duration.start_timer()
    }
}
