use std::sync::Arc;

use crate::{
    error::Result,
    limiter::{Decision, RateLimiter, RequestIdentity},
    metrics::Metrics,
};

/// HTTP status used to reject over-limit requests
pub const TOO_MANY_REQUESTS: u16 = 429;

/// Metric label for resources and operations no limit names
pub const OTHER_LABEL: &str = "other";

/// What the dispatcher should do with the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Run the handler as usual
    Proceed,
    /// Skip the handler and answer with `status` and `body`
    Reject {
        status: u16,
        retry_after_secs: u64,
        body: String,
    },
}

impl Verdict {
    fn from_decision(decision: Decision) -> Self {
        match decision {
            Decision::Allow => Verdict::Proceed,
            Decision::Deny { retry_after_secs } => Verdict::Reject {
                status: TOO_MANY_REQUESTS,
                retry_after_secs,
                body: rejection_body(retry_after_secs),
            },
        }
    }
}

/// Body sent with every rejection
pub fn rejection_body(retry_after_secs: u64) -> String {
    format!("Rate limit exceeded. Try again in {} seconds", retry_after_secs)
}

/// Entry point called by the dispatcher before a handler runs
pub struct AdmissionService {
    limiter: RateLimiter,
    metrics: Arc<Metrics>,
}

impl AdmissionService {
    /// Create a new admission service; the limiter reports store failures to `metrics`
    pub fn new(limiter: RateLimiter, metrics: Arc<Metrics>) -> Self {
        Self {
            limiter: limiter.with_metrics(metrics.clone()),
            metrics,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Check one request and tell the dispatcher whether to proceed
    pub async fn check(
        &self,
        resource: Option<&str>,
        operation: Option<&str>,
        client: &str,
    ) -> Verdict {
        let (resource_label, operation_label) = self.metric_labels(resource, operation);
        self.metrics
            .record_total_request(resource_label, operation_label);

        let timer = self.metrics.start_decision_timer();
        let request = RequestIdentity::new(resource, operation, client);
        let decision = self.limiter.evaluate(&request).await;
        drop(timer);

        match decision {
            Decision::Allow => self
                .metrics
                .record_allowed_request(resource_label, operation_label),
            Decision::Deny { .. } => self
                .metrics
                .record_denied_request(resource_label, operation_label),
        }

        Verdict::from_decision(decision)
    }

    /// Label values bounded by the registry: names no limit mentions fold
    /// into [`OTHER_LABEL`], so arbitrary paths cannot create new series.
    fn metric_labels<'a>(
        &self,
        resource: Option<&'a str>,
        operation: Option<&'a str>,
    ) -> (&'a str, &'a str) {
        let registry = self.limiter.registry();

        let resource_label = match resource {
            None => "",
            Some(r) if registry.has_resource(r) => r,
            Some(_) => OTHER_LABEL,
        };
        let operation_label = match (resource, operation) {
            (_, None) => "",
            (Some(r), Some(o)) if registry.has_operation(r, o) => o,
            (_, Some(_)) => OTHER_LABEL,
        };

        (resource_label, operation_label)
    }

    /// Health check for the backing counter store
    pub async fn health_check(&self) -> Result<()> {
        self.limiter.store().health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{registry::LimitRegistry, store::MemoryCounterStore};

    fn create_test_service(registry: LimitRegistry) -> AdmissionService {
        let store = Arc::new(MemoryCounterStore::new());
        let limiter = RateLimiter::new(Arc::new(registry), store);
        let metrics = Arc::new(Metrics::new().unwrap());

        AdmissionService::new(limiter, metrics)
    }

    #[test]
    fn test_rejection_body() {
        assert_eq!(
            rejection_body(7),
            "Rate limit exceeded. Try again in 7 seconds"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_rejects_with_429() {
        let mut registry = LimitRegistry::new();
        registry.register(2, 1, None, None).unwrap();
        let service = create_test_service(registry);

        assert_eq!(
            service.check(Some("home"), Some("index"), "10.0.0.1").await,
            Verdict::Proceed
        );
        assert_eq!(
            service.check(Some("home"), Some("index"), "10.0.0.1").await,
            Verdict::Reject {
                status: 429,
                retry_after_secs: 2,
                body: "Rate limit exceeded. Try again in 2 seconds".to_string(),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_records_metrics() {
        let mut registry = LimitRegistry::new();
        registry.register(60, 1, Some("home"), None).unwrap();
        let service = create_test_service(registry);

        service.check(Some("home"), None, "10.0.0.1").await;
        service.check(Some("home"), None, "10.0.0.1").await;

        let families = service.metrics().registry().gather();
        let denied = families
            .iter()
            .find(|f| f.get_name() == "admission_denied_total")
            .expect("denied counter registered");
        assert_eq!(denied.get_metric()[0].get_counter().get_value(), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_names_fold_into_other_label() {
        let mut registry = LimitRegistry::new();
        registry.register(60, 100, Some("home"), Some("index")).unwrap();
        let service = create_test_service(registry);

        service.check(Some("home"), Some("index"), "10.0.0.1").await;
        service.check(Some("home"), Some("show"), "10.0.0.1").await;
        for i in 0..20 {
            let path = format!("crawler-{}", i);
            service.check(Some(&path), Some("x"), "10.0.0.1").await;
        }

        let families = service.metrics().registry().gather();
        let total = families
            .iter()
            .find(|f| f.get_name() == "admission_requests_total")
            .expect("request counter registered");

        let mut series: Vec<(String, String, f64)> = total
            .get_metric()
            .iter()
            .map(|m| {
                let label = |name: &str| {
                    m.get_label()
                        .iter()
                        .find(|l| l.get_name() == name)
                        .map(|l| l.get_value().to_string())
                        .unwrap_or_default()
                };
                (label("resource"), label("operation"), m.get_counter().get_value())
            })
            .collect();
        series.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));

        assert_eq!(
            series,
            vec![
                ("home".to_string(), "index".to_string(), 1.0),
                ("home".to_string(), "other".to_string(), 1.0),
                ("other".to_string(), "other".to_string(), 20.0),
            ]
        );
    }

    #[tokio::test]
    async fn test_health_check_with_memory_store() {
        let service = create_test_service(LimitRegistry::new());
        assert!(service.health_check().await.is_ok());
    }
}
