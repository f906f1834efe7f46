use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{
    error::Result,
    metrics::Metrics,
    registry::{Limit, LimitRegistry},
    store::CounterStore,
};

/// Who is asking and what for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIdentity {
    pub resource: Option<String>,
    pub operation: Option<String>,
    pub client: String,
}

impl RequestIdentity {
    pub fn new(
        resource: Option<impl Into<String>>,
        operation: Option<impl Into<String>>,
        client: impl Into<String>,
    ) -> Self {
        Self {
            resource: resource.map(Into::into),
            operation: operation.map(Into::into),
            client: client.into(),
        }
    }
}

/// Outcome of evaluating a request against every applicable limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { retry_after_secs: u64 },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// What to do when the counter store cannot be reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Admit the request and log the failure
    #[default]
    Open,
    /// Deny the request with a fixed retry-after
    Closed,
}

/// Retry-after reported when a fail-closed limiter cannot reach its store
pub const DEFAULT_FAILURE_RETRY_AFTER_SECS: u64 = 1;

/// Per-limit bookkeeping between the check and the commit phase
enum Pending<'a> {
    /// No live window: start one at 1 when admitted
    Reset(&'a Limit, String),
    /// Live and within budget: increment when admitted
    Increment(String),
}

/// Result of reading the counters of every applicable limit
enum Check<'a> {
    OverLimit { retry_after_secs: u64 },
    Admit(Vec<Pending<'a>>),
}

/// Fixed-window rate limiter evaluating the limits of a shared registry
pub struct RateLimiter {
    registry: Arc<LimitRegistry>,
    store: Arc<dyn CounterStore>,
    failure_policy: FailurePolicy,
    failure_retry_after_secs: u64,
    metrics: Option<Arc<Metrics>>,
}

impl RateLimiter {
    /// Create a fail-open limiter over `registry` and `store`
    pub fn new(registry: Arc<LimitRegistry>, store: Arc<dyn CounterStore>) -> Self {
        Self {
            registry,
            store,
            failure_policy: FailurePolicy::default(),
            failure_retry_after_secs: DEFAULT_FAILURE_RETRY_AFTER_SECS,
            metrics: None,
        }
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy, retry_after_secs: u64) -> Self {
        self.failure_policy = policy;
        self.failure_retry_after_secs = retry_after_secs;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn registry(&self) -> &LimitRegistry {
        &self.registry
    }

    pub fn store(&self) -> &dyn CounterStore {
        self.store.as_ref()
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// Decide whether the request may proceed.
    ///
    /// Store failures never surface as errors. While the limits are being
    /// checked they are resolved through the configured [`FailurePolicy`].
    /// Once every limit has passed the request is admitted even if recording
    /// it fails, so a denied request never leaves counters advanced.
    pub async fn evaluate(&self, request: &RequestIdentity) -> Decision {
        let pending = match self.check(request).await {
            Ok(Check::OverLimit { retry_after_secs }) => {
                return Decision::Deny { retry_after_secs }
            }
            Ok(Check::Admit(pending)) => pending,
            Err(e) => {
                self.record_store_failure();
                return match self.failure_policy {
                    FailurePolicy::Open => {
                        warn!(client = %request.client, "Counter store failed, admitting request: {}", e);
                        Decision::Allow
                    }
                    FailurePolicy::Closed => {
                        warn!(client = %request.client, "Counter store failed, denying request: {}", e);
                        Decision::Deny {
                            retry_after_secs: self.failure_retry_after_secs,
                        }
                    }
                };
            }
        };

        if let Err(e) = self.commit(pending).await {
            self.record_store_failure();
            warn!(client = %request.client, "Counter store failed while recording admitted request: {}", e);
        }
        Decision::Allow
    }

    fn record_store_failure(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.record_store_failure();
        }
    }

    /// Read every applicable counter without writing any
    async fn check<'a>(&'a self, request: &RequestIdentity) -> Result<Check<'a>> {
        let limits = self
            .registry
            .resolve(request.resource.as_deref(), request.operation.as_deref());
        debug!(
            resource = ?request.resource,
            operation = ?request.operation,
            "Applicable limits: {:?}",
            limits.iter().map(|l| l.to_string()).collect::<Vec<_>>()
        );

        let mut pending = Vec::with_capacity(limits.len());
        let mut max_wait: Option<u64> = None;

        for limit in limits {
            let key = limit.counter_key(&request.client);

            match self.store.get(&key).await? {
                None => pending.push(Pending::Reset(limit, key)),
                Some(count) if count < 0 || (count as u64) < limit.max_count() => {
                    pending.push(Pending::Increment(key))
                }
                Some(_) => {
                    let ttl = self.store.ttl(&key).await?;
                    if ttl <= 0 {
                        // window elapsed but the key has not been cleaned up
                        pending.push(Pending::Reset(limit, key));
                    } else {
                        let ttl = ttl as u64;
                        max_wait = Some(max_wait.map_or(ttl, |wait| wait.max(ttl)));
                    }
                }
            }
        }

        if let Some(retry_after_secs) = max_wait {
            debug!(client = %request.client, retry_after_secs, "Request over limit");
            return Ok(Check::OverLimit { retry_after_secs });
        }

        Ok(Check::Admit(pending))
    }

    /// Count an admitted request against every applicable limit
    async fn commit(&self, pending: Vec<Pending<'_>>) -> Result<()> {
        for entry in pending {
            match entry {
                Pending::Reset(limit, key) => {
                    self.store.reset(&key, 1, limit.window_secs()).await?;
                }
                Pending::Increment(key) => {
                    self.store.increment(&key).await?;
                }
            }
        }
        Ok(())
    }
}
