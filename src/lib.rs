//! Admission Gate
//!
//! Fixed-window request admission control. Limits apply globally, to a
//! resource, or to one operation of a resource; counters live in a shared
//! store (Redis) so every instance of an application enforces the same
//! budget per client.

pub mod config;
pub mod error;
pub mod http;
pub mod limiter;
pub mod metrics;
pub mod registry;
pub mod service;
pub mod store;
pub mod utils;

// Re-export main types
pub use error::{GateError, Result};
pub use limiter::{Decision, FailurePolicy, RateLimiter, RequestIdentity};
pub use registry::{Limit, LimitRegistry, Scope};
pub use service::{AdmissionService, Verdict};
pub use store::{CounterStore, MemoryCounterStore, RedisCounterStore};
