use std::fmt;

use crate::{
    error::{GateError, Result},
    utils::escape_segment,
};

/// Prefix used for counter keys when none is configured
pub const DEFAULT_KEY_PREFIX: &str = "limiting";

/// The breadth at which a limit applies
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Resource(String),
    Operation(String, String),
}

impl Scope {
    fn matches(&self, resource: Option<&str>, operation: Option<&str>) -> bool {
        match self {
            Scope::Global => true,
            Scope::Resource(r) => resource == Some(r.as_str()),
            Scope::Operation(r, o) => {
                resource == Some(r.as_str()) && operation == Some(o.as_str())
            }
        }
    }

    /// Rank used to order resolved limits: global, resource, operation.
    fn rank(&self) -> u8 {
        match self {
            Scope::Global => 0,
            Scope::Resource(_) => 1,
            Scope::Operation(_, _) => 2,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Global => write!(f, "global"),
            Scope::Resource(r) => write!(f, "resource {}", r),
            Scope::Operation(r, o) => write!(f, "operation {}#{}", r, o),
        }
    }
}

/// An immutable limit: at most `max_count` admitted requests per `window_secs`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limit {
    window_secs: u64,
    max_count: u64,
    scope: Scope,
    counter_key_template: String,
}

impl Limit {
    /// `occurrence` counts earlier registrations of the same scope and
    /// window. Repeats get a `.{n}` window suffix so each keeps its own
    /// counter while the first key stays unchanged.
    fn new(
        prefix: &str,
        window_secs: u64,
        max_count: u64,
        scope: Scope,
        occurrence: usize,
    ) -> Self {
        let window = match occurrence {
            0 => window_secs.to_string(),
            n => format!("{}.{}", window_secs, n + 1),
        };
        let counter_key_template = match &scope {
            Scope::Global => format!("{}:global:{}:", prefix, window),
            Scope::Resource(r) => {
                format!("{}:resource:{}:{}:", prefix, escape_segment(r), window)
            }
            Scope::Operation(r, o) => format!(
                "{}:operation:{}:{}:{}:",
                prefix,
                escape_segment(r),
                escape_segment(o),
                window
            ),
        };

        Self {
            window_secs,
            max_count,
            scope,
            counter_key_template,
        }
    }

    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    pub fn max_count(&self) -> u64 {
        self.max_count
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn counter_key_template(&self) -> &str {
        &self.counter_key_template
    }

    /// Store key counting this limit for one client
    pub fn counter_key(&self, client: &str) -> String {
        format!("{}{}", self.counter_key_template, client)
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} requests per {}s ({})",
            self.max_count, self.window_secs, self.scope
        )
    }
}

/// Registry of configured limits.
///
/// Limits are appended during startup and never mutated afterwards; share the
/// finished registry behind an `Arc`. Registering the same scope and window
/// twice is allowed and yields two limits evaluated and counted
/// independently. Nothing is deduplicated.
#[derive(Debug, Clone)]
pub struct LimitRegistry {
    prefix: String,
    limits: Vec<Limit>,
}

impl LimitRegistry {
    /// Create an empty registry using the default key prefix
    pub fn new() -> Self {
        Self::with_prefix(DEFAULT_KEY_PREFIX)
    }

    /// Create an empty registry whose counter keys start with `prefix`
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            limits: Vec::new(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Append a limit.
    ///
    /// `operation` is only meaningful together with `resource`; an
    /// operation-only limit is rejected, as is a zero-length window.
    pub fn register(
        &mut self,
        window_secs: u64,
        max_count: u64,
        resource: Option<&str>,
        operation: Option<&str>,
    ) -> Result<&Limit> {
        if window_secs == 0 {
            return Err(GateError::Misconfiguration(
                "limit window must be at least one second".to_string(),
            ));
        }

        let scope = match (resource, operation) {
            (None, None) => Scope::Global,
            (Some(r), None) => Scope::Resource(r.to_string()),
            (Some(r), Some(o)) => Scope::Operation(r.to_string(), o.to_string()),
            (None, Some(o)) => {
                return Err(GateError::Misconfiguration(format!(
                    "operation '{}' limited without a resource",
                    o
                )))
            }
        };

        let occurrence = self
            .limits
            .iter()
            .filter(|limit| limit.window_secs == window_secs && limit.scope == scope)
            .count();
        let limit = Limit::new(&self.prefix, window_secs, max_count, scope, occurrence);
        tracing::debug!("Registered limit: {}", limit);
        self.limits.push(limit);

        self.limits
            .last()
            .ok_or_else(|| GateError::Misconfiguration("limit was not stored".to_string()))
    }

    /// Whether any limit names `resource`
    pub fn has_resource(&self, resource: &str) -> bool {
        self.limits.iter().any(|limit| match &limit.scope {
            Scope::Global => false,
            Scope::Resource(r) | Scope::Operation(r, _) => r == resource,
        })
    }

    /// Whether any limit names the `resource#operation` pair
    pub fn has_operation(&self, resource: &str, operation: &str) -> bool {
        self.limits.iter().any(|limit| {
            matches!(&limit.scope, Scope::Operation(r, o) if r == resource && o == operation)
        })
    }

    /// All limits a request for `(resource, operation)` must satisfy: global
    /// limits, then resource limits, then operation limits, each group in
    /// registration order.
    pub fn resolve(&self, resource: Option<&str>, operation: Option<&str>) -> Vec<&Limit> {
        let mut resolved: Vec<&Limit> = self
            .limits
            .iter()
            .filter(|limit| limit.scope.matches(resource, operation))
            .collect();
        // stable sort keeps registration order within a scope
        resolved.sort_by_key(|limit| limit.scope.rank());
        resolved
    }

    pub fn iter(&self) -> impl Iterator<Item = &Limit> {
        self.limits.iter()
    }

    pub fn len(&self) -> usize {
        self.limits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }
}

impl Default for LimitRegistry {
    fn default() -> Self {
        Self::new()
    }
}
