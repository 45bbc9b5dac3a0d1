use ahash::AHashMap;
use serde::Deserialize;
use std::sync::Arc;

use super::key::{ContextSource, RateLimitKey, TimeUnit};
use crate::error::{Result, SluiceError};

/// Throttling declared for one protected operation.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ThrottlingPolicy {
    /// Stable identifier of the protected operation
    /// Example: "DemoService::compute" or "GET /api/orders"
    pub operation: String,
    /// Maximum number of calls per `time_unit`
    /// Default: 1
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Length of the sliding window
    /// Default: "seconds"
    #[serde(default)]
    pub time_unit: TimeUnit,
    /// Where the per-call context value comes from
    /// Default: { type = "remote_addr" }
    #[serde(default)]
    pub source: ContextSource,
}

fn default_limit() -> u32 {
    1
}

impl ThrottlingPolicy {
    pub fn new(operation: impl Into<String>, limit: u32, time_unit: TimeUnit) -> Self {
        Self { operation: operation.into(), limit, time_unit, source: ContextSource::default() }
    }

    pub fn with_source(mut self, source: ContextSource) -> Self {
        self.source = source;
        self
    }

    /// Key for one call, given its evaluated context value.
    pub fn key_for(&self, context: Option<String>) -> RateLimitKey {
        RateLimitKey::builder(self.operation.as_str())
            .limit(self.limit)
            .time_unit(self.time_unit)
            .source(self.source.clone())
            .maybe_context(context)
            .build()
    }
}

/// Read-only table of policies by operation, built once at startup.
#[derive(Debug, Default, Clone)]
pub struct PolicyRegistry {
    policies: AHashMap<String, Arc<ThrottlingPolicy>>,
}

impl PolicyRegistry {
    /// Fails on duplicate operations.
    pub fn new(policies: impl IntoIterator<Item = ThrottlingPolicy>) -> Result<Self> {
        let mut map = AHashMap::new();
        for policy in policies {
            let operation = policy.operation.clone();
            if map.insert(operation.clone(), Arc::new(policy)).is_some() {
                return Err(SluiceError::Config(format!(
                    "Duplicate throttling policy for operation: {operation}"
                )));
            }
        }
        Ok(Self { policies: map })
    }

    pub fn get(&self, operation: &str) -> Option<Arc<ThrottlingPolicy>> {
        self.policies.get(operation).cloned()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn operations(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }
}
