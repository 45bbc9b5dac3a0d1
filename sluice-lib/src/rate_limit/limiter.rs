//! Rate limiter service binding the counter cache to per-key windows.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace};

use super::key::RateLimitKey;
use super::window::{current_millis, RateWindowCounter};
use crate::cache::{CacheBuilder, CacheStats, RemovalReason, SegmentedCache};
use crate::config::ThrottlingSettings;
use crate::error::{Result, SluiceError};
use crate::telemetry::Metrics;

/// Default number of distinct identities tracked at once.
pub const DEFAULT_CAPACITY: u64 = 10_000;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Creates the counter for an identity seen for the first time.
pub type CounterLoader =
    Arc<dyn Fn(&RateLimitKey) -> std::result::Result<RateWindowCounter, BoxError> + Send + Sync>;

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Call is allowed to proceed.
    Allowed {
        /// Maximum number of calls allowed in the window
        limit: u32,
        /// Number of calls remaining in the current window
        remaining: u32,
    },
    /// Call is rate limited and should be rejected.
    Limited {
        /// Maximum number of calls allowed in the window
        limit: u32,
        /// Number of calls remaining (always 0)
        remaining: u32,
        /// Time until the oldest admitted call leaves the window
        reset_after: Duration,
    },
}

impl RateLimitResult {
    /// Returns true if the call is allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed { .. })
    }

    /// Returns true if the call is limited.
    pub fn is_limited(&self) -> bool {
        matches!(self, RateLimitResult::Limited { .. })
    }

    /// Get the limit value.
    pub fn limit(&self) -> u32 {
        match self {
            RateLimitResult::Allowed { limit, .. } => *limit,
            RateLimitResult::Limited { limit, .. } => *limit,
        }
    }

    /// Get the remaining count.
    pub fn remaining(&self) -> u32 {
        match self {
            RateLimitResult::Allowed { remaining, .. } => *remaining,
            RateLimitResult::Limited { remaining, .. } => *remaining,
        }
    }

    /// Get the reset duration if limited.
    pub fn reset_after(&self) -> Option<Duration> {
        match self {
            RateLimitResult::Limited { reset_after, .. } => Some(*reset_after),
            _ => None,
        }
    }
}

/// Decides whether a call identified by a [`RateLimitKey`] may proceed.
///
/// Keeps one [`RateWindowCounter`] per distinct key in a bounded
/// [`SegmentedCache`]. Counters are created lazily, at most once per key even
/// under concurrent first calls. When the cache is full the least recently
/// used counter is dropped, which simply resets that identity's window.
///
/// # Example
/// ```ignore
/// let service = RateLimiterService::new(10_000)?;
/// let key = RateLimitKey::builder("DemoService::compute").limit(5).context("10.0.0.1").build();
/// if !service.check(&key) {
///     // reject with "too many requests"
/// }
/// ```
pub struct RateLimiterService {
    counters: SegmentedCache<RateLimitKey, Arc<RateWindowCounter>>,
    loader: CounterLoader,
    metrics: Option<Arc<Metrics>>,
}

impl RateLimiterService {
    /// Service tracking at most `capacity` identities.
    pub fn new(capacity: u64) -> Result<Self> {
        Self::builder().capacity(capacity).build()
    }

    pub fn builder() -> RateLimiterServiceBuilder {
        RateLimiterServiceBuilder::default()
    }

    /// Builds the service from the `[throttling]` configuration table.
    pub fn from_settings(settings: &ThrottlingSettings, metrics: Option<Arc<Metrics>>) -> Result<Self> {
        let mut builder = Self::builder().capacity(settings.lru_cache_capacity);
        if let Some(secs) = settings.expire_idle_secs {
            builder = builder.expire_idle(Duration::from_secs(secs));
        }
        if let Some(metrics) = metrics {
            builder = builder.metrics(metrics);
        }
        builder.build()
    }

    /// Returns true if the call may proceed.
    ///
    /// Never fails: if the counter for `key` cannot be created the call is
    /// logged and admitted.
    pub fn check(&self, key: &RateLimitKey) -> bool {
        self.check_detailed(key).is_allowed()
    }

    /// Like [`RateLimiterService::check`], reporting the remaining budget.
    pub fn check_detailed(&self, key: &RateLimitKey) -> RateLimitResult {
        let source = key.source().kind();
        if let Some(m) = &self.metrics {
            m.record_rate_limit_request(key.operation(), source);
        }

        let loader = &self.loader;
        let counter = match self
            .counters
            .compute_if_absent(key.clone(), |k| loader(k).map(Arc::new))
        {
            Ok(counter) => counter,
            Err(err) => {
                error!(%err, %key, "failed to load rate window counter, admitting call");
                if let Some(m) = &self.metrics {
                    m.record_rate_limit_fail_open(key.operation(), source);
                }
                return RateLimitResult::Allowed { limit: key.limit(), remaining: key.limit() };
            }
        };

        let now = current_millis();
        counter.prune(now);
        if counter.throttle_at(now) {
            if let Some(m) = &self.metrics {
                m.record_rate_limit_allowed(key.operation(), source);
            }
            RateLimitResult::Allowed { limit: counter.limit(), remaining: counter.remaining() }
        } else {
            debug!(%key, "rate limit exceeded");
            if let Some(m) = &self.metrics {
                m.record_rate_limit_rejection(key.operation(), source);
            }
            RateLimitResult::Limited {
                limit: counter.limit(),
                remaining: 0,
                reset_after: counter.reset_after(now),
            }
        }
    }

    /// Forgets the counter of `key`, giving the identity a fresh window.
    pub fn reset(&self, key: &RateLimitKey) {
        self.counters.invalidate(key);
    }

    /// Forgets every counter.
    pub fn reset_all(&self) {
        self.counters.invalidate_all();
    }

    /// Number of identities currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.counters.count()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.counters.stats()
    }
}

pub struct RateLimiterServiceBuilder {
    capacity: u64,
    expire_idle: Option<Duration>,
    loader: Option<CounterLoader>,
    metrics: Option<Arc<Metrics>>,
}

impl Default for RateLimiterServiceBuilder {
    fn default() -> Self {
        Self { capacity: DEFAULT_CAPACITY, expire_idle: None, loader: None, metrics: None }
    }
}

impl RateLimiterServiceBuilder {
    /// Maximum number of identities tracked at once. Must be positive.
    pub fn capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    /// Drop counters of identities not seen for `idle`.
    pub fn expire_idle(mut self, idle: Duration) -> Self {
        self.expire_idle = Some(idle);
        self
    }

    /// Replaces the default counter factory.
    pub fn loader<F>(mut self, loader: F) -> Self
    where
        F: Fn(&RateLimitKey) -> std::result::Result<RateWindowCounter, BoxError> + Send + Sync + 'static,
    {
        self.loader = Some(Arc::new(loader));
        self
    }

    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<RateLimiterService> {
        if self.capacity == 0 {
            return Err(SluiceError::Config("capacity must be > 0".into()));
        }
        let listener_metrics = self.metrics.clone();
        let mut cache = CacheBuilder::<RateLimitKey, Arc<RateWindowCounter>>::new()
            .maximum_weight(self.capacity)
            .removal_listener(move |notification| {
                if notification.reason == RemovalReason::Evicted {
                    trace!(key = %notification.key, "rate window counter evicted");
                }
                if let Some(m) = &listener_metrics {
                    m.record_cache_eviction(notification.reason.as_str());
                }
            });
        if let Some(idle) = self.expire_idle {
            cache = cache.expire_after_access(idle);
        }

        let loader: CounterLoader = match self.loader {
            Some(loader) => loader,
            None => Arc::new(|key: &RateLimitKey| -> std::result::Result<RateWindowCounter, BoxError> {
                debug!(%key, "creating rate window counter");
                Ok(RateWindowCounter::new(key.window_millis(), key.limit()))
            }),
        };

        Ok(RateLimiterService { counters: cache.build()?, loader, metrics: self.metrics })
    }
}
