//! Per-identity rate limiting for Sluice.
//!
//! # Architecture
//!
//! The rate limiting system consists of four components:
//!
//! 1. **RateLimitKey** (`key.rs`): immutable identity of a bucket. The
//!    operation, its limit and window unit, the context source and the
//!    evaluated context value (header, cookie, principal, peer address or
//!    expression result) all take part in equality.
//!
//! 2. **RateWindowCounter** (`window.rs`): strict sliding window holding the
//!    timestamps of admitted calls. A call is admitted while fewer than
//!    `limit` calls happened in the trailing window.
//!
//! 3. **RateLimiterService** (`limiter.rs`): keeps one counter per key in a
//!    bounded [`crate::cache::SegmentedCache`], creates counters at most once
//!    per key, and fails open if a counter cannot be created.
//!
//! 4. **ThrottlingPolicy / PolicyRegistry** (`policy.rs`): declared limits
//!    per operation, loaded from configuration.
//!
//! # Example Usage
//!
//! ```ignore
//! use sluice_lib::rate_limit::{RateLimiterService, ThrottlingPolicy, TimeUnit};
//!
//! let service = RateLimiterService::new(10_000)?;
//! let policy = ThrottlingPolicy::new("DemoService::compute", 5, TimeUnit::Seconds);
//!
//! let key = policy.key_for(Some(peer.ip().to_string()));
//! if !service.check(&key) {
//!     // Return 429 Too Many Requests
//! }
//! ```
//!
//! # Configuration
//!
//! ```toml
//! [throttling]
//! lru_cache_capacity = 10000
//!
//! [[policies]]
//! operation = "DemoService::compute"
//! limit = 5
//! time_unit = "seconds"
//! source = { type = "header", name = "x-api-key" }
//! ```

mod key;
mod limiter;
mod policy;
mod window;

pub use key::{ContextSource, RateLimitKey, RateLimitKeyBuilder, TimeUnit};
pub use limiter::{
    BoxError, CounterLoader, RateLimitResult, RateLimiterService, RateLimiterServiceBuilder,
    DEFAULT_CAPACITY,
};
pub use policy::{PolicyRegistry, ThrottlingPolicy};
pub use window::{current_millis, RateWindowCounter};
