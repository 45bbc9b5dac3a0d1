#![forbid(unsafe_code)]

pub mod cache;
pub mod config;
pub mod error;
pub mod guard;
pub mod rate_limit;
mod sync;
pub mod telemetry;

pub use cache::{CacheBuilder, LoadError, SegmentedCache};
pub use config::{load_from_path, Config};
pub use error::{Result, SluiceError};
pub use guard::{CallGuard, Throttled};
pub use rate_limit::{
    PolicyRegistry, RateLimitKey, RateLimitResult, RateLimiterService, ThrottlingPolicy, TimeUnit,
};
