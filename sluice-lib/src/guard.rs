//! Call guards placed in front of protected operations.

use std::sync::Arc;
use tracing::debug;

use crate::error::{Result, SluiceError};
use crate::rate_limit::{RateLimitResult, RateLimiterService, ThrottlingPolicy};

/// Admission check run before a protected operation.
pub trait CallGuard<C: ?Sized> {
    /// Returns true if the call described by `ctx` may proceed.
    fn admit(&self, ctx: &C) -> bool;
}

/// Throttles one operation according to its [`ThrottlingPolicy`].
///
/// The key builder evaluates the per-call context value (client address,
/// header, cookie, principal or expression result) from the call context
/// `C`. Returning `None` places the call in the operation's shared
/// "no context" bucket.
pub struct Throttled<B> {
    service: Arc<RateLimiterService>,
    policy: Arc<ThrottlingPolicy>,
    key_builder: B,
}

impl<B> Throttled<B> {
    pub fn new(service: Arc<RateLimiterService>, policy: Arc<ThrottlingPolicy>, key_builder: B) -> Self {
        Self { service, policy, key_builder }
    }

    pub fn policy(&self) -> &ThrottlingPolicy {
        &self.policy
    }

    /// Checks the call and reports the remaining budget.
    pub fn check<C: ?Sized>(&self, ctx: &C) -> RateLimitResult
    where
        B: Fn(&C) -> Option<String>,
    {
        let key = self.policy.key_for((self.key_builder)(ctx));
        self.service.check_detailed(&key)
    }

    /// Runs `f` if the call is admitted.
    ///
    /// Returns [`SluiceError::TooManyRequests`] without running `f` otherwise.
    pub fn call<C: ?Sized, T, F>(&self, ctx: &C, f: F) -> Result<T>
    where
        B: Fn(&C) -> Option<String>,
        F: FnOnce() -> T,
    {
        match self.check(ctx) {
            RateLimitResult::Allowed { .. } => Ok(f()),
            RateLimitResult::Limited { reset_after, .. } => {
                debug!(
                    operation = %self.policy.operation,
                    reset_after_ms = reset_after.as_millis() as u64,
                    "call rejected"
                );
                Err(SluiceError::TooManyRequests { operation: self.policy.operation.clone() })
            }
        }
    }
}

impl<C: ?Sized, B> CallGuard<C> for Throttled<B>
where
    B: Fn(&C) -> Option<String>,
{
    fn admit(&self, ctx: &C) -> bool {
        self.check(ctx).is_allowed()
    }
}
