use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Unit whose single duration is the length of the sliding window.
///
/// A policy of `limit = 5, time_unit = Minutes` admits five calls per minute.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Milliseconds,
    #[default]
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    pub fn to_millis(self) -> u64 {
        match self {
            TimeUnit::Milliseconds => 1,
            TimeUnit::Seconds => 1_000,
            TimeUnit::Minutes => 60_000,
            TimeUnit::Hours => 3_600_000,
            TimeUnit::Days => 86_400_000,
        }
    }

    pub fn window(self) -> Duration {
        Duration::from_millis(self.to_millis())
    }
}

/// Where the per-call context value of a policy is taken from.
///
/// Resolving the value (reading a header, a cookie, the authenticated
/// principal, the peer address or evaluating an expression) is up to the
/// integration; the source only takes part in key equality so that two
/// policies on the same operation never share counters.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq, Hash, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContextSource {
    /// Client address of the caller
    #[default]
    RemoteAddr,
    /// Value of the named request header
    Header { name: String },
    /// Value of the named cookie
    Cookie { name: String },
    /// Name of the authenticated principal
    Principal,
    /// Result of an expression over the call arguments
    Expression { expression: String },
}

impl ContextSource {
    pub fn kind(&self) -> &'static str {
        match self {
            ContextSource::RemoteAddr => "remote_addr",
            ContextSource::Header { .. } => "header",
            ContextSource::Cookie { .. } => "cookie",
            ContextSource::Principal => "principal",
            ContextSource::Expression { .. } => "expression",
        }
    }

    /// Header or cookie name, or the expression text.
    pub fn name(&self) -> Option<&str> {
        match self {
            ContextSource::Header { name } | ContextSource::Cookie { name } => Some(name),
            ContextSource::Expression { expression } => Some(expression),
            ContextSource::RemoteAddr | ContextSource::Principal => None,
        }
    }
}

/// Identity of one rate-limited bucket.
///
/// Built fresh for every call. Two keys are equal when the operation, the
/// limit, the window unit, the context source and the evaluated context value
/// are all equal; a missing context value is a valid bucket of its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    operation: Arc<str>,
    limit: u32,
    time_unit: TimeUnit,
    source: ContextSource,
    context: Option<String>,
}

impl RateLimitKey {
    pub fn builder(operation: impl Into<Arc<str>>) -> RateLimitKeyBuilder {
        RateLimitKeyBuilder {
            operation: operation.into(),
            limit: 1,
            time_unit: TimeUnit::default(),
            source: ContextSource::default(),
            context: None,
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn time_unit(&self) -> TimeUnit {
        self.time_unit
    }

    pub fn window_millis(&self) -> u64 {
        self.time_unit.to_millis()
    }

    pub fn source(&self) -> &ContextSource {
        &self.source
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}/{:?}, {}={}]",
            self.operation,
            self.limit,
            self.time_unit,
            self.source.kind(),
            self.context.as_deref().unwrap_or("-")
        )
    }
}

pub struct RateLimitKeyBuilder {
    operation: Arc<str>,
    limit: u32,
    time_unit: TimeUnit,
    source: ContextSource,
    context: Option<String>,
}

impl RateLimitKeyBuilder {
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn time_unit(mut self, time_unit: TimeUnit) -> Self {
        self.time_unit = time_unit;
        self
    }

    pub fn source(mut self, source: ContextSource) -> Self {
        self.source = source;
        self
    }

    /// The evaluated context value.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// The evaluated context value; `None` when it could not be resolved.
    pub fn maybe_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    pub fn build(self) -> RateLimitKey {
        RateLimitKey {
            operation: self.operation,
            limit: self.limit,
            time_unit: self.time_unit,
            source: self.source,
            context: self.context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let key = RateLimitKey::builder("svc::op").build();
        assert_eq!(key.operation(), "svc::op");
        assert_eq!(key.limit(), 1);
        assert_eq!(key.time_unit(), TimeUnit::Seconds);
        assert_eq!(key.window_millis(), 1_000);
        assert_eq!(key.source(), &ContextSource::RemoteAddr);
        assert!(key.context().is_none());
    }

    #[test]
    fn test_time_unit_windows() {
        assert_eq!(TimeUnit::Milliseconds.window(), Duration::from_millis(1));
        assert_eq!(TimeUnit::Minutes.to_millis(), 60_000);
        assert_eq!(TimeUnit::Days.window(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_display() {
        let key = RateLimitKey::builder("svc::op")
            .limit(3)
            .source(ContextSource::Header { name: "x-api-key".to_string() })
            .context("abc")
            .build();
        assert_eq!(key.to_string(), "svc::op[3/Seconds, header=abc]");
    }
}
