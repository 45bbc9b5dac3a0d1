use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use super::entry::RemovalNotification;
use super::SegmentedCache;
use crate::error::{Result, SluiceError};

/// Computes the weight an entry contributes towards `maximum_weight`.
pub type Weigher<K, V> = Arc<dyn Fn(&K, &V) -> u64 + Send + Sync>;

/// Called once for every entry that leaves the cache, outside of any lock.
pub type RemovalListener<K, V> = Arc<dyn Fn(RemovalNotification<'_, K, V>) + Send + Sync>;

/// Builder for [`SegmentedCache`]. Every option is optional.
///
/// # Example
/// ```ignore
/// let cache: SegmentedCache<String, u64> = CacheBuilder::new()
///     .maximum_weight(1024)
///     .weigher(|_key, value| *value)
///     .expire_after_access(Duration::from_secs(60))
///     .build()?;
/// ```
pub struct CacheBuilder<K, V> {
    maximum_weight: Option<u64>,
    expire_after_access: Option<Duration>,
    expire_after_write: Option<Duration>,
    weigher: Option<Weigher<K, V>>,
    removal_listener: Option<RemovalListener<K, V>>,
}

impl<K, V> Default for CacheBuilder<K, V> {
    fn default() -> Self {
        Self {
            maximum_weight: None,
            expire_after_access: None,
            expire_after_write: None,
            weigher: None,
            removal_listener: None,
        }
    }
}

impl<K, V> CacheBuilder<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Upper bound on the summed weight of all entries. Unset disables
    /// weight-based eviction.
    pub fn maximum_weight(mut self, maximum_weight: u64) -> Self {
        self.maximum_weight = Some(maximum_weight);
        self
    }

    /// Entries not read or written for longer than `ttl` are evicted.
    pub fn expire_after_access(mut self, ttl: Duration) -> Self {
        self.expire_after_access = Some(ttl);
        self
    }

    /// Entries older than `ttl` since insertion are evicted.
    pub fn expire_after_write(mut self, ttl: Duration) -> Self {
        self.expire_after_write = Some(ttl);
        self
    }

    /// Defaults to a constant weight of 1 per entry.
    pub fn weigher<F>(mut self, weigher: F) -> Self
    where
        F: Fn(&K, &V) -> u64 + Send + Sync + 'static,
    {
        self.weigher = Some(Arc::new(weigher));
        self
    }

    pub fn removal_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(RemovalNotification<'_, K, V>) + Send + Sync + 'static,
    {
        self.removal_listener = Some(Arc::new(listener));
        self
    }

    /// Validates the options and builds the cache.
    pub fn build(self) -> Result<SegmentedCache<K, V>> {
        let expire_after_access = positive_nanos("expire_after_access", self.expire_after_access)?;
        let expire_after_write = positive_nanos("expire_after_write", self.expire_after_write)?;
        let weigher: Weigher<K, V> = match self.weigher {
            Some(weigher) => weigher,
            None => Arc::new(|_: &K, _: &V| 1),
        };

        Ok(SegmentedCache::new(
            self.maximum_weight,
            expire_after_access,
            expire_after_write,
            weigher,
            self.removal_listener,
        ))
    }
}

fn positive_nanos(name: &str, ttl: Option<Duration>) -> Result<Option<u64>> {
    match ttl {
        None => Ok(None),
        Some(ttl) if ttl.is_zero() => Err(SluiceError::Config(format!("{name} must be > 0"))),
        Some(ttl) => Ok(Some(u64::try_from(ttl.as_nanos()).unwrap_or(u64::MAX))),
    }
}
