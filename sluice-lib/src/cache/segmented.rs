use ahash::RandomState;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use super::builder::{RemovalListener, Weigher};
use super::entry::{Entry, EntryState, RemovalNotification, RemovalReason};
use super::recency::RecencyList;
use super::segment::{CacheStats, Claim, LoadGuard, Lookup, PendingLoad, Segment, Slot};
use super::{hash, LoadError, SEGMENT_COUNT};
use crate::sync::{MutexExt, RwLockExt};

/// A bounded, thread-safe cache with LRU, weight and time based eviction.
///
/// Construct it through [`super::CacheBuilder`]. All operations are
/// synchronous and may briefly block on a segment lock or the recency list
/// lock. `count`, `weight` and `stats` are best-effort snapshots.
pub struct SegmentedCache<K, V> {
    segments: Box<[Segment<K, V>]>,
    hasher: RandomState,
    recency: Mutex<RecencyList<K, V>>,
    count: AtomicUsize,
    weight: AtomicU64,
    maximum_weight: Option<u64>,
    expire_after_access: Option<u64>,
    expire_after_write: Option<u64>,
    weigher: Weigher<K, V>,
    removal_listener: Option<RemovalListener<K, V>>,
    epoch: Instant,
}

impl<K, V> SegmentedCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub(crate) fn new(
        maximum_weight: Option<u64>,
        expire_after_access: Option<u64>,
        expire_after_write: Option<u64>,
        weigher: Weigher<K, V>,
        removal_listener: Option<RemovalListener<K, V>>,
    ) -> Self {
        let segments = (0..SEGMENT_COUNT).map(|_| Segment::new()).collect();
        Self {
            segments,
            hasher: RandomState::new(),
            recency: Mutex::new(RecencyList::new()),
            count: AtomicUsize::new(0),
            weight: AtomicU64::new(0),
            maximum_weight,
            expire_after_access,
            expire_after_write,
            weigher,
            removal_listener,
            epoch: Instant::now(),
        }
    }

    /// Returns the value for `key` if present and not expired, promoting it to
    /// most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        self.lookup(key, self.now()).ok().flatten().map(|entry| entry.value.clone())
    }

    /// Inserts `value`, replacing any previous value for `key`.
    pub fn put(&self, key: K, value: V) {
        let now = self.now();
        let weight = (self.weigher)(&key, &value);
        let entry = Arc::new(Entry::new(key, value, weight, now));
        let previous = self.segment_for(&entry.key).put(Arc::clone(&entry));

        let (replaced, evicted) = {
            let mut list = self.recency.acquire();
            let replaced = match previous {
                Some(Slot::Ready(old)) => list.unlink(&old).then_some(old),
                _ => None,
            };
            let evicted = if list.promote(&entry) { self.evict(&mut list, now) } else { Vec::new() };
            self.sync_counters(&list);
            (replaced, evicted)
        };

        if let Some(old) = replaced {
            self.notify(&old, RemovalReason::Replaced);
        }
        self.notify_all(&evicted, RemovalReason::Evicted);
    }

    /// Returns the cached value for `key`, loading it with `loader` if absent.
    ///
    /// At most one loader runs per key at a time: concurrent callers for the
    /// same missing key block until the first caller's load completes and
    /// then share its value or its error. A failed load is not cached, so a
    /// later call retries. The loader must not access the same key in this
    /// cache.
    pub fn compute_if_absent<F, E>(&self, key: K, loader: F) -> Result<V, LoadError>
    where
        F: FnOnce(&K) -> Result<V, E>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let now = self.now();
        let segment = self.segment_for(&key);
        loop {
            if let Some(entry) = self.lookup(&key, now)? {
                return Ok(entry.value.clone());
            }

            match segment.claim(&key) {
                Claim::Present(entry) => {
                    if let Some(value) = self.take_present(segment, &entry, now) {
                        return Ok(value);
                    }
                }
                Claim::Waiter(pending) => return pending.wait().map(|entry| entry.value.clone()),
                Claim::Leader(pending) => return self.load(segment, key, &pending, loader),
            }
        }
    }

    /// Removes `key`. Absent keys are a no-op and emit no notification.
    pub fn invalidate(&self, key: &K) {
        if let Some(Slot::Ready(entry)) = self.segment_for(key).remove(key) {
            let removed = {
                let mut list = self.recency.acquire();
                let removed = list.unlink(&entry);
                self.sync_counters(&list);
                removed
            };
            if removed {
                self.notify(&entry, RemovalReason::Invalidated);
            }
        }
    }

    /// Atomically clears every segment and the recency list, then reports
    /// each entry that was present as invalidated.
    pub fn invalidate_all(&self) {
        let removed = {
            let mut list = self.recency.acquire();
            let mut maps: Vec<_> =
                self.segments.iter().map(|segment| segment.map().acquire_write()).collect();

            let mut removed = Vec::new();
            for map in maps.iter_mut() {
                for (_, slot) in map.drain() {
                    // loaded but not yet promoted entries are only reachable from the map
                    if let Slot::Ready(entry) = slot {
                        if entry.state() == EntryState::New && list.unlink(&entry) {
                            removed.push(entry);
                        }
                    }
                }
            }
            let mut linked = list.drain();
            linked.append(&mut removed);
            self.sync_counters(&list);
            drop(maps);
            linked
        };
        self.notify_all(&removed, RemovalReason::Invalidated);
    }

    /// Runs pending weight and time based evictions now.
    pub fn refresh(&self) {
        let now = self.now();
        let evicted = {
            let mut list = self.recency.acquire();
            let evicted = self.evict(&mut list, now);
            self.sync_counters(&list);
            evicted
        };
        self.notify_all(&evicted, RemovalReason::Evicted);
    }

    /// Number of live entries.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.count()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Summed weight of the live entries.
    pub fn weight(&self) -> u64 {
        self.weight.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        for segment in self.segments.iter() {
            stats.add(&segment.stats);
        }
        stats
    }

    /// Iterates `(key, value)` pairs, most recently used first.
    ///
    /// The iterator is not isolated from concurrent mutation: entries promoted
    /// or removed by other threads while iterating may be skipped, repeated,
    /// or end the iteration early. Only [`Iter::remove`] is safe to combine
    /// with iteration.
    pub fn iter(&self) -> Iter<'_, K, V> {
        let head = self.recency.acquire().head().cloned();
        Iter { cache: self, current: None, next: head }
    }

    /// Keys, most recently used first. Same caveats as [`SegmentedCache::iter`].
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys { inner: self.iter() }
    }

    /// Values, most recently used first. Same caveats as [`SegmentedCache::iter`].
    pub fn values(&self) -> Values<'_, K, V> {
        Values { inner: self.iter() }
    }

    fn load<F, E>(
        &self,
        segment: &Segment<K, V>,
        key: K,
        pending: &Arc<PendingLoad<K, V>>,
        loader: F,
    ) -> Result<V, LoadError>
    where
        F: FnOnce(&K) -> Result<V, E>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let guard = LoadGuard::new(segment, key.clone(), pending);

        // no lock is held while the loader and the weigher run
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<(V, u64), LoadError> {
            let value = loader(&key).map_err(|err| LoadError::Failed(Arc::from(err.into())))?;
            let weight = (self.weigher)(&key, &value);
            Ok((value, weight))
        }))
        .unwrap_or(Err(LoadError::Panicked));

        match outcome {
            Ok((value, weight)) => {
                let now = self.now();
                let entry = Arc::new(Entry::new(key, value, weight, now));
                // waiters are released before any removal listener runs
                if guard.fulfil(&entry) {
                    self.promote(&entry, now);
                }
                Ok(entry.value.clone())
            }
            Err(err) => {
                tracing::debug!(error = %err, "cache loader failed, clearing placeholder");
                guard.fail(err.clone());
                Err(err)
            }
        }
    }

    /// Resolves `key` to a live entry. `Err` means the in-flight load this
    /// call waited on failed.
    fn lookup(&self, key: &K, now: u64) -> Result<Option<Arc<Entry<K, V>>>, LoadError> {
        let segment = self.segment_for(key);
        match segment.get(key, now, |entry| self.is_expired(entry, now)) {
            Lookup::Hit(entry) => {
                self.promote(&entry, now);
                Ok(Some(entry))
            }
            Lookup::Expired(entry) => {
                self.expire(segment, &entry);
                Ok(None)
            }
            Lookup::Failed(err) => Err(err),
            Lookup::Miss => Ok(None),
        }
    }

    /// Reads an entry that appeared between the lookup and the claim. An
    /// expired one is removed and yields `None`.
    fn take_present(&self, segment: &Segment<K, V>, entry: &Arc<Entry<K, V>>, now: u64) -> Option<V> {
        if self.is_expired(entry, now) {
            self.expire(segment, entry);
            return None;
        }
        entry.touch(now);
        self.promote(entry, now);
        Some(entry.value.clone())
    }

    /// Removes an expired `entry` if it is still the one stored under its key.
    fn expire(&self, segment: &Segment<K, V>, entry: &Arc<Entry<K, V>>) {
        if !segment.remove_entry(entry) {
            return;
        }
        let removed = {
            let mut list = self.recency.acquire();
            let removed = list.unlink(entry);
            self.sync_counters(&list);
            removed
        };
        if removed {
            segment.stats.eviction();
            self.notify(entry, RemovalReason::Evicted);
        }
    }

    fn promote(&self, entry: &Arc<Entry<K, V>>, now: u64) -> bool {
        let (promoted, evicted) = {
            let mut list = self.recency.acquire();
            let promoted = list.promote(entry);
            let evicted = if promoted { self.evict(&mut list, now) } else { Vec::new() };
            self.sync_counters(&list);
            (promoted, evicted)
        };
        self.notify_all(&evicted, RemovalReason::Evicted);
        promoted
    }

    /// Unlinks tail entries while the cache is over weight or the tail has
    /// expired. Runs with the list lock held; the returned entries still need
    /// their notifications.
    fn evict(&self, list: &mut RecencyList<K, V>, now: u64) -> Vec<Arc<Entry<K, V>>> {
        let mut evicted = Vec::new();
        while let Some(tail) = list.tail().cloned() {
            if !self.exceeds_weight(list) && !self.is_expired(&tail, now) {
                break;
            }
            let segment = self.segment_for(&tail.key);
            segment.remove_entry(&tail);
            if list.unlink(&tail) {
                segment.stats.eviction();
                evicted.push(tail);
            }
        }
        evicted
    }

    fn remove_current(&self, entry: &Arc<Entry<K, V>>) {
        self.segment_for(&entry.key).remove_entry(entry);
        let removed = {
            let mut list = self.recency.acquire();
            let removed = list.unlink(entry);
            self.sync_counters(&list);
            removed
        };
        if removed {
            self.notify(entry, RemovalReason::Invalidated);
        }
    }

    fn exceeds_weight(&self, list: &RecencyList<K, V>) -> bool {
        self.maximum_weight.is_some_and(|maximum| list.weight() > maximum)
    }

    fn is_expired(&self, entry: &Entry<K, V>, now: u64) -> bool {
        self.expire_after_access
            .is_some_and(|ttl| now.saturating_sub(entry.access_time()) > ttl)
            || self
                .expire_after_write
                .is_some_and(|ttl| now.saturating_sub(entry.write_time) > ttl)
    }

    fn now(&self) -> u64 {
        if self.expire_after_access.is_some() || self.expire_after_write.is_some() {
            u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
        } else {
            0
        }
    }

    fn segment_for(&self, key: &K) -> &Segment<K, V> {
        let index = (hash(key, &self.hasher) % SEGMENT_COUNT as u64) as usize;
        &self.segments[index]
    }

    fn sync_counters(&self, list: &RecencyList<K, V>) {
        self.count.store(list.count(), Ordering::Relaxed);
        self.weight.store(list.weight(), Ordering::Relaxed);
    }

    fn notify(&self, entry: &Entry<K, V>, reason: RemovalReason) {
        if let Some(listener) = &self.removal_listener {
            listener(RemovalNotification { key: &entry.key, value: &entry.value, reason });
        }
    }

    fn notify_all(&self, entries: &[Arc<Entry<K, V>>], reason: RemovalReason) {
        for entry in entries {
            self.notify(entry, reason);
        }
    }
}

/// Iterator over `(key, value)` pairs, most recently used first.
pub struct Iter<'a, K, V> {
    cache: &'a SegmentedCache<K, V>,
    current: Option<Arc<Entry<K, V>>>,
    next: Option<Arc<Entry<K, V>>>,
}

impl<K, V> Iter<'_, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn advance(&mut self) -> Option<&Arc<Entry<K, V>>> {
        let entry = self.next.take()?;
        self.next = self.cache.recency.acquire().after(&entry);
        self.current = Some(entry);
        self.current.as_ref()
    }

    /// Removes the element most recently returned by `next`, reporting it as
    /// invalidated. Calling it twice, or before `next`, does nothing.
    pub fn remove(&mut self) {
        if let Some(entry) = self.current.take() {
            self.cache.remove_current(&entry);
        }
    }
}

impl<K, V> Iterator for Iter<'_, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.advance().map(|entry| (entry.key.clone(), entry.value.clone()))
    }
}

/// Iterator over keys, most recently used first.
pub struct Keys<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<K, V> Keys<'_, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// See [`Iter::remove`].
    pub fn remove(&mut self) {
        self.inner.remove();
    }
}

impl<K, V> Iterator for Keys<'_, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    type Item = K;

    fn next(&mut self) -> Option<K> {
        self.inner.advance().map(|entry| entry.key.clone())
    }
}

/// Iterator over values, most recently used first.
pub struct Values<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<K, V> Iterator for Values<'_, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    type Item = V;

    fn next(&mut self) -> Option<V> {
        self.inner.advance().map(|entry| entry.value.clone())
    }
}
