use ahash::AHashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};

use super::entry::Entry;
use super::LoadError;
use crate::sync::{MutexExt, RwLockExt};

/// Outcome of an in-flight load, shared by the loader and every waiter.
pub(crate) enum LoadState<K, V> {
    Loading,
    Loaded(Arc<Entry<K, V>>),
    Failed(LoadError),
}

/// Placeholder published into a segment before a loader runs.
pub(crate) struct PendingLoad<K, V> {
    state: Mutex<LoadState<K, V>>,
    done: Condvar,
}

impl<K, V> PendingLoad<K, V> {
    pub(crate) fn new() -> Self {
        Self { state: Mutex::new(LoadState::Loading), done: Condvar::new() }
    }

    pub(crate) fn complete(&self, outcome: Result<Arc<Entry<K, V>>, LoadError>) {
        let mut state = self.state.acquire();
        *state = match outcome {
            Ok(entry) => LoadState::Loaded(entry),
            Err(err) => LoadState::Failed(err),
        };
        drop(state);
        self.done.notify_all();
    }

    /// Blocks until the loader publishes its outcome.
    pub(crate) fn wait(&self) -> Result<Arc<Entry<K, V>>, LoadError> {
        let mut state = self.state.acquire();
        loop {
            match &*state {
                LoadState::Loaded(entry) => return Ok(Arc::clone(entry)),
                LoadState::Failed(err) => return Err(err.clone()),
                LoadState::Loading => {
                    state = self.done.wait(state).unwrap_or_else(|poisoned| {
                        tracing::warn!("pending load poisoned, recovering guard");
                        poisoned.into_inner()
                    });
                }
            }
        }
    }
}

/// What a segment map holds for a key: a finished entry or a load in flight.
pub(crate) enum Slot<K, V> {
    Ready(Arc<Entry<K, V>>),
    Pending(Arc<PendingLoad<K, V>>),
}

impl<K, V> Clone for Slot<K, V> {
    fn clone(&self) -> Self {
        match self {
            Slot::Ready(entry) => Slot::Ready(Arc::clone(entry)),
            Slot::Pending(pending) => Slot::Pending(Arc::clone(pending)),
        }
    }
}

impl<K, V> Slot<K, V> {
    /// Resolves the slot to an entry, waiting on a pending load if needed.
    pub(crate) fn resolve(self) -> Result<Arc<Entry<K, V>>, LoadError> {
        match self {
            Slot::Ready(entry) => Ok(entry),
            Slot::Pending(pending) => pending.wait(),
        }
    }
}

#[derive(Default)]
pub(crate) struct SegmentStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl SegmentStats {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }
}

/// Aggregated, eventually consistent cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub(crate) fn add(&mut self, stats: &SegmentStats) {
        self.hits += stats.hits.load(Ordering::Relaxed);
        self.misses += stats.misses.load(Ordering::Relaxed);
        self.evictions += stats.evictions.load(Ordering::Relaxed);
    }
}

/// Result of looking a key up in its segment.
pub(crate) enum Lookup<K, V> {
    Hit(Arc<Entry<K, V>>),
    Expired(Arc<Entry<K, V>>),
    /// The in-flight load this lookup waited on failed.
    Failed(LoadError),
    Miss,
}

/// Result of trying to publish a placeholder for a missing key.
pub(crate) enum Claim<K, V> {
    /// The caller owns the load and must complete the placeholder.
    Leader(Arc<PendingLoad<K, V>>),
    /// Another caller is loading the key.
    Waiter(Arc<PendingLoad<K, V>>),
    /// An entry appeared between the lookup and the claim.
    Present(Arc<Entry<K, V>>),
}

/// One shard of the key space. Its lock guards only its map.
pub(crate) struct Segment<K, V> {
    map: RwLock<AHashMap<K, Slot<K, V>>>,
    pub(crate) stats: SegmentStats,
}

impl<K, V> Segment<K, V>
where
    K: Hash + Eq + Clone,
{
    pub(crate) fn new() -> Self {
        Self { map: RwLock::new(AHashMap::new()), stats: SegmentStats::default() }
    }

    /// Looks `key` up, waiting for an in-flight load outside the lock.
    /// Hits refresh the entry's access time. A load that fails while this
    /// call waits is reported as [`Lookup::Failed`].
    pub(crate) fn get<F>(&self, key: &K, now: u64, is_expired: F) -> Lookup<K, V>
    where
        F: Fn(&Entry<K, V>) -> bool,
    {
        let slot = self.map.acquire_read().get(key).cloned();
        match slot.map(Slot::resolve) {
            Some(Ok(entry)) if !is_expired(&entry) => {
                self.stats.hit();
                entry.touch(now);
                Lookup::Hit(entry)
            }
            Some(Ok(entry)) => {
                self.stats.miss();
                Lookup::Expired(entry)
            }
            Some(Err(err)) => {
                self.stats.miss();
                Lookup::Failed(err)
            }
            None => {
                self.stats.miss();
                Lookup::Miss
            }
        }
    }

    /// Inserts `entry`, returning whatever was stored under its key before.
    pub(crate) fn put(&self, entry: Arc<Entry<K, V>>) -> Option<Slot<K, V>> {
        self.map.acquire_write().insert(entry.key.clone(), Slot::Ready(entry))
    }

    /// Publishes a placeholder for `key` unless something is already there.
    pub(crate) fn claim(&self, key: &K) -> Claim<K, V> {
        let mut map = self.map.acquire_write();
        match map.get(key) {
            Some(Slot::Pending(pending)) => Claim::Waiter(Arc::clone(pending)),
            Some(Slot::Ready(entry)) => Claim::Present(Arc::clone(entry)),
            None => {
                let pending = Arc::new(PendingLoad::new());
                map.insert(key.clone(), Slot::Pending(Arc::clone(&pending)));
                Claim::Leader(pending)
            }
        }
    }

    /// Replaces the caller's placeholder with the loaded entry. Returns false
    /// if the placeholder was removed while the loader ran.
    pub(crate) fn fulfil(&self, pending: &Arc<PendingLoad<K, V>>, entry: &Arc<Entry<K, V>>) -> bool {
        let mut map = self.map.acquire_write();
        let Some(slot) = map.get_mut(&entry.key) else {
            return false;
        };
        if !slot.is_same_pending(pending) {
            return false;
        }
        *slot = Slot::Ready(Arc::clone(entry));
        true
    }

    /// Drops the caller's placeholder after a failed load so a later call can retry.
    pub(crate) fn abandon(&self, key: &K, pending: &Arc<PendingLoad<K, V>>) {
        let mut map = self.map.acquire_write();
        if map.get(key).is_some_and(|slot| slot.is_same_pending(pending)) {
            map.remove(key);
        }
    }

    /// Removes whatever is stored under `key`.
    pub(crate) fn remove(&self, key: &K) -> Option<Slot<K, V>> {
        self.map.acquire_write().remove(key)
    }

    /// Removes `entry` only if it is still the value stored under its key.
    pub(crate) fn remove_entry(&self, entry: &Arc<Entry<K, V>>) -> bool {
        let mut map = self.map.acquire_write();
        if map.get(&entry.key).is_some_and(|slot| slot.is_same_entry(entry)) {
            map.remove(&entry.key);
            true
        } else {
            false
        }
    }

    pub(crate) fn map(&self) -> &RwLock<AHashMap<K, Slot<K, V>>> {
        &self.map
    }
}

/// Owns a published placeholder until its load outcome is known.
///
/// Dropping an unfinished guard (the leader unwound after the placeholder was
/// published) removes the placeholder and fails every waiter with
/// [`LoadError::Panicked`], so the key never stays blocked.
pub(crate) struct LoadGuard<'a, K: Hash + Eq + Clone, V> {
    segment: &'a Segment<K, V>,
    key: K,
    pending: &'a Arc<PendingLoad<K, V>>,
    done: bool,
}

impl<'a, K: Hash + Eq + Clone, V> LoadGuard<'a, K, V> {
    pub(crate) fn new(segment: &'a Segment<K, V>, key: K, pending: &'a Arc<PendingLoad<K, V>>) -> Self {
        Self { segment, key, pending, done: false }
    }

    /// Replaces the placeholder with `entry` and wakes the waiters. Returns
    /// false if the placeholder was removed while the loader ran.
    pub(crate) fn fulfil(mut self, entry: &Arc<Entry<K, V>>) -> bool {
        let fulfilled = self.segment.fulfil(self.pending, entry);
        self.pending.complete(Ok(Arc::clone(entry)));
        self.done = true;
        fulfilled
    }

    /// Drops the placeholder and hands `err` to the waiters.
    pub(crate) fn fail(mut self, err: LoadError) {
        self.segment.abandon(&self.key, self.pending);
        self.pending.complete(Err(err));
        self.done = true;
    }
}

impl<K: Hash + Eq + Clone, V> Drop for LoadGuard<'_, K, V> {
    fn drop(&mut self) {
        if !self.done {
            tracing::warn!("cache load unwound before completing, failing waiters");
            self.segment.abandon(&self.key, self.pending);
            self.pending.complete(Err(LoadError::Panicked));
        }
    }
}

impl<K, V> Slot<K, V> {
    fn is_same_pending(&self, pending: &Arc<PendingLoad<K, V>>) -> bool {
        matches!(self, Slot::Pending(p) if Arc::ptr_eq(p, pending))
    }

    fn is_same_entry(&self, entry: &Arc<Entry<K, V>>) -> bool {
        matches!(self, Slot::Ready(e) if Arc::ptr_eq(e, entry))
    }
}
