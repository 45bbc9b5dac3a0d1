use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};

/// Position of an entry relative to the recency list.
///
/// `New -> Existing -> Deleted`, and `New -> Deleted` when an entry is removed
/// before it was ever linked. A deleted entry is never linked again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum EntryState {
    New = 0,
    Existing = 1,
    Deleted = 2,
}

impl EntryState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => EntryState::New,
            1 => EntryState::Existing,
            _ => EntryState::Deleted,
        }
    }
}

/// A cached key/value pair.
///
/// `state` and `slot` are only written while the recency list lock is held;
/// they are atomics so that entries can be shared between segments and the
/// list without interior `unsafe`.
pub(crate) struct Entry<K, V> {
    pub(crate) key: K,
    pub(crate) value: V,
    pub(crate) weight: u64,
    pub(crate) write_time: u64,
    access_time: AtomicU64,
    state: AtomicU8,
    slot: AtomicUsize,
}

impl<K, V> Entry<K, V> {
    pub(crate) fn new(key: K, value: V, weight: u64, now: u64) -> Self {
        Self {
            key,
            value,
            weight,
            write_time: now,
            access_time: AtomicU64::new(now),
            state: AtomicU8::new(EntryState::New as u8),
            slot: AtomicUsize::new(usize::MAX),
        }
    }

    #[inline]
    pub(crate) fn access_time(&self) -> u64 {
        self.access_time.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn touch(&self, now: u64) {
        self.access_time.store(now, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn state(&self) -> EntryState {
        EntryState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_state(&self, state: EntryState) {
        self.state.store(state as u8, Ordering::Release);
    }

    #[inline]
    pub(crate) fn slot(&self) -> usize {
        self.slot.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_slot(&self, slot: usize) {
        self.slot.store(slot, Ordering::Release);
    }
}

/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemovalReason {
    /// Removed by the weight bound or because it expired.
    Evicted,
    /// Removed explicitly through `invalidate`, `invalidate_all` or an iterator.
    Invalidated,
    /// Overwritten by a `put` for the same key.
    Replaced,
}

impl RemovalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemovalReason::Evicted => "evicted",
            RemovalReason::Invalidated => "invalidated",
            RemovalReason::Replaced => "replaced",
        }
    }
}

/// Passed to the removal listener once the entry is no longer reachable.
#[derive(Debug)]
pub struct RemovalNotification<'a, K, V> {
    pub key: &'a K,
    pub value: &'a V,
    pub reason: RemovalReason,
}
