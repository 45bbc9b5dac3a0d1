//! Arena-backed doubly linked list ordering live entries from most to least
//! recently promoted.
//!
//! The list is only reachable through the cache's list mutex, so every method
//! here runs with that lock held.

use std::sync::Arc;

use super::entry::{Entry, EntryState};

struct Node<K, V> {
    entry: Arc<Entry<K, V>>,
    before: Option<usize>,
    after: Option<usize>,
}

pub(crate) struct RecencyList<K, V> {
    nodes: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    count: usize,
    weight: u64,
}

impl<K, V> RecencyList<K, V> {
    pub(crate) fn new() -> Self {
        Self { nodes: Vec::new(), free: Vec::new(), head: None, tail: None, count: 0, weight: 0 }
    }

    pub(crate) fn count(&self) -> usize {
        self.count
    }

    pub(crate) fn weight(&self) -> u64 {
        self.weight
    }

    pub(crate) fn head(&self) -> Option<&Arc<Entry<K, V>>> {
        self.head.and_then(|slot| self.node(slot)).map(|node| &node.entry)
    }

    pub(crate) fn tail(&self) -> Option<&Arc<Entry<K, V>>> {
        self.tail.and_then(|slot| self.node(slot)).map(|node| &node.entry)
    }

    /// The entry promoted just before `entry`, if `entry` is still linked.
    pub(crate) fn after(&self, entry: &Arc<Entry<K, V>>) -> Option<Arc<Entry<K, V>>> {
        let node = self.linked_node(entry)?;
        node.after.and_then(|slot| self.node(slot)).map(|next| Arc::clone(&next.entry))
    }

    /// Moves `entry` to the head. Returns false if the entry was already deleted.
    pub(crate) fn promote(&mut self, entry: &Arc<Entry<K, V>>) -> bool {
        match entry.state() {
            EntryState::Deleted => false,
            EntryState::New => {
                self.link_at_head(Arc::clone(entry));
                true
            }
            EntryState::Existing => {
                if self.head != Some(entry.slot()) {
                    if let Some(slot) = self.detach(entry) {
                        self.attach_at_head(slot);
                    }
                }
                true
            }
        }
    }

    /// Marks `entry` as deleted, unlinking it if it was linked.
    ///
    /// Returns true exactly once per entry, for the caller that should emit
    /// the removal notification.
    pub(crate) fn unlink(&mut self, entry: &Arc<Entry<K, V>>) -> bool {
        match entry.state() {
            EntryState::Deleted => false,
            EntryState::New => {
                entry.set_state(EntryState::Deleted);
                true
            }
            EntryState::Existing => {
                if let Some(slot) = self.detach(entry) {
                    self.nodes[slot] = None;
                    self.free.push(slot);
                    self.count = self.count.saturating_sub(1);
                    self.weight = self.weight.saturating_sub(entry.weight);
                }
                entry.set_state(EntryState::Deleted);
                entry.set_slot(usize::MAX);
                true
            }
        }
    }

    /// Unlinks every entry, returning them most recent first.
    pub(crate) fn drain(&mut self) -> Vec<Arc<Entry<K, V>>> {
        let mut drained = Vec::with_capacity(self.count);
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            match self.nodes.get_mut(slot).and_then(Option::take) {
                Some(node) => {
                    node.entry.set_state(EntryState::Deleted);
                    node.entry.set_slot(usize::MAX);
                    cursor = node.after;
                    drained.push(node.entry);
                }
                None => break,
            }
        }
        self.nodes.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        self.count = 0;
        self.weight = 0;
        drained
    }

    fn node(&self, slot: usize) -> Option<&Node<K, V>> {
        self.nodes.get(slot).and_then(Option::as_ref)
    }

    fn linked_node(&self, entry: &Arc<Entry<K, V>>) -> Option<&Node<K, V>> {
        if entry.state() != EntryState::Existing {
            return None;
        }
        self.node(entry.slot()).filter(|node| Arc::ptr_eq(&node.entry, entry))
    }

    fn link_at_head(&mut self, entry: Arc<Entry<K, V>>) {
        let weight = entry.weight;
        let node = Node { entry: Arc::clone(&entry), before: None, after: None };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                slot
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        entry.set_slot(slot);
        entry.set_state(EntryState::Existing);
        self.attach_at_head(slot);
        self.count += 1;
        self.weight = self.weight.saturating_add(weight);
    }

    /// Splices the node out of the chain, leaving it in the arena.
    fn detach(&mut self, entry: &Arc<Entry<K, V>>) -> Option<usize> {
        let slot = entry.slot();
        let (before, after) = {
            let node = self.linked_node(entry)?;
            (node.before, node.after)
        };

        match before {
            Some(prev) => {
                if let Some(node) = self.nodes[prev].as_mut() {
                    node.after = after;
                }
            }
            None => {
                debug_assert_eq!(self.head, Some(slot), "unlinked entry without predecessor must be the head");
                self.head = after;
            }
        }
        match after {
            Some(next) => {
                if let Some(node) = self.nodes[next].as_mut() {
                    node.before = before;
                }
            }
            None => {
                debug_assert_eq!(self.tail, Some(slot), "unlinked entry without successor must be the tail");
                self.tail = before;
            }
        }
        if let Some(node) = self.nodes[slot].as_mut() {
            node.before = None;
            node.after = None;
        }
        Some(slot)
    }

    fn attach_at_head(&mut self, slot: usize) {
        let old_head = self.head;
        if let Some(node) = self.nodes[slot].as_mut() {
            node.before = None;
            node.after = old_head;
        }
        match old_head {
            Some(h) => {
                if let Some(node) = self.nodes[h].as_mut() {
                    node.before = Some(slot);
                }
            }
            None => self.tail = Some(slot),
        }
        self.head = Some(slot);
    }
}
