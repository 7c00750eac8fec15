// src/pool/lru.rs
//! Bounded least-recently-used store
//!
//! An arena of nodes threaded on a doubly-linked recency list, with a hash
//! index from key to slot. All single-key operations are O(1).
//!
//! ```text
//! head (LRU) ⇄ node ⇄ node ⇄ tail (MRU)
//! ```
//!
//! The store never unloads anything itself: every value it drops is handed
//! back to the caller, which owns the unload policy.

use crate::utils::errors::{PoolError, Result};
use std::collections::HashMap;
use std::hash::Hash;

struct Node<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Ordered, capacity-bounded map with most-recently-used at the tail
pub struct LruStore<K, V> {
    index: HashMap<K, usize>,
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    capacity: usize,
}

impl<K, V> LruStore<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a store holding at most `capacity` values
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(PoolError::InvalidCapacity(capacity));
        }
        Ok(Self {
            index: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: None,
            tail: None,
            capacity,
        })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look up `key` and mark it most recently used
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let slot = *self.index.get(key)?;
        self.move_to_tail(slot);
        self.slots[slot].as_ref().map(|node| &node.value)
    }

    /// Look up `key` without touching recency
    pub fn peek(&self, key: &K) -> Option<&V> {
        let slot = *self.index.get(key)?;
        self.slots[slot].as_ref().map(|node| &node.value)
    }

    /// Insert or replace `key` as most recently used
    ///
    /// Returns every value that left the store: the replaced value, if any,
    /// followed by evicted least-recently-used values.
    pub fn put(&mut self, key: K, value: V) -> Vec<(K, V)> {
        let mut removed = Vec::new();

        if let Some(old) = self.remove(&key) {
            removed.push((key.clone(), old));
        }

        let slot = self.alloc(Node {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        });
        self.index.insert(key, slot);
        self.link_tail(slot);

        removed.extend(self.evict_to(self.capacity));
        removed
    }

    /// Remove `key`, returning its value if it was present
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.index.remove(key)?;
        self.unlink(slot);
        let node = self.slots[slot].take()?;
        self.free.push(slot);
        Some(node.value)
    }

    /// Change capacity, evicting from the head until the store fits
    pub fn set_capacity(&mut self, capacity: usize) -> Result<Vec<(K, V)>> {
        if capacity == 0 {
            return Err(PoolError::InvalidCapacity(capacity));
        }
        self.capacity = capacity;
        Ok(self.evict_to(capacity))
    }

    /// Ordered copy of the contents, least recently used first
    pub fn snapshot(&self) -> Vec<(K, V)>
    where
        V: Clone,
    {
        self.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Keys, least recently used first
    pub fn keys(&self) -> Vec<K> {
        self.iter().map(|(k, _)| k.clone()).collect()
    }

    /// Remove everything, least recently used first
    pub fn drain(&mut self) -> Vec<(K, V)> {
        let mut drained = Vec::with_capacity(self.len());
        while let Some(entry) = self.pop_head() {
            drained.push(entry);
        }
        drained
    }

    /// Iterate least recently used first
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let node = self.slots[cursor?].as_ref()?;
            cursor = node.next;
            Some((&node.key, &node.value))
        })
    }

    fn evict_to(&mut self, capacity: usize) -> Vec<(K, V)> {
        let mut evicted = Vec::new();
        while self.len() > capacity {
            match self.pop_head() {
                Some(entry) => evicted.push(entry),
                None => break,
            }
        }
        evicted
    }

    fn pop_head(&mut self) -> Option<(K, V)> {
        let slot = self.head?;
        self.unlink(slot);
        let node = self.slots[slot].take()?;
        self.index.remove(&node.key);
        self.free.push(slot);
        Some((node.key, node.value))
    }

    fn alloc(&mut self, node: Node<K, V>) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        }
    }

    fn move_to_tail(&mut self, slot: usize) {
        if self.tail == Some(slot) {
            return;
        }
        self.unlink(slot);
        self.link_tail(slot);
    }

    fn link_tail(&mut self, slot: usize) {
        let old_tail = self.tail;
        if let Some(node) = self.slots[slot].as_mut() {
            node.prev = old_tail;
            node.next = None;
        }
        match old_tail {
            Some(t) => {
                if let Some(node) = self.slots[t].as_mut() {
                    node.next = Some(slot);
                }
            }
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = match self.slots[slot].as_ref() {
            Some(node) => (node.prev, node.next),
            None => return,
        };

        match prev {
            Some(p) => {
                if let Some(node) = self.slots[p].as_mut() {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.slots[n].as_mut() {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }

        if let Some(node) = self.slots[slot].as_mut() {
            node.prev = None;
            node.next = None;
        }
    }
}
