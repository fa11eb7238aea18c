//! Byte-budgeted LRU cache shared between the reactor and the disk workers.
//!
//! Entries live in a slab-backed doubly linked list ordered by recency (head is
//! most recently used) plus a key index. Every operation takes the single
//! mutex, so `get`/`put` are linearizable per key and no caller can observe a
//! half-applied eviction.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use slab::Slab;

use crate::content::Content;

struct Node {
    key: String,
    value: Arc<Content>,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Default)]
struct LruList {
    index: HashMap<String, usize>,
    nodes: Slab<Node>,
    head: Option<usize>,
    tail: Option<usize>,
    size: usize,
}

impl LruList {
    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let node = &self.nodes[idx];
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }
        let node = &mut self.nodes[idx];
        node.prev = None;
        node.next = None;
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let node = &mut self.nodes[idx];
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            self.nodes[h].prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn remove(&mut self, idx: usize) -> Node {
        self.unlink(idx);
        let node = self.nodes.remove(idx);
        self.index.remove(&node.key);
        self.size -= node.value.weight();
        node
    }
}

/// Thread-safe LRU map from resource key to immutable content.
pub struct ContentCache {
    budget: usize,
    inner: Mutex<LruList>,
}

impl ContentCache {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            inner: Mutex::new(LruList::default()),
        }
    }

    /// Insert or replace `key`, mark it most recently used, then evict from
    /// the cold end until the tracked size fits the budget. The entry just
    /// inserted is never evicted by its own insertion, so a value larger than
    /// the whole budget stays resident (alone) until the next `put`.
    pub fn put(&self, key: impl Into<String>, value: Arc<Content>) {
        let key = key.into();
        let mut lru = self.inner.lock();

        if let Some(&idx) = lru.index.get(&key) {
            lru.remove(idx);
        }

        lru.size += value.weight();
        let idx = lru.nodes.insert(Node {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        });
        lru.push_front(idx);
        lru.index.insert(key, idx);

        while lru.size > self.budget {
            match lru.tail {
                Some(cold) if cold != idx => {
                    lru.remove(cold);
                }
                _ => break,
            }
        }
    }

    /// Shared handle to the cached value, promoting it to most recently used.
    pub fn get(&self, key: &str) -> Option<Arc<Content>> {
        let mut lru = self.inner.lock();
        let idx = *lru.index.get(key)?;
        lru.unlink(idx);
        lru.push_front(idx);
        Some(Arc::clone(&lru.nodes[idx].value))
    }

    /// Presence check that does not touch recency.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().index.contains_key(key)
    }

    /// Sum of entry weights currently tracked.
    pub fn size(&self) -> usize {
        self.inner.lock().size
    }

    pub fn len(&self) -> usize {
        self.inner.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Keys from most to least recently used.
    pub fn keys_by_recency(&self) -> Vec<String> {
        let lru = self.inner.lock();
        let mut keys = Vec::with_capacity(lru.nodes.len());
        let mut cursor = lru.head;
        while let Some(idx) = cursor {
            let node = &lru.nodes[idx];
            keys.push(node.key.clone());
            cursor = node.next;
        }
        keys
    }
}
