//! Bounded most-recently-used registry of logical contexts
//!
//! Entries live in a slot arena threaded onto an intrusive doubly-linked list
//! (head = most recent, tail = least recent) with a `HashMap` index, so touch,
//! insert and eviction are all O(1).

use std::collections::HashMap;
use std::sync::Arc;

struct Node<V> {
    key: Arc<str>,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

pub struct LruRegistry<V> {
    index: HashMap<Arc<str>, usize>,
    slots: Vec<Option<Node<V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    max_entries: usize,
}

impl<V: Clone> LruRegistry<V> {
    pub fn new(max_entries: usize) -> Self {
        Self {
            index: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            max_entries: max_entries.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Look up `key`, creating it with `make` if absent, and mark it most recent
    ///
    /// Returns the entry's value and every entry evicted to get back within
    /// `max_entries`, least recent first. The touched entry is never evicted.
    pub fn touch_or_insert<F>(&mut self, key: &str, make: F) -> (V, Vec<(Arc<str>, V)>)
    where
        F: FnOnce(Arc<str>) -> V,
    {
        if let Some(&slot) = self.index.get(key) {
            self.move_to_front(slot);
            if let Some(node) = self.node(slot) {
                return (node.value.clone(), Vec::new());
            }
        }

        let key: Arc<str> = Arc::from(key);
        let value = make(key.clone());
        let slot = self.allocate(Node {
            key: key.clone(),
            value: value.clone(),
            prev: None,
            next: None,
        });
        self.index.insert(key, slot);
        self.push_front(slot);

        let mut evicted = Vec::new();
        while self.index.len() > self.max_entries {
            match self.pop_back() {
                Some(entry) => evicted.push(entry),
                None => break,
            }
        }

        (value, evicted)
    }

    /// Remove and return the least recently used entry
    pub fn pop_back(&mut self) -> Option<(Arc<str>, V)> {
        let slot = self.tail?;
        self.remove_slot(slot)
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        let slot = *self.index.get(key)?;
        self.remove_slot(slot).map(|(_, value)| value)
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        let slot = *self.index.get(key)?;
        self.node(slot).map(|node| &node.value)
    }

    /// Remove every entry, most recent first
    pub fn drain(&mut self) -> Vec<(Arc<str>, V)> {
        let mut entries = Vec::with_capacity(self.len());
        while let Some(slot) = self.head {
            match self.remove_slot(slot) {
                Some(entry) => entries.push(entry),
                None => break,
            }
        }
        entries
    }

    /// Keys ordered from most to least recently used
    pub fn keys(&self) -> Vec<Arc<str>> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(node) = cursor.and_then(|slot| self.node(slot)) {
            keys.push(node.key.clone());
            cursor = node.next;
        }
        keys
    }

    fn node(&self, slot: usize) -> Option<&Node<V>> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, slot: usize) -> Option<&mut Node<V>> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    fn allocate(&mut self, node: Node<V>) -> usize {
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

    fn remove_slot(&mut self, slot: usize) -> Option<(Arc<str>, V)> {
        self.unlink(slot);
        let node = self.slots.get_mut(slot)?.take()?;
        self.free.push(slot);
        self.index.remove(&node.key);
        Some((node.key, node.value))
    }

    fn unlink(&mut self, slot: usize) {
        let Some((prev, next)) = self.node(slot).map(|node| (node.prev, node.next)) else {
            return;
        };

        match prev {
            Some(p) => {
                if let Some(node) = self.node_mut(p) {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.node_mut(n) {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }

        if let Some(node) = self.node_mut(slot) {
            node.prev = None;
            node.next = None;
        }
    }

    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        if let Some(node) = self.node_mut(slot) {
            node.prev = None;
            node.next = old_head;
        }
        match old_head {
            Some(h) => {
                if let Some(node) = self.node_mut(h) {
                    node.prev = Some(slot);
                }
            }
            None => self.tail = Some(slot),
        }
        self.head = Some(slot);
    }

    fn move_to_front(&mut self, slot: usize) {
        if self.head == Some(slot) {
            return;
        }
        self.unlink(slot);
        self.push_front(slot);
    }
}
