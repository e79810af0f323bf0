//! Arena-backed least-recently-used map.
//!
//! Entries live in a slot vector and are threaded on an intrusive doubly
//! linked list ordered from most to least recently used. Lookup goes through
//! a hash index of slot positions, so touch, insert, remove and eviction are
//! all O(1). Freed slots are recycled through a free list.
//!
//! The `_with` variants take a `pinned` predicate. Pinned entries are skipped
//! by eviction, so the map can hold more than `capacity` entries while
//! enough of them are pinned.

use std::collections::HashMap;

#[derive(Debug)]
struct Slot<V> {
    key: String,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug)]
pub struct Lru<V> {
    slots: Vec<Option<Slot<V>>>,
    free: Vec<usize>,
    index: HashMap<String, usize>,
    /// Most recently used.
    head: Option<usize>,
    /// Least recently used.
    tail: Option<usize>,
    capacity: usize,
}

impl<V> Lru<V> {
    /// A capacity of zero stores nothing.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            head: None,
            tail: None,
            capacity,
        }
    }

    /// Number of entries, pinned ones included.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Membership test; does not touch recency.
    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Look up without changing recency.
    pub fn peek(&self, key: &str) -> Option<&V> {
        let idx = *self.index.get(key)?;
        self.slot(idx).map(|s| &s.value)
    }

    /// Mutable lookup without changing recency.
    pub fn peek_mut(&mut self, key: &str) -> Option<&mut V> {
        let idx = *self.index.get(key)?;
        self.slots[idx].as_mut().map(|s| &mut s.value)
    }

    /// Look up and mark as most recently used.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        let idx = *self.index.get(key)?;
        self.move_to_front(idx);
        self.slot(idx).map(|s| &s.value)
    }

    /// Insert or replace `key` as most recently used.
    ///
    /// Returns the entries pushed out to stay within capacity. With a
    /// capacity of zero the new entry itself is returned.
    pub fn insert(&mut self, key: String, value: V) -> Vec<(String, V)> {
        self.insert_with(key, value, |_| false)
    }

    /// [`insert`](Self::insert) that never evicts entries matching `pinned`.
    /// A pinned entry is stored even at capacity zero.
    pub fn insert_with(
        &mut self,
        key: String,
        value: V,
        pinned: impl Fn(&V) -> bool,
    ) -> Vec<(String, V)> {
        if self.capacity == 0 && !pinned(&value) {
            return vec![(key, value)];
        }
        if let Some(&idx) = self.index.get(&key) {
            if let Some(slot) = self.slots[idx].as_mut() {
                slot.value = value;
            }
            self.move_to_front(idx);
            return Vec::new();
        }

        let slot = Slot {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, idx);
        self.push_front(idx);
        self.shrink_with(pinned)
    }

    /// Remove `key` whether or not it is pinned.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        let idx = self.index.remove(key)?;
        self.unlink(idx);
        self.free.push(idx);
        self.slots[idx].take().map(|s| s.value)
    }

    /// Remove the least recently used entry.
    pub fn pop_lru(&mut self) -> Option<(String, V)> {
        let idx = self.tail?;
        self.take(idx)
    }

    /// Change the capacity, evicting least recently used entries to fit.
    pub fn set_capacity(&mut self, capacity: usize) -> Vec<(String, V)> {
        self.set_capacity_with(capacity, |_| false)
    }

    pub fn set_capacity_with(
        &mut self,
        capacity: usize,
        pinned: impl Fn(&V) -> bool,
    ) -> Vec<(String, V)> {
        self.capacity = capacity;
        self.shrink_with(pinned)
    }

    /// Evict unpinned entries, least recently used first, until the map is
    /// within capacity or only pinned entries are left over it.
    pub fn shrink_with(&mut self, pinned: impl Fn(&V) -> bool) -> Vec<(String, V)> {
        let mut evicted = Vec::new();
        let mut cursor = self.tail;
        while self.len() > self.capacity {
            let Some(idx) = cursor else {
                break;
            };
            let Some(slot) = self.slot(idx) else {
                break;
            };
            cursor = slot.prev;
            if pinned(&slot.value) {
                continue;
            }
            if let Some(entry) = self.take(idx) {
                evicted.push(entry);
            }
        }
        evicted
    }

    /// Remove every entry, pinned or not.
    pub fn clear(&mut self) -> Vec<(String, V)> {
        let mut evicted = Vec::with_capacity(self.len());
        while let Some(entry) = self.pop_lru() {
            evicted.push(entry);
        }
        evicted
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Keys<'_, V> {
        Keys {
            lru: self,
            cursor: self.head,
        }
    }

    fn take(&mut self, idx: usize) -> Option<(String, V)> {
        self.unlink(idx);
        self.free.push(idx);
        let slot = self.slots[idx].take()?;
        self.index.remove(&slot.key);
        Some((slot.key, slot.value))
    }

    fn slot(&self, idx: usize) -> Option<&Slot<V>> {
        self.slots.get(idx).and_then(Option::as_ref)
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(slot) = self.slots[idx].as_mut() {
            slot.prev = None;
            slot.next = old_head;
        }
        match old_head.and_then(|h| self.slots[h].as_mut()) {
            Some(head) => head.prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }

    fn unlink(&mut self, idx: usize) {
        let Some(slot) = self.slots[idx].as_mut() else {
            return;
        };
        let (prev, next) = (slot.prev.take(), slot.next.take());
        match prev.and_then(|p| self.slots[p].as_mut()) {
            Some(p) => p.next = next,
            None => self.head = next,
        }
        match next.and_then(|n| self.slots[n].as_mut()) {
            Some(n) => n.prev = prev,
            None => self.tail = prev,
        }
    }
}

/// Iterator over keys in recency order.
pub struct Keys<'a, V> {
    lru: &'a Lru<V>,
    cursor: Option<usize>,
}

impl<'a, V> Iterator for Keys<'a, V> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.lru.slot(self.cursor?)?;
        self.cursor = slot.next;
        Some(slot.key.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(keys: &[&str], capacity: usize) -> Lru<u32> {
        let mut lru = Lru::new(capacity);
        for (i, key) in keys.iter().enumerate() {
            lru.insert(key.to_string(), i as u32);
        }
        lru
    }

    fn order(lru: &Lru<u32>) -> Vec<&str> {
        lru.keys().collect()
    }

    #[test]
    fn test_insert_order() {
        let lru = filled(&["a", "b", "c"], 10);
        assert_eq!(order(&lru), vec!["c", "b", "a"]);
        assert_eq!(lru.len(), 3);
    }

    #[test]
    fn test_get_touches_peek_does_not() {
        let mut lru = filled(&["a", "b", "c"], 10);
        assert_eq!(lru.peek("a"), Some(&0));
        assert_eq!(order(&lru), vec!["c", "b", "a"]);
        assert_eq!(lru.get("a"), Some(&0));
        assert_eq!(order(&lru), vec!["a", "c", "b"]);
    }

    #[test]
    fn test_evicts_least_recent_by_access() {
        let mut lru = filled(&["a", "b", "c"], 3);
        lru.get("a");
        let evicted = lru.insert("d".into(), 3);
        assert_eq!(evicted, vec![("b".to_string(), 1)]);
        assert_eq!(order(&lru), vec!["d", "a", "c"]);
    }

    #[test]
    fn test_replace_keeps_single_entry() {
        let mut lru = filled(&["a", "b"], 2);
        assert!(lru.insert("a".into(), 9).is_empty());
        assert_eq!(lru.len(), 2);
        assert_eq!(lru.peek("a"), Some(&9));
        assert_eq!(order(&lru), vec!["a", "b"]);
    }

    #[test]
    fn test_shrink_evicts_lru_first() {
        let mut lru = filled(&["a", "b", "c", "d", "e"], 10);
        lru.get("b");
        let evicted: Vec<String> = lru.set_capacity(2).into_iter().map(|(k, _)| k).collect();
        assert_eq!(evicted, vec!["a", "c", "d"]);
        assert_eq!(order(&lru), vec!["b", "e"]);
        assert_eq!(lru.capacity(), 2);
    }

    #[test]
    fn test_remove_and_slot_reuse() {
        let mut lru = filled(&["a", "b", "c"], 10);
        assert_eq!(lru.remove("b"), Some(1));
        assert_eq!(lru.remove("b"), None);
        assert_eq!(order(&lru), vec!["c", "a"]);
        lru.insert("d".into(), 3);
        assert_eq!(lru.slots.len(), 3);
        assert_eq!(order(&lru), vec!["d", "c", "a"]);
    }

    #[test]
    fn test_remove_head_and_tail() {
        let mut lru = filled(&["a", "b", "c"], 10);
        lru.remove("c");
        lru.remove("a");
        assert_eq!(order(&lru), vec!["b"]);
        assert_eq!(lru.pop_lru(), Some(("b".to_string(), 1)));
        assert!(lru.is_empty());
        assert_eq!(lru.pop_lru(), None);
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let mut lru = Lru::new(0);
        let evicted = lru.insert("a".to_string(), 1);
        assert_eq!(evicted, vec![("a".to_string(), 1)]);
        assert!(lru.is_empty());
    }

    #[test]
    fn test_pinned_entries_survive_eviction() {
        // odd values are pinned
        let pinned = |v: &u32| v % 2 == 1;
        let mut lru = Lru::new(2);
        lru.insert_with("a".into(), 1, pinned);
        lru.insert_with("b".into(), 2, pinned);
        let evicted = lru.insert_with("c".into(), 4, pinned);
        assert_eq!(evicted, vec![("b".to_string(), 2)]);
        assert_eq!(order(&lru), vec!["c", "a"]);

        // every other entry pinned: the map grows past capacity
        let evicted = lru.insert_with("d".into(), 3, pinned);
        assert_eq!(evicted, vec![("c".to_string(), 4)]);
        assert!(lru.insert_with("e".into(), 5, pinned).is_empty());
        assert_eq!(lru.len(), 3);
        assert_eq!(order(&lru), vec!["e", "d", "a"]);

        // unpinning lets a later shrink catch up
        *lru.peek_mut("a").unwrap() = 6;
        assert_eq!(lru.shrink_with(pinned), vec![("a".to_string(), 6)]);
        assert_eq!(lru.len(), 2);
    }

    #[test]
    fn test_pinned_stored_at_zero_capacity() {
        let mut lru = Lru::new(0);
        assert!(lru.insert_with("a".to_string(), 1u32, |_| true).is_empty());
        assert_eq!(lru.peek("a"), Some(&1));
        assert_eq!(lru.set_capacity_with(0, |_| false).len(), 1);
        assert!(lru.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut lru = filled(&["a", "b"], 10);
        assert_eq!(lru.clear().len(), 2);
        assert!(lru.is_empty());
        assert_eq!(lru.keys().count(), 0);
    }
}
