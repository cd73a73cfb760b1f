//! An arena-backed doubly-linked list with stable handles.
//!
//! Cells and events keep their dependent callbacks in a [`DList`]: appends
//! and removals are O(1), and a handle stays valid (or harmlessly dead)
//! while other entries come and go. Handles are versioned [`slotmap`] keys,
//! so a handle to a removed entry can never alias a later insertion.

use slotmap::{Key as _, SlotMap};

slotmap::new_key_type! {
    /// Stable handle to an entry in a [`DList`].
    pub struct DListKey;
}

struct DNode<T> {
    item: T,
    prev: DListKey,
    next: DListKey,
}

/// A doubly-linked list over a slotmap arena.
///
/// Iteration order is insertion order. Callers that mutate the list while
/// walking it should snapshot the keys first and re-check [`DList::contains`]
/// before visiting each one; a removal (including self-removal) then simply
/// makes the stale key miss.
pub struct DList<T> {
    nodes: SlotMap<DListKey, DNode<T>>,
    head: DListKey,
    tail: DListKey,
}

impl<T> DList<T> {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            head: DListKey::null(),
            tail: DListKey::null(),
        }
    }

    /// Returns true if the list has no entries.
    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Appends `item` and returns its handle.
    pub fn push_back(&mut self, item: T) -> DListKey {
        let key = self.nodes.insert(DNode {
            item,
            prev: self.tail,
            next: DListKey::null(),
        });
        if self.tail.is_null() {
            self.head = key;
        } else {
            self.nodes[self.tail].next = key;
        }
        self.tail = key;
        key
    }

    /// Unlinks the entry behind `key`, returning its item. Removing an
    /// already-removed entry is a no-op returning `None`.
    pub fn remove(&mut self, key: DListKey) -> Option<T> {
        let node = self.nodes.remove(key)?;
        if node.prev.is_null() {
            self.head = node.next;
        } else {
            self.nodes[node.prev].next = node.next;
        }
        if node.next.is_null() {
            self.tail = node.prev;
        } else {
            self.nodes[node.next].prev = node.prev;
        }
        Some(node.item)
    }

    /// Returns true if `key` still names a live entry.
    pub fn contains(&self, key: DListKey) -> bool {
        self.nodes.contains_key(key)
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }
}

impl<T> Default for DList<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over a [`DList`], yielding `(handle, &item)` pairs.
pub struct Iter<'a, T> {
    list: &'a DList<T>,
    cursor: DListKey,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (DListKey, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.is_null() {
            return None;
        }
        let key = self.cursor;
        let node = &self.list.nodes[key];
        self.cursor = node.next;
        Some((key, &node.item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_iterate_in_order() {
        let mut list = DList::new();
        assert!(list.is_empty());
        let a = list.push_back("a");
        let b = list.push_back("b");
        let c = list.push_back("c");
        assert_eq!(list.len(), 3);
        let items: Vec<_> = list.iter().collect();
        assert_eq!(items, vec![(a, &"a"), (b, &"b"), (c, &"c")]);
    }

    #[test]
    fn remove_middle_and_ends() {
        let mut list = DList::new();
        let a = list.push_back(1);
        let b = list.push_back(2);
        let c = list.push_back(3);
        assert_eq!(list.remove(b), Some(2));
        assert_eq!(list.iter().map(|(_, v)| *v).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(list.remove(a), Some(1));
        assert_eq!(list.remove(c), Some(3));
        assert!(list.is_empty());
        // A dead handle stays dead.
        assert_eq!(list.remove(b), None);
        assert!(!list.contains(b));
    }

    #[test]
    fn snapshot_iteration_tolerates_removal() {
        let mut list = DList::new();
        let keys: Vec<_> = (0..4).map(|n| list.push_back(n)).collect();
        let snapshot: Vec<_> = list.iter().map(|(k, _)| k).collect();
        let mut seen = Vec::new();
        for key in snapshot {
            // Simulate a callback removing its successor mid-walk.
            if list.contains(key) {
                let item = *list.iter().find(|(k, _)| *k == key).map(|(_, v)| v).unwrap();
                seen.push(item);
                if item == 1 {
                    list.remove(keys[2]);
                }
            }
        }
        assert_eq!(seen, vec![0, 1, 3]);
    }

    #[test]
    fn reappend_after_removal_keeps_links_consistent() {
        let mut list = DList::new();
        let a = list.push_back("a");
        list.push_back("b");
        list.remove(a);
        list.push_back("c");
        let items: Vec<_> = list.iter().map(|(_, v)| *v).collect();
        assert_eq!(items, vec!["b", "c"]);
    }
}
