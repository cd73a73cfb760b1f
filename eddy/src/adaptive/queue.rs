//! The pending-reader priority queue.
//!
//! A binary min-heap of `(start, reader)` entries ordered by timeline
//! position of `start`. Entries whose start has been spliced out compare as
//! minimal, so stale work surfaces immediately and the propagation loop can
//! discard it cheaply. The heap never reorders itself when a start dies;
//! that is sound because an entry's key only ever moves toward the minimum
//! (live to spliced), and relabeling preserves the order of live
//! timestamps, so heap order among live entries is stable.

use std::cmp::Ordering;

use super::timeline::Timeline;
use super::{ReaderKey, TimeKey};

/// A pending re-execution of a reader, keyed by its start timestamp.
#[derive(Clone, Copy, Debug)]
pub(crate) struct QueueEntry {
    pub start: TimeKey,
    pub reader: ReaderKey,
}

/// Min-heap of pending readers in timeline order.
pub(crate) struct ReaderQueue {
    heap: Vec<QueueEntry>,
}

impl ReaderQueue {
    pub fn new() -> Self {
        Self { heap: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    pub fn peek(&self) -> Option<QueueEntry> {
        self.heap.first().copied()
    }

    pub fn push(&mut self, entry: QueueEntry, timeline: &Timeline) {
        self.heap.push(entry);
        self.sift_up(self.heap.len() - 1, timeline);
    }

    pub fn pop(&mut self, timeline: &Timeline) -> Option<QueueEntry> {
        if self.heap.is_empty() {
            return None;
        }
        let entry = self.heap.swap_remove(0);
        if !self.heap.is_empty() {
            self.sift_down(0, timeline);
        }
        Some(entry)
    }

    /// Heap order: spliced-out starts first, then timeline order.
    fn less(timeline: &Timeline, a: QueueEntry, b: QueueEntry) -> bool {
        match (timeline.is_live(a.start), timeline.is_live(b.start)) {
            (false, false) => false,
            (false, true) => true,
            (true, false) => false,
            (true, true) => timeline.compare(a.start, b.start) == Ordering::Less,
        }
    }

    fn sift_up(&mut self, mut idx: usize, timeline: &Timeline) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if Self::less(timeline, self.heap[idx], self.heap[parent]) {
                self.heap.swap(idx, parent);
                idx = parent;
            } else {
                return;
            }
        }
    }

    fn sift_down(&mut self, mut idx: usize, timeline: &Timeline) {
        loop {
            let mut least = idx;
            for child in [2 * idx + 1, 2 * idx + 2] {
                if child < self.heap.len()
                    && Self::less(timeline, self.heap[child], self.heap[least])
                {
                    least = child;
                }
            }
            if least == idx {
                return;
            }
            self.heap.swap(idx, least);
            idx = least;
        }
    }
}

#[cfg(test)]
mod tests {
    use slotmap::SlotMap;

    use super::*;

    fn reader_keys(n: usize) -> Vec<ReaderKey> {
        // Readers are irrelevant to queue order; allocate keys from a
        // scratch arena.
        let mut arena: SlotMap<ReaderKey, ()> = SlotMap::with_key();
        (0..n).map(|_| arena.insert(())).collect()
    }

    #[test]
    fn pops_in_timeline_order() {
        let mut tl = Timeline::new();
        let times: Vec<_> = (0..5).map(|_| tl.tick()).collect();
        let readers = reader_keys(5);

        let mut queue = ReaderQueue::new();
        for &i in &[3, 0, 4, 1, 2] {
            queue.push(
                QueueEntry {
                    start: times[i],
                    reader: readers[i],
                },
                &tl,
            );
        }
        let order: Vec<_> = std::iter::from_fn(|| queue.pop(&tl))
            .map(|e| e.start)
            .collect();
        assert_eq!(order, times);
    }

    #[test]
    fn spliced_starts_surface_first() {
        let mut tl = Timeline::new();
        let lo = tl.tick();
        let dead = tl.tick();
        let live = tl.tick();
        let readers = reader_keys(2);

        let mut queue = ReaderQueue::new();
        queue.push(
            QueueEntry {
                start: live,
                reader: readers[0],
            },
            &tl,
        );
        queue.push(
            QueueEntry {
                start: dead,
                reader: readers[1],
            },
            &tl,
        );

        drop(tl.splice_out(lo, dead));
        let first = queue.pop(&tl).unwrap();
        assert_eq!(first.start, dead);
        assert!(!tl.is_live(first.start));
        let second = queue.pop(&tl).unwrap();
        assert_eq!(second.start, live);
        assert!(queue.is_empty());
    }
}
