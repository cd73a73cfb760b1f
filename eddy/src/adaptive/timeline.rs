//! The virtual-time timeline.
//!
//! Every computation point is assigned a timestamp on a single totally
//! ordered timeline. Timestamps support O(1) comparison and O(1) amortized
//! insertion after any live point, and a contiguous range can be *spliced
//! out*: unlinked, invalidated, and its cleanup actions collected in order.
//! Splice-out is how a reader's previous effects (subscriptions, nested
//! readers, memo entries) are discarded before it re-runs.
//!
//! The order-maintenance scheme is the usual practical one: each node
//! carries a `u64` label; insertion takes the midpoint of the neighboring
//! labels, and when a gap is exhausted a window of successors is relabeled
//! evenly. Order among live timestamps never changes, only the labels do.

use std::cmp::Ordering;

use slotmap::{Key as _, SlotMap};

use super::{Cleanup, TimeKey};

/// Label spacing used for appends and relabeling.
const LABEL_GAP: u64 = 1 << 20;

struct TimeNode {
    label: u64,
    prev: TimeKey,
    next: TimeKey,
    cleanups: Vec<Cleanup>,
}

/// The totally ordered set of live timestamps, plus the virtual clock `now`.
pub(crate) struct Timeline {
    nodes: SlotMap<TimeKey, TimeNode>,
    root: TimeKey,
    now: TimeKey,
}

impl Timeline {
    /// A fresh timeline holding a single root timestamp, which is `now`.
    pub fn new() -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(TimeNode {
            label: 0,
            prev: TimeKey::null(),
            next: TimeKey::null(),
            cleanups: Vec::new(),
        });
        Self {
            nodes,
            root,
            now: root,
        }
    }

    pub fn now(&self) -> TimeKey {
        self.now
    }

    pub fn set_now(&mut self, t: TimeKey) {
        debug_assert!(self.is_live(t), "`now` set to a spliced-out timestamp");
        self.now = t;
    }

    /// True while `t` has not been spliced out.
    pub fn is_live(&self, t: TimeKey) -> bool {
        self.nodes.contains_key(t)
    }

    /// Timeline order of two live timestamps.
    pub fn compare(&self, a: TimeKey, b: TimeKey) -> Ordering {
        if a == b {
            return Ordering::Equal;
        }
        self.nodes[a].label.cmp(&self.nodes[b].label)
    }

    /// Inserts a new timestamp immediately after `now` and advances `now`
    /// to it.
    pub fn tick(&mut self) -> TimeKey {
        let t = self.insert_after(self.now);
        self.now = t;
        t
    }

    /// Attaches a cleanup to `t`, to run when `t` is spliced out. Cleanups
    /// on one timestamp fire in registration order.
    pub fn add_cleanup(&mut self, t: TimeKey, cleanup: Cleanup) {
        self.nodes
            .get_mut(t)
            .expect("cleanup attached to a spliced-out timestamp")
            .cleanups
            .push(cleanup);
    }

    /// Invalidates every timestamp in `(lo, hi]`, unlinking the range and
    /// returning the cleanups of the removed timestamps in timeline order.
    /// `lo` itself stays live; it is reused as the next run's starting
    /// point. `splice_out(t, t)` is a no-op.
    pub fn splice_out(&mut self, lo: TimeKey, hi: TimeKey) -> Vec<Cleanup> {
        if lo == hi {
            return Vec::new();
        }
        debug_assert!(self.is_live(lo) && self.is_live(hi));
        debug_assert_eq!(self.compare(lo, hi), Ordering::Less);

        let mut cursor = self.nodes[lo].next;
        let after = self.nodes[hi].next;
        self.nodes[lo].next = after;
        if !after.is_null() {
            self.nodes[after].prev = lo;
        }

        let mut cleanups = Vec::new();
        let mut count = 0usize;
        while !cursor.is_null() && cursor != after {
            let node = self
                .nodes
                .remove(cursor)
                .expect("spliced range contains a dead timestamp");
            cleanups.extend(node.cleanups);
            cursor = node.next;
            count += 1;
        }
        tracing::trace!(spliced = count, cleanups = cleanups.len(), "splice_out");
        cleanups
    }

    /// Takes every outstanding cleanup on the whole timeline, in timeline
    /// order. Used by engine reset, where each cleanup must still fire
    /// exactly once.
    pub fn drain_all_cleanups(&mut self) -> Vec<Cleanup> {
        let mut cleanups = Vec::new();
        let mut cursor = self.root;
        while !cursor.is_null() {
            let node = &mut self.nodes[cursor];
            cleanups.append(&mut node.cleanups);
            cursor = node.next;
        }
        cleanups
    }

    fn insert_after(&mut self, at: TimeKey) -> TimeKey {
        loop {
            let at_label = self.nodes[at].label;
            let next = self.nodes[at].next;
            let label = if next.is_null() {
                match at_label.checked_add(LABEL_GAP) {
                    Some(label) => label,
                    None => {
                        self.renumber_all();
                        continue;
                    }
                }
            } else {
                let next_label = self.nodes[next].label;
                let mid = at_label + (next_label - at_label) / 2;
                if mid == at_label {
                    self.renumber_from(at);
                    continue;
                }
                mid
            };
            let key = self.nodes.insert(TimeNode {
                label,
                prev: at,
                next,
                cleanups: Vec::new(),
            });
            self.nodes[at].next = key;
            if !next.is_null() {
                self.nodes[next].prev = key;
            }
            return key;
        }
    }

    /// Relabels a window of successors of `at` so that a midpoint insertion
    /// after `at` succeeds. The window grows until the span above it leaves
    /// a per-node step of at least 2.
    fn renumber_from(&mut self, at: TimeKey) {
        let base = self.nodes[at].label;
        let mut window: Vec<TimeKey> = Vec::new();
        let mut cursor = self.nodes[at].next;
        while !cursor.is_null() {
            window.push(cursor);
            let next = self.nodes[cursor].next;
            if !next.is_null() {
                let span = self.nodes[next].label - base;
                let step = span / (window.len() as u64 + 1);
                if step >= 2 {
                    let mut label = base;
                    for &key in &window {
                        label += step;
                        self.nodes[key].label = label;
                    }
                    tracing::trace!(window = window.len(), "relabeled timestamp window");
                    return;
                }
            }
            cursor = next;
        }
        // The window ran to the end of the timeline: unbounded above.
        let needed = (window.len() as u64 + 1).saturating_mul(LABEL_GAP);
        if base > u64::MAX - needed {
            self.renumber_all();
            return;
        }
        let mut label = base;
        for &key in &window {
            label += LABEL_GAP;
            self.nodes[key].label = label;
        }
    }

    fn renumber_all(&mut self) {
        let mut label = 0;
        let mut cursor = self.root;
        while !cursor.is_null() {
            self.nodes[cursor].label = label;
            label += LABEL_GAP;
            cursor = self.nodes[cursor].next;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::adaptive::graph::Engine;

    fn timeline() -> Timeline {
        Timeline::new()
    }

    #[test]
    fn ticks_are_ordered() {
        let mut tl = timeline();
        let a = tl.tick();
        let b = tl.tick();
        let c = tl.tick();
        assert_eq!(tl.compare(a, b), Ordering::Less);
        assert_eq!(tl.compare(b, c), Ordering::Less);
        assert_eq!(tl.compare(c, a), Ordering::Greater);
        assert_eq!(tl.compare(b, b), Ordering::Equal);
        assert_eq!(tl.now(), c);
    }

    #[test]
    fn tick_inserts_between_now_and_successor() {
        let mut tl = timeline();
        let a = tl.tick();
        let b = tl.tick();
        tl.set_now(a);
        let mid = tl.tick();
        assert_eq!(tl.compare(a, mid), Ordering::Less);
        assert_eq!(tl.compare(mid, b), Ordering::Less);
    }

    #[test]
    fn repeated_midpoint_insertion_forces_relabel() {
        let mut tl = timeline();
        let first = tl.tick();
        let last = tl.tick();
        // Insert a few thousand timestamps into the same gap; labels must
        // run out long before that, exercising the relabel path.
        let mut prev = first;
        for _ in 0..4096 {
            tl.set_now(prev);
            prev = tl.tick();
            assert_eq!(tl.compare(first, prev), Ordering::Less);
            assert_eq!(tl.compare(prev, last), Ordering::Less);
        }
    }

    #[test]
    fn random_insertions_stay_totally_ordered() {
        let mut rng = SmallRng::seed_from_u64(0xedd1);
        let mut tl = timeline();
        // `order` mirrors the intended timeline order.
        let mut order = vec![tl.root];
        for _ in 0..2000 {
            let at = rng.gen_range(0..order.len());
            tl.set_now(order[at]);
            let t = tl.tick();
            order.insert(at + 1, t);
        }
        for pair in order.windows(2) {
            assert_eq!(tl.compare(pair[0], pair[1]), Ordering::Less);
        }
    }

    #[test]
    fn splice_runs_cleanups_in_order_exactly_once() {
        let mut engine = Engine::new();
        let fired: Rc<RefCell<Vec<u32>>> = Rc::default();

        let lo = engine.timeline.tick();
        let a = engine.timeline.tick();
        let b = engine.timeline.tick();
        let hi = engine.timeline.tick();
        let after = engine.timeline.tick();

        for (t, tag) in [(b, 2), (a, 1), (hi, 3)] {
            let fired = Rc::clone(&fired);
            engine
                .timeline
                .add_cleanup(t, Box::new(move |_| fired.borrow_mut().push(tag)));
        }

        let cleanups = engine.timeline.splice_out(lo, hi);
        for cleanup in cleanups {
            cleanup(&mut engine);
        }

        // Cleanups fire in timeline order, bounds behave as `(lo, hi]`.
        assert_eq!(*fired.borrow(), vec![1, 2, 3]);
        assert!(engine.timeline.is_live(lo));
        assert!(!engine.timeline.is_live(a));
        assert!(!engine.timeline.is_live(b));
        assert!(!engine.timeline.is_live(hi));
        assert!(engine.timeline.is_live(after));

        // The gap is really gone: a tick after `lo` lands before `after`.
        engine.timeline.set_now(lo);
        let t = engine.timeline.tick();
        assert_eq!(engine.timeline.compare(lo, t), Ordering::Less);
        assert_eq!(engine.timeline.compare(t, after), Ordering::Less);
    }

    #[test]
    fn empty_splice_is_a_no_op() {
        let mut tl = timeline();
        let t = tl.tick();
        assert!(tl.splice_out(t, t).is_empty());
        assert!(tl.is_live(t));
    }
}
