//! Memoization of reader sub-computations.
//!
//! A memo table caches the timestamp range a keyed sub-computation spanned,
//! together with its result. When the enclosing reader re-runs and asks for
//! the same key, the cached range is spliced back into the current
//! execution instead of re-running the work: the gap before it is
//! discarded, pending readers *inside* the range are replayed, and the
//! clock jumps to the range's end. Everything the cached work created
//! (nested readers, subscriptions, cleanups) stays valid because its
//! timestamps survive.

use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::graph::Engine;
use super::{MemoKey, TimeKey};

/// Handle to a memo table mapping `K` keys to cached `V` results.
pub struct Memo<K, V> {
    key: MemoKey,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Copy for Memo<K, V> {}
impl<K, V> Clone for Memo<K, V> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<K, V> fmt::Debug for Memo<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Memo({:?})", self.key)
    }
}

struct MemoSlot<V> {
    value: V,
    start: TimeKey,
    finish: TimeKey,
}

struct MemoStore<K, V> {
    entries: FxHashMap<K, SmallVec<[MemoSlot<V>; 1]>>,
}

impl Engine {
    /// Creates a memo table. A table created inside a reader body is
    /// discarded with that body's range.
    pub fn memo<K, V>(&mut self) -> Memo<K, V>
    where
        K: Hash + Eq + Clone + 'static,
        V: Clone + 'static,
    {
        self.memo_with_capacity(0)
    }

    /// [`Engine::memo`] with a capacity hint for the key map.
    pub fn memo_with_capacity<K, V>(&mut self, capacity: usize) -> Memo<K, V>
    where
        K: Hash + Eq + Clone + 'static,
        V: Clone + 'static,
    {
        let store: MemoStore<K, V> = MemoStore {
            entries: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
        };
        let key = self.memos.insert(Box::new(store));
        self.scope_to_current_run(Box::new(move |engine| {
            engine.memos.remove(key);
        }));
        Memo {
            key,
            _marker: PhantomData,
        }
    }

    /// Evaluates `f` under the memo key `k`, reusing a cached run when one
    /// fits inside the remaining range of the currently executing reader.
    ///
    /// Outside a reader this is a plain call: nothing is cached. On a miss
    /// the evaluation is bracketed in fresh timestamps and recorded; the
    /// entry is evicted when its range is later discarded. On a hit the
    /// timeline between `now` and the cached range is spliced out, pending
    /// readers scheduled inside the range are replayed, and the cached
    /// result is returned without running `f`.
    pub fn memoize<K, V>(&mut self, table: Memo<K, V>, k: K, f: impl FnOnce(&mut Engine) -> V) -> V
    where
        K: Hash + Eq + Clone + 'static,
        V: Clone + 'static,
    {
        let Some(&enclosing_finish) = self.finish_stack.last() else {
            return f(self);
        };

        let now = self.timeline.now();
        let hit = {
            let store = self.memos[table.key]
                .downcast_ref::<MemoStore<K, V>>()
                .expect("memo table type mismatch");
            store.entries.get(&k).and_then(|slots| {
                slots
                    .iter()
                    .find(|slot| {
                        self.timeline.is_live(slot.start)
                            && self.timeline.is_live(slot.finish)
                            && self.timeline.compare(now, slot.start).is_lt()
                            && self
                                .timeline
                                .compare(slot.finish, enclosing_finish)
                                .is_lt()
                    })
                    .map(|slot| (slot.value.clone(), slot.start, slot.finish))
            })
        };

        if let Some((value, start, finish)) = hit {
            tracing::trace!(memo = ?table.key, "memo hit");
            self.debug_emit(|| format!("memo hit in {:?}", table.key));
            // Discard the gap between here and the cached range, then give
            // the entry a fresh start marker so later runs can hit it again.
            let cleanups = self.timeline.splice_out(now, start);
            for cleanup in cleanups {
                cleanup(self);
            }
            let new_start = self.timeline.tick();
            if let Some(store) = self
                .memos
                .get_mut(table.key)
                .and_then(|b| b.downcast_mut::<MemoStore<K, V>>())
            {
                if let Some(slots) = store.entries.get_mut(&k) {
                    if let Some(slot) = slots.iter_mut().find(|s| s.finish == finish) {
                        slot.start = new_start;
                    }
                }
            }
            // Reconcile inputs that changed under the cached range.
            self.propagate_until(Some(finish));
            self.timeline.set_now(finish);
            return value;
        }

        tracing::trace!(memo = ?table.key, "memo miss");
        let start = self.timeline.tick();
        let value = f(self);
        let finish = self.timeline.tick();

        let table_key = table.key;
        let entry_key = k.clone();
        if let Some(store) = self
            .memos
            .get_mut(table_key)
            .and_then(|b| b.downcast_mut::<MemoStore<K, V>>())
        {
            store
                .entries
                .entry(k)
                .or_default()
                .push(MemoSlot {
                    value: value.clone(),
                    start,
                    finish,
                });
        }
        self.timeline.add_cleanup(
            finish,
            Box::new(move |engine| {
                if let Some(store) = engine
                    .memos
                    .get_mut(table_key)
                    .and_then(|b| b.downcast_mut::<MemoStore<K, V>>())
                {
                    if let Some(slots) = store.entries.get_mut(&entry_key) {
                        slots.retain(|slot| slot.finish != finish);
                        if slots.is_empty() {
                            store.entries.remove(&entry_key);
                        }
                    }
                }
            }),
        );
        value
    }
}
