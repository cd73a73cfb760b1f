//! Push events: discrete occurrences dispatched through a process FIFO.
//!
//! Events carry no state. A send enqueues the occurrence; the outermost
//! dispatch loop drains the FIFO, firing each occurrence's dependents
//! synchronously and running [propagation](super::graph::Engine::propagate)
//! after each one, so cells driven by events settle occurrence by
//! occurrence. Sends issued while dispatching (from combinator callbacks)
//! only enqueue and are drained in order by the loop already running.

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::rc::Rc;

use smallvec::SmallVec;

use super::cell::{Cell, SubTarget, Subscription};
use super::fault::Fault;
use super::graph::Engine;
use super::{DepFn, EventKey, RawResult};
use crate::util::dlist::{DList, DListKey};

/// Arena record of one event node: just its dependents.
pub(crate) struct EventData {
    pub deps: DList<DepFn>,
}

/// Handle to an event producing occurrences of `T`.
pub struct Event<T> {
    pub(crate) key: EventKey,
    pub(crate) _marker: PhantomData<fn() -> T>,
}

/// Sending handle for an event created by [`Engine::make_event`].
pub struct Sender<T> {
    pub(crate) key: EventKey,
    pub(crate) _marker: PhantomData<fn() -> T>,
}

impl<T> Copy for Event<T> {}
impl<T> Clone for Event<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> PartialEq for Event<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl<T> Eq for Event<T> {}
impl<T> Hash for Event<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}
impl<T> fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Event({:?})", self.key)
    }
}

impl<T> Copy for Sender<T> {}
impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sender({:?})", self.key)
    }
}

impl<T> Event<T> {
    pub(crate) fn from_key(key: EventKey) -> Self {
        Self {
            key,
            _marker: PhantomData,
        }
    }
}

impl Engine {
    /// Creates an event and its sending handle. An event created inside a
    /// reader body is discarded with that body's range.
    pub fn make_event<T: 'static>(&mut self) -> (Event<T>, Sender<T>) {
        let key = self.events.insert(EventData { deps: DList::new() });
        self.scope_to_current_run(Box::new(move |engine| {
            engine.events.remove(key);
        }));
        (
            Event::from_key(key),
            Sender {
                key,
                _marker: PhantomData,
            },
        )
    }

    /// An event that never occurs: no sender exists for it.
    pub fn never<T: 'static>(&mut self) -> Event<T> {
        let (event, _) = self.make_event::<T>();
        event
    }

    /// Sends a value occurrence.
    pub fn send<T: 'static>(&mut self, sender: Sender<T>, value: T) {
        self.send_raw(sender.key, Ok(Rc::new(value)));
    }

    /// Sends a failure occurrence.
    pub fn send_fault<T>(&mut self, sender: Sender<T>, fault: Fault) {
        self.send_raw(sender.key, Err(fault));
    }

    /// Sends a full result occurrence.
    pub fn send_result<T: 'static>(&mut self, sender: Sender<T>, result: Result<T, Fault>) {
        let raw = result.map(|v| Rc::new(v) as Rc<dyn std::any::Any>);
        self.send_raw(sender.key, raw);
    }

    pub(crate) fn send_raw(&mut self, key: EventKey, result: RawResult) {
        self.sends.push_back((key, result));
        if self.dispatching {
            return;
        }
        self.dispatching = true;
        while let Some((key, result)) = self.sends.pop_front() {
            self.debug_emit(|| format!("dispatch event {:?}", key));
            let deps: SmallVec<[(DListKey, DepFn); 4]> = match self.events.get(key) {
                Some(event) => event.deps.iter().map(|(k, f)| (k, Rc::clone(f))).collect(),
                None => SmallVec::new(),
            };
            tracing::trace!(event = ?key, deps = deps.len(), "event dispatch");
            for (entry, callback) in deps {
                let live = self
                    .events
                    .get(key)
                    .is_some_and(|event| event.deps.contains(entry));
                if live {
                    (&mut *callback.borrow_mut())(self, &result);
                }
            }
            self.propagate();
        }
        self.dispatching = false;
    }

    /// Subscribes `callback` to the event's value occurrences; failures
    /// are skipped.
    pub fn notify_event<T: 'static>(
        &mut self,
        event: Event<T>,
        mut callback: impl FnMut(&T) + 'static,
    ) -> Subscription {
        self.notify_event_result(event, move |result| {
            if let Ok(value) = result {
                callback(value);
            }
        })
    }

    /// Subscribes `callback` to every occurrence, values and faults alike.
    pub fn notify_event_result<T: 'static>(
        &mut self,
        event: Event<T>,
        mut callback: impl FnMut(Result<&T, &Fault>) + 'static,
    ) -> Subscription {
        let dep: DepFn = Rc::new(RefCell::new(move |_: &mut Engine, result: &RawResult| {
            match result {
                Ok(value) => callback(Ok(value
                    .downcast_ref::<T>()
                    .expect("event value type mismatch"))),
                Err(fault) => callback(Err(fault)),
            }
        }));
        self.subscribe_event(event.key, dep)
    }

    /// Forwards every occurrence of any input.
    pub fn merge<T: 'static>(&mut self, inputs: &[Event<T>]) -> Event<T> {
        let (out, _) = self.make_event::<T>();
        let out_key = out.key;
        for input in inputs {
            let dep: DepFn = Rc::new(RefCell::new(
                move |engine: &mut Engine, result: &RawResult| {
                    engine.send_raw(out_key, result.clone());
                },
            ));
            self.subscribe_event(input.key, dep);
        }
        out
    }

    /// Forwards `f` of every value occurrence; failures pass through.
    pub fn map_event<T, U, F>(&mut self, input: Event<T>, mut f: F) -> Event<U>
    where
        T: 'static,
        U: 'static,
        F: FnMut(&T) -> U + 'static,
    {
        let (out, _) = self.make_event::<U>();
        let out_key = out.key;
        let dep: DepFn = Rc::new(RefCell::new(
            move |engine: &mut Engine, result: &RawResult| {
                let forwarded: RawResult = match result {
                    Ok(value) => Ok(Rc::new(f(value
                        .downcast_ref::<T>()
                        .expect("event value type mismatch")))),
                    Err(fault) => Err(fault.clone()),
                };
                engine.send_raw(out_key, forwarded);
            },
        ));
        self.subscribe_event(input.key, dep);
        out
    }

    /// Forwards value occurrences satisfying `predicate`; failures pass
    /// through.
    pub fn filter_event<T, P>(&mut self, input: Event<T>, mut predicate: P) -> Event<T>
    where
        T: 'static,
        P: FnMut(&T) -> bool + 'static,
    {
        let (out, _) = self.make_event::<T>();
        let out_key = out.key;
        let dep: DepFn = Rc::new(RefCell::new(
            move |engine: &mut Engine, result: &RawResult| {
                let forward = match result {
                    Ok(value) => predicate(
                        value.downcast_ref::<T>().expect("event value type mismatch"),
                    ),
                    Err(_) => true,
                };
                if forward {
                    engine.send_raw(out_key, result.clone());
                }
            },
        ));
        self.subscribe_event(input.key, dep);
        out
    }

    /// Folds occurrences with `f`, forwarding each new accumulator. A
    /// failure occurrence poisons the fold: it is forwarded, and every
    /// later occurrence is dropped.
    pub fn collect<T, A, F>(&mut self, input: Event<T>, init: A, mut f: F) -> Event<A>
    where
        T: 'static,
        A: Clone + 'static,
        F: FnMut(&A, &T) -> A + 'static,
    {
        let (out, _) = self.make_event::<A>();
        let out_key = out.key;
        let mut acc: Result<A, Fault> = Ok(init);
        let dep: DepFn = Rc::new(RefCell::new(
            move |engine: &mut Engine, result: &RawResult| {
                let Ok(current) = &acc else {
                    return;
                };
                let next = match result {
                    Ok(value) => Ok(f(
                        current,
                        value.downcast_ref::<T>().expect("event value type mismatch"),
                    )),
                    Err(fault) => Err(fault.clone()),
                };
                acc = next;
                let forwarded: RawResult = match &acc {
                    Ok(a) => Ok(Rc::new(a.clone())),
                    Err(fault) => Err(fault.clone()),
                };
                engine.send_raw(out_key, forwarded);
            },
        ));
        self.subscribe_event(input.key, dep);
        out
    }

    /// A cell starting at `init` and following the event's latest result.
    /// Structural equality filters repeats.
    pub fn hold<T: PartialEq + 'static>(&mut self, init: T, input: Event<T>) -> Cell<T> {
        let (cell, writer) = self.changeable(init);
        let target = writer.key;
        let dep: DepFn = Rc::new(RefCell::new(
            move |engine: &mut Engine, result: &RawResult| {
                engine.write_raw(target, result.clone(), true);
            },
        ));
        self.subscribe_event(input.key, dep);
        cell
    }

    /// An event firing each time the cell's state changes (after its
    /// equality filtering).
    pub fn changes<T: 'static>(&mut self, input: Cell<T>) -> Event<T> {
        let (out, _) = self.make_event::<T>();
        let out_key = out.key;
        let dep: DepFn = Rc::new(RefCell::new(
            move |engine: &mut Engine, result: &RawResult| {
                engine.send_raw(out_key, result.clone());
            },
        ));
        self.subscribe_cell(input.key, dep);
        out
    }

    /// A unit event firing on each transition of the cell to `true`.
    pub fn when_true(&mut self, input: Cell<bool>) -> Event<()> {
        let (out, _) = self.make_event::<()>();
        let out_key = out.key;
        let dep: DepFn = Rc::new(RefCell::new(
            move |engine: &mut Engine, result: &RawResult| {
                if let Ok(value) = result {
                    if *value.downcast_ref::<bool>().expect("event value type mismatch") {
                        engine.send_raw(out_key, Ok(Rc::new(())));
                    }
                }
            },
        ));
        self.subscribe_cell(input.key, dep);
        out
    }

    /// A cell counting the event's occurrences. A failure occurrence
    /// poisons the count, like [`Engine::collect`].
    pub fn count<T: 'static>(&mut self, input: Event<T>) -> Cell<usize> {
        let tallies = self.collect(input, 0usize, |n, _: &T| n + 1);
        self.hold(0, tallies)
    }

    /// A cell driven by a dedicated sender: [`Engine::make_event`] plus
    /// [`Engine::hold`].
    pub fn make_cell<T: PartialEq + 'static>(&mut self, init: T) -> (Cell<T>, Sender<T>) {
        let (event, sender) = self.make_event::<T>();
        (self.hold(init, event), sender)
    }

    /// Adds a dependent callback to an event and scopes its removal to the
    /// enclosing computation point.
    pub(crate) fn subscribe_event(&mut self, key: EventKey, dep: DepFn) -> Subscription {
        let event = self.events.get_mut(key).expect("stale event handle");
        let entry = event.deps.push_back(dep);
        self.cleanup(move |engine| {
            if let Some(event) = engine.events.get_mut(key) {
                event.deps.remove(entry);
            }
        });
        Subscription {
            target: SubTarget::Event(key),
            entry,
        }
    }
}
