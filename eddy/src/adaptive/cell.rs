//! Changeable cells: time-varying values observed by readers.
//!
//! A cell's state is a [`RawResult`] (value or [`Fault`]) plus the list of
//! dependent callbacks to invoke when the state changes. The public handles
//! [`Cell`] (observe) and [`Writer`] (mutate) are two typed views of the
//! same arena slot; constants only ever get the observing view.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::rc::Rc;

use smallvec::SmallVec;

use super::fault::Fault;
use super::graph::Engine;
use super::{structural_eq, CellKey, DepFn, EqFn, EventKey, RawResult};
use crate::util::dlist::{DList, DListKey};

/// Arena record of one cell.
pub(crate) struct CellData {
    pub state: RawResult,
    /// Equality used to suppress redundant writes; `None` means never
    /// equal, so every write propagates.
    pub eq: Option<EqFn>,
    pub deps: DList<DepFn>,
    pub constant: bool,
}

/// Observing handle to a cell holding a `T`.
pub struct Cell<T> {
    pub(crate) key: CellKey,
    pub(crate) _marker: PhantomData<fn() -> T>,
}

/// Writing handle to a changeable cell holding a `T`.
pub struct Writer<T> {
    pub(crate) key: CellKey,
    pub(crate) _marker: PhantomData<fn() -> T>,
}

// Handles are plain keys; implement the usual traits manually so `T` needs
// no bounds (derives would add them).
impl<T> Copy for Cell<T> {}
impl<T> Clone for Cell<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> PartialEq for Cell<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl<T> Eq for Cell<T> {}
impl<T> Hash for Cell<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}
impl<T> fmt::Debug for Cell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cell({:?})", self.key)
    }
}

impl<T> Copy for Writer<T> {}
impl<T> Clone for Writer<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> fmt::Debug for Writer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Writer({:?})", self.key)
    }
}

impl<T> Cell<T> {
    pub(crate) fn from_key(key: CellKey) -> Self {
        Self {
            key,
            _marker: PhantomData,
        }
    }
}

/// Cancellation handle for a `notify*` subscription.
///
/// Cancelling is idempotent, and a subscription whose target has already
/// been discarded cancels as a no-op.
#[derive(Clone, Copy, Debug)]
pub struct Subscription {
    pub(crate) target: SubTarget,
    pub(crate) entry: DListKey,
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum SubTarget {
    Cell(CellKey),
    Event(EventKey),
}

impl Engine {
    /// Creates a changeable cell with structural equality filtering writes.
    /// Returns the observing and writing handles.
    pub fn changeable<T: PartialEq + 'static>(&mut self, init: T) -> (Cell<T>, Writer<T>) {
        let key = self.insert_cell(Ok(Rc::new(init)), Some(structural_eq::<T>()), false);
        (Cell::from_key(key), Writer { key, _marker: PhantomData })
    }

    /// Creates a changeable cell with a custom equality. `eq` returning
    /// true suppresses the write and its notifications.
    pub fn changeable_eq<T: 'static>(
        &mut self,
        init: T,
        eq: impl Fn(&T, &T) -> bool + 'static,
    ) -> (Cell<T>, Writer<T>) {
        let erased: EqFn = Rc::new(move |a: &dyn Any, b: &dyn Any| {
            match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
                (Some(a), Some(b)) => eq(a, b),
                _ => false,
            }
        });
        let key = self.insert_cell(Ok(Rc::new(init)), Some(erased), false);
        (Cell::from_key(key), Writer { key, _marker: PhantomData })
    }

    /// Creates a changeable cell with no value yet: reads fail with the
    /// [unset](Fault::is_unset) fault until the first write.
    pub fn changeable_unset<T: PartialEq + 'static>(&mut self) -> (Cell<T>, Writer<T>) {
        let key = self.insert_cell(Err(Fault::unset()), Some(structural_eq::<T>()), false);
        (Cell::from_key(key), Writer { key, _marker: PhantomData })
    }

    /// Creates an immutable cell holding `value`.
    pub fn constant<T: 'static>(&mut self, value: T) -> Cell<T> {
        Cell::from_key(self.insert_cell(Ok(Rc::new(value)), None, true))
    }

    /// Creates an immutable cell holding a failure.
    pub fn fail<T: 'static>(&mut self, fault: Fault) -> Cell<T> {
        Cell::from_key(self.insert_cell(Err(fault), None, true))
    }

    pub(crate) fn insert_cell(
        &mut self,
        state: RawResult,
        eq: Option<EqFn>,
        constant: bool,
    ) -> CellKey {
        let key = self.cells.insert(CellData {
            state,
            eq,
            deps: DList::new(),
            constant,
        });
        self.scope_to_current_run(Box::new(move |engine| {
            engine.cells.remove(key);
        }));
        key
    }

    /// True if the cell was created by [`Engine::constant`] or
    /// [`Engine::fail`] (or a constant short-circuit of a combinator).
    pub fn is_constant<T>(&self, cell: Cell<T>) -> bool {
        self.is_constant_key(cell.key)
    }

    pub(crate) fn is_constant_key(&self, key: CellKey) -> bool {
        self.cells[key].constant
    }

    /// Reads the cell's current state: its value, or the stored fault.
    ///
    /// The state observed between [`Engine::propagate`] calls is a fixed
    /// point; mid-propagation reads may see values that are still being
    /// reconciled.
    pub fn read<T: Clone + 'static>(&self, cell: Cell<T>) -> Result<T, Fault> {
        match &self.cells[cell.key].state {
            Ok(value) => Ok(value
                .downcast_ref::<T>()
                .expect("cell value type mismatch")
                .clone()),
            Err(fault) => Err(fault.clone()),
        }
    }

    pub(crate) fn raw_state(&self, key: CellKey) -> RawResult {
        self.cells
            .get(key)
            .expect("stale cell handle")
            .state
            .clone()
    }

    /// Writes a value. If the cell's equality considers it equal to the
    /// current state, nothing happens; otherwise the state is stored and
    /// each dependent callback fires once, in subscription order.
    pub fn write<T: 'static>(&mut self, writer: Writer<T>, value: T) {
        self.write_raw(writer.key, Ok(Rc::new(value)), true);
    }

    /// Writes a failure. Writing a fault over an [equal](Fault::same) fault
    /// does not notify dependents.
    pub fn write_fault<T>(&mut self, writer: Writer<T>, fault: Fault) {
        self.write_raw(writer.key, Err(fault), true);
    }

    /// Writes a full result (value or fault).
    pub fn write_result<T: 'static>(&mut self, writer: Writer<T>, result: Result<T, Fault>) {
        let raw = result.map(|v| Rc::new(v) as Rc<dyn Any>);
        self.write_raw(writer.key, raw, true);
    }

    /// Resets the cell to the unwritten state. Dependents observe
    /// `Err(unset)`; repeated clears do not re-notify.
    pub fn clear<T>(&mut self, writer: Writer<T>) {
        self.write_raw(writer.key, Err(Fault::unset()), true);
    }

    /// Core write: store and dispatch. With `respect_eq` false the cell's
    /// equality is bypassed, used when mirroring a cell whose own equality
    /// already guarded the notification (avoids filtering twice).
    pub(crate) fn write_raw(&mut self, key: CellKey, result: RawResult, respect_eq: bool) {
        let deps: SmallVec<[(DListKey, DepFn); 4]> = {
            let cell = self.cells.get_mut(key).expect("stale cell handle");
            debug_assert!(!cell.constant, "write to a constant cell");
            if respect_eq {
                let equal = match (&cell.state, &result) {
                    (Ok(old), Ok(new)) => cell
                        .eq
                        .as_ref()
                        .is_some_and(|eq| eq(old.as_ref(), new.as_ref())),
                    (Err(old), Err(new)) => match &self.fault_eq {
                        Some(eq) => eq(old, new),
                        None => Fault::same(old, new),
                    },
                    _ => false,
                };
                if equal {
                    return;
                }
            }
            cell.state = result.clone();
            cell.deps.iter().map(|(k, f)| (k, Rc::clone(f))).collect()
        };
        tracing::trace!(cell = ?key, deps = deps.len(), "cell write");
        for (entry, callback) in deps {
            // A callback unsubscribed by an earlier callback of the same
            // dispatch must not fire.
            let live = self
                .cells
                .get(key)
                .is_some_and(|cell| cell.deps.contains(entry));
            if live {
                (&mut *callback.borrow_mut())(self, &result);
            }
        }
    }

    /// Subscribes `callback` to the cell's value changes. Failures are
    /// skipped; use [`Engine::notify_result`] to observe them. The current
    /// state is *not* delivered; see [`Engine::notify_now`].
    pub fn notify<T: 'static>(
        &mut self,
        cell: Cell<T>,
        mut callback: impl FnMut(&T) + 'static,
    ) -> Subscription {
        self.notify_result(cell, move |result| {
            if let Ok(value) = result {
                callback(value);
            }
        })
    }

    /// Like [`Engine::notify`], but also delivers the current value
    /// immediately, before returning.
    pub fn notify_now<T: 'static>(
        &mut self,
        cell: Cell<T>,
        mut callback: impl FnMut(&T) + 'static,
    ) -> Subscription {
        if let Ok(value) = &self.cells[cell.key].state {
            callback(value.downcast_ref::<T>().expect("cell value type mismatch"));
        }
        self.notify(cell, callback)
    }

    /// Subscribes `callback` to every state change of the cell, values and
    /// faults alike.
    pub fn notify_result<T: 'static>(
        &mut self,
        cell: Cell<T>,
        mut callback: impl FnMut(Result<&T, &Fault>) + 'static,
    ) -> Subscription {
        let dep: DepFn = Rc::new(RefCell::new(move |_: &mut Engine, result: &RawResult| {
            match result {
                Ok(value) => callback(Ok(value
                    .downcast_ref::<T>()
                    .expect("cell value type mismatch"))),
                Err(fault) => callback(Err(fault)),
            }
        }));
        self.subscribe_cell(cell.key, dep)
    }

    /// Like [`Engine::notify_result`], but also delivers the current state
    /// immediately, before returning.
    pub fn notify_result_now<T: 'static>(
        &mut self,
        cell: Cell<T>,
        mut callback: impl FnMut(Result<&T, &Fault>) + 'static,
    ) -> Subscription {
        match &self.cells[cell.key].state {
            Ok(value) => callback(Ok(value
                .downcast_ref::<T>()
                .expect("cell value type mismatch"))),
            Err(fault) => callback(Err(fault)),
        }
        self.notify_result(cell, callback)
    }

    /// Cancels a `notify*` subscription.
    pub fn cancel(&mut self, subscription: Subscription) {
        match subscription.target {
            SubTarget::Cell(key) => {
                if let Some(cell) = self.cells.get_mut(key) {
                    cell.deps.remove(subscription.entry);
                }
            }
            SubTarget::Event(key) => {
                if let Some(event) = self.events.get_mut(key) {
                    event.deps.remove(subscription.entry);
                }
            }
        }
    }

    /// Adds a dependent callback to a cell and scopes its removal to the
    /// enclosing computation point. Subscribing to a constant is a no-op
    /// (constants never notify).
    pub(crate) fn subscribe_cell(&mut self, key: CellKey, dep: DepFn) -> Subscription {
        let cell = self.cells.get_mut(key).expect("stale cell handle");
        if cell.constant {
            return Subscription {
                target: SubTarget::Cell(key),
                entry: DListKey::default(),
            };
        }
        let entry = cell.deps.push_back(dep);
        self.cleanup(move |engine| {
            if let Some(cell) = engine.cells.get_mut(key) {
                cell.deps.remove(entry);
            }
        });
        Subscription {
            target: SubTarget::Cell(key),
            entry,
        }
    }
}
