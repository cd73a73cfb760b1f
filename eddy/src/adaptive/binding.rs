//! Binding combinators: derived cells over one or more inputs.
//!
//! `lift`-flavored combinators apply a plain function and write the result
//! directly; `bind`-flavored ones let the body produce a whole new cell,
//! which is then mirrored into the output via [`Engine::connect`]. All of
//! them short-circuit when every input is constant, and all fail fast: the
//! first failing input becomes the output's fault.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use super::cell::Cell;
use super::fault::Fault;
use super::graph::Engine;
use super::{structural_eq, CellKey, DepFn, EqFn, RawResult};

impl Engine {
    /// Derives a cell by applying `f` to the input's value. The output
    /// filters writes with structural equality; see [`Engine::lift_eq`] for
    /// a custom one. Failures of the input pass through.
    pub fn lift<T, U, F>(&mut self, input: Cell<T>, mut f: F) -> Cell<U>
    where
        T: 'static,
        U: PartialEq + 'static,
        F: FnMut(&T) -> U + 'static,
    {
        self.lift_inner(input, Some(structural_eq::<U>()), move |v| Ok(f(v)))
    }

    /// [`Engine::lift`] with a custom output equality.
    pub fn lift_eq<T, U, F>(
        &mut self,
        input: Cell<T>,
        eq: impl Fn(&U, &U) -> bool + 'static,
        mut f: F,
    ) -> Cell<U>
    where
        T: 'static,
        U: 'static,
        F: FnMut(&T) -> U + 'static,
    {
        let erased: EqFn = Rc::new(move |a: &dyn Any, b: &dyn Any| {
            match (a.downcast_ref::<U>(), b.downcast_ref::<U>()) {
                (Some(a), Some(b)) => eq(a, b),
                _ => false,
            }
        });
        self.lift_inner(input, Some(erased), move |v| Ok(f(v)))
    }

    /// [`Engine::lift`] for fallible functions: an `Err` becomes the
    /// output's fault.
    pub fn try_lift<T, U, F>(&mut self, input: Cell<T>, f: F) -> Cell<U>
    where
        T: 'static,
        U: PartialEq + 'static,
        F: FnMut(&T) -> Result<U, Fault> + 'static,
    {
        self.lift_inner(input, Some(structural_eq::<U>()), f)
    }

    fn lift_inner<T, U, F>(&mut self, input: Cell<T>, eq: Option<EqFn>, mut f: F) -> Cell<U>
    where
        T: 'static,
        U: 'static,
        F: FnMut(&T) -> Result<U, Fault> + 'static,
    {
        if self.is_constant_key(input.key) {
            return match self.raw_state(input.key) {
                Ok(value) => {
                    match f(value.downcast_ref::<T>().expect("cell value type mismatch")) {
                        Ok(out) => self.constant(out),
                        Err(fault) => self.fail(fault),
                    }
                }
                Err(fault) => self.fail(fault),
            };
        }
        let target = self.insert_cell(Err(Fault::unset()), eq, false);
        self.add_reader(&[input.key], move |engine| {
            let result: RawResult = match engine.raw_state(input.key) {
                Ok(value) => {
                    match f(value.downcast_ref::<T>().expect("cell value type mismatch")) {
                        Ok(out) => Ok(Rc::new(out)),
                        Err(fault) => Err(fault),
                    }
                }
                Err(fault) => Err(fault),
            };
            engine.write_raw(target, result, true);
        });
        Cell::from_key(target)
    }

    /// Derives a cell from two inputs of possibly different types. Fails
    /// fast on the first failing input.
    pub fn lift2<A, B, U, F>(&mut self, a: Cell<A>, b: Cell<B>, mut f: F) -> Cell<U>
    where
        A: 'static,
        B: 'static,
        U: PartialEq + 'static,
        F: FnMut(&A, &B) -> U + 'static,
    {
        if self.is_constant_key(a.key) && self.is_constant_key(b.key) {
            return match (self.raw_state(a.key), self.raw_state(b.key)) {
                (Ok(x), Ok(y)) => {
                    let out = f(
                        x.downcast_ref::<A>().expect("cell value type mismatch"),
                        y.downcast_ref::<B>().expect("cell value type mismatch"),
                    );
                    self.constant(out)
                }
                (Err(fault), _) | (_, Err(fault)) => self.fail(fault),
            };
        }
        let target = self.insert_cell(Err(Fault::unset()), Some(structural_eq::<U>()), false);
        self.add_reader(&[a.key, b.key], move |engine| {
            let result: RawResult = match (engine.raw_state(a.key), engine.raw_state(b.key)) {
                (Ok(x), Ok(y)) => Ok(Rc::new(f(
                    x.downcast_ref::<A>().expect("cell value type mismatch"),
                    y.downcast_ref::<B>().expect("cell value type mismatch"),
                ))),
                (Err(fault), _) | (_, Err(fault)) => Err(fault),
            };
            engine.write_raw(target, result, true);
        });
        Cell::from_key(target)
    }

    /// N-ary [`Engine::lift`] over inputs of one type. The slice of current
    /// values is rebuilt on every run; the first failing input short-cuts.
    pub fn lift_all<T, U, F>(&mut self, inputs: &[Cell<T>], mut f: F) -> Cell<U>
    where
        T: Clone + 'static,
        U: PartialEq + 'static,
        F: FnMut(&[T]) -> U + 'static,
    {
        let keys: Vec<CellKey> = inputs.iter().map(|c| c.key).collect();
        if keys.iter().all(|&k| self.is_constant_key(k)) {
            return match self.gather(&keys) {
                Ok(values) => {
                    let out = f(&values);
                    self.constant(out)
                }
                Err(fault) => self.fail(fault),
            };
        }
        let target = self.insert_cell(Err(Fault::unset()), Some(structural_eq::<U>()), false);
        let body_keys = keys.clone();
        self.add_reader(&keys, move |engine| {
            let result: RawResult = match engine.gather::<T>(&body_keys) {
                Ok(values) => Ok(Rc::new(f(&values))),
                Err(fault) => Err(fault),
            };
            engine.write_raw(target, result, true);
        });
        Cell::from_key(target)
    }

    /// Monadic dependency: `f` runs against the input's value and returns
    /// the cell the output should follow, re-chosen whenever the input
    /// changes. The output does not filter writes (the produced structure
    /// itself changes); use [`Engine::bind_eq`] to filter.
    pub fn bind<T, U, F>(&mut self, input: Cell<T>, f: F) -> Cell<U>
    where
        T: 'static,
        U: 'static,
        F: FnMut(&mut Engine, &T) -> Cell<U> + 'static,
    {
        self.bind_inner(input, None, f)
    }

    /// [`Engine::bind`] with an equality filtering the output's writes.
    pub fn bind_eq<T, U, F>(
        &mut self,
        input: Cell<T>,
        eq: impl Fn(&U, &U) -> bool + 'static,
        f: F,
    ) -> Cell<U>
    where
        T: 'static,
        U: 'static,
        F: FnMut(&mut Engine, &T) -> Cell<U> + 'static,
    {
        let erased: EqFn = Rc::new(move |a: &dyn Any, b: &dyn Any| {
            match (a.downcast_ref::<U>(), b.downcast_ref::<U>()) {
                (Some(a), Some(b)) => eq(a, b),
                _ => false,
            }
        });
        self.bind_inner(input, Some(erased), f)
    }

    fn bind_inner<T, U, F>(&mut self, input: Cell<T>, eq: Option<EqFn>, mut f: F) -> Cell<U>
    where
        T: 'static,
        U: 'static,
        F: FnMut(&mut Engine, &T) -> Cell<U> + 'static,
    {
        if self.is_constant_key(input.key) {
            return match self.raw_state(input.key) {
                Ok(value) => f(self, value.downcast_ref::<T>().expect("cell value type mismatch")),
                Err(fault) => self.fail(fault),
            };
        }
        let target = self.insert_cell(Err(Fault::unset()), eq, false);
        self.add_reader(&[input.key], move |engine| {
            match engine.raw_state(input.key) {
                Ok(value) => {
                    let inner =
                        f(engine, value.downcast_ref::<T>().expect("cell value type mismatch"));
                    engine.connect(target, inner.key);
                }
                Err(fault) => engine.write_raw(target, Err(fault), true),
            }
        });
        Cell::from_key(target)
    }

    /// N-ary [`Engine::bind`] over inputs of one type.
    pub fn bind_all<T, U, F>(&mut self, inputs: &[Cell<T>], mut f: F) -> Cell<U>
    where
        T: Clone + 'static,
        U: 'static,
        F: FnMut(&mut Engine, &[T]) -> Cell<U> + 'static,
    {
        let keys: Vec<CellKey> = inputs.iter().map(|c| c.key).collect();
        if keys.iter().all(|&k| self.is_constant_key(k)) {
            return match self.gather(&keys) {
                Ok(values) => f(self, &values),
                Err(fault) => self.fail(fault),
            };
        }
        let target = self.insert_cell(Err(Fault::unset()), None, false);
        let body_keys = keys.clone();
        self.add_reader(&keys, move |engine| {
            match engine.gather::<T>(&body_keys) {
                Ok(values) => {
                    let inner = f(engine, &values);
                    engine.connect(target, inner.key);
                }
                Err(fault) => engine.write_raw(target, Err(fault), true),
            }
        });
        Cell::from_key(target)
    }

    /// Routes the input through one of two continuations: `succ` for
    /// values, `err` for faults. Both return the cell the output follows.
    pub fn try_bind<T, U, S, E>(&mut self, input: Cell<T>, mut succ: S, mut err: E) -> Cell<U>
    where
        T: 'static,
        U: 'static,
        S: FnMut(&mut Engine, &T) -> Cell<U> + 'static,
        E: FnMut(&mut Engine, &Fault) -> Cell<U> + 'static,
    {
        if self.is_constant_key(input.key) {
            return match self.raw_state(input.key) {
                Ok(value) => {
                    succ(self, value.downcast_ref::<T>().expect("cell value type mismatch"))
                }
                Err(fault) => err(self, &fault),
            };
        }
        let target = self.insert_cell(Err(Fault::unset()), None, false);
        self.add_reader(&[input.key], move |engine| {
            let inner = match engine.raw_state(input.key) {
                Ok(value) => {
                    succ(engine, value.downcast_ref::<T>().expect("cell value type mismatch"))
                }
                Err(fault) => err(engine, &fault),
            };
            engine.connect(target, inner.key);
        });
        Cell::from_key(target)
    }

    /// Recovers from failures: values pass through unchanged, faults are
    /// mapped to a replacement value by `handler`.
    pub fn catch<T, F>(&mut self, input: Cell<T>, mut handler: F) -> Cell<T>
    where
        T: PartialEq + 'static,
        F: FnMut(&Fault) -> T + 'static,
    {
        if self.is_constant_key(input.key) {
            return match self.raw_state(input.key) {
                Ok(_) => input,
                Err(fault) => {
                    let out = handler(&fault);
                    self.constant(out)
                }
            };
        }
        let target = self.insert_cell(Err(Fault::unset()), Some(structural_eq::<T>()), false);
        self.add_reader(&[input.key], move |engine| {
            let result: RawResult = match engine.raw_state(input.key) {
                Ok(value) => Ok(value),
                Err(fault) => Ok(Rc::new(handler(&fault))),
            };
            engine.write_raw(target, result, true);
        });
        Cell::from_key(target)
    }

    /// Flattens a cell of cells: the output follows whichever inner cell
    /// the outer one currently holds. Equivalent to `bind` with the
    /// identity function.
    pub fn switch<T: 'static>(&mut self, input: Cell<Cell<T>>) -> Cell<T> {
        self.bind(input, |_, inner| *inner)
    }

    /// Mirrors `source` into `target`: writes the current state through and
    /// subscribes `target` to further changes, with the subscription scoped
    /// to the current computation point. The subscription bypasses
    /// `target`'s equality (the source's own equality already filtered).
    pub(crate) fn connect(&mut self, target: CellKey, source: CellKey) {
        let state = self.raw_state(source);
        self.write_raw(target, state, true);
        if self.is_constant_key(source) {
            return;
        }
        let dep: DepFn = Rc::new(RefCell::new(move |engine: &mut Engine, result: &RawResult| {
            engine.write_raw(target, result.clone(), false);
        }));
        let entry = self.cells[source].deps.push_back(dep);
        self.cleanup(move |engine| {
            if let Some(cell) = engine.cells.get_mut(source) {
                cell.deps.remove(entry);
            }
        });
    }

    /// Current values of `keys`, cloned, failing fast on the first fault.
    fn gather<T: Clone + 'static>(&self, keys: &[CellKey]) -> Result<Vec<T>, Fault> {
        keys.iter()
            .map(|&key| match &self.cells[key].state {
                Ok(value) => Ok(value
                    .downcast_ref::<T>()
                    .expect("cell value type mismatch")
                    .clone()),
                Err(fault) => Err(fault.clone()),
            })
            .collect()
    }
}
