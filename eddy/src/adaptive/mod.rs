//! The adaptive runtime: changeable cells, readers re-run in virtual-time
//! order, and the push event layer built on top of them.
//!
//! The central item is the [`Engine`](graph::Engine) struct, which owns every
//! piece of runtime state (the timeline, the cell/reader/event arenas, the
//! pending-reader queue, and the event FIFO) and exposes the whole API as
//! methods. Handles ([`Cell`](cell::Cell), [`Writer`](cell::Writer),
//! [`Event`](event::Event), ...) are small `Copy` keys into the engine's
//! arenas and are only meaningful for the engine that created them.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

pub mod cell;
pub mod event;
pub mod fault;
pub mod graph;
pub mod memo;

pub(crate) mod binding;
pub(crate) mod queue;
pub(crate) mod reader;
pub(crate) mod timeline;

pub use cell::{Cell, Subscription, Writer};
pub use event::{Event, Sender};
pub use fault::Fault;
pub use graph::Engine;
pub use memo::Memo;

slotmap::new_key_type! {
    /// Key of a cell in the engine's cell arena.
    pub struct CellKey;
    /// Key of a reader record in the engine's reader arena.
    pub struct ReaderKey;
    /// Key of an event node in the engine's event arena.
    pub struct EventKey;
    /// Key of a memo table in the engine's memo arena.
    pub struct MemoKey;
    /// Key of a timestamp on the virtual timeline.
    pub struct TimeKey;
}

/// Type-erased cell state: a value or a first-class failure.
pub(crate) type RawResult = Result<Rc<dyn Any>, Fault>;

/// A dependent callback, invoked with the new state of the cell or event it
/// is attached to. Shared so a dispatch snapshot can outlive list mutation.
pub(crate) type DepFn = Rc<RefCell<dyn FnMut(&mut Engine, &RawResult)>>;

/// A cleanup action attached to a timestamp, fired exactly once when that
/// timestamp is spliced out of the timeline (or the engine is reset).
pub(crate) type Cleanup = Box<dyn FnOnce(&mut Engine)>;

/// Type-erased value equality used to suppress redundant cell writes.
pub(crate) type EqFn = Rc<dyn Fn(&dyn Any, &dyn Any) -> bool>;

/// Structural equality over `T`, erased. Mismatched payloads compare
/// unequal, mirroring the "fall back to not equal" rule for comparisons
/// that cannot be carried out.
pub(crate) fn structural_eq<T: PartialEq + 'static>() -> EqFn {
    Rc::new(|a: &dyn Any, b: &dyn Any| {
        match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    })
}
