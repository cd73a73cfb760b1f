//! First-class failure values.
//!
//! At the engine level, errors are data, not control flow: a failing
//! computation stores `Err(Fault)` in its output cell and dependents observe
//! it like any other state (see [`catch`](super::graph::Engine::catch) and
//! the `try_*` combinators for recovery).

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

/// A failure value carried by cells and events.
///
/// `Fault` is cheap to clone (shared representation) and compares by
/// identity: two faults are equal only if they are clones of one another,
/// with the single exception that any two [unset](Fault::unset) faults are
/// equal. [`Engine::set_fault_eq`](super::graph::Engine::set_fault_eq)
/// installs a different equivalence when identity is too conservative.
#[derive(Clone)]
pub struct Fault {
    repr: Rc<FaultRepr>,
}

#[derive(Error)]
enum FaultRepr {
    #[error("cell has no value yet")]
    Unset,
    #[error("dependency cycle detected during propagation")]
    Cycle,
    #[error("{0}")]
    Message(String),
    #[error("opaque fault payload")]
    Payload(Box<dyn Any>),
}

impl Fault {
    /// The fault stored in a cell that has not been written yet.
    pub fn unset() -> Self {
        Self {
            repr: Rc::new(FaultRepr::Unset),
        }
    }

    /// Fault raised when the propagation loop detects a dependency cycle.
    pub(crate) fn cycle() -> Self {
        Self {
            repr: Rc::new(FaultRepr::Cycle),
        }
    }

    /// A fault described by a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            repr: Rc::new(FaultRepr::Message(message.into())),
        }
    }

    /// A fault carrying an arbitrary payload, retrievable with
    /// [`Fault::downcast_ref`].
    pub fn payload(payload: impl Any) -> Self {
        Self {
            repr: Rc::new(FaultRepr::Payload(Box::new(payload))),
        }
    }

    /// True for faults created by [`Fault::unset`] (and [`Writer`
    /// clears](super::graph::Engine::clear)).
    pub fn is_unset(&self) -> bool {
        matches!(*self.repr, FaultRepr::Unset)
    }

    /// True for the cycle fault routed to the fault handler when propagation
    /// detects a dependency cycle.
    pub fn is_cycle(&self) -> bool {
        matches!(*self.repr, FaultRepr::Cycle)
    }

    /// The message of a [`Fault::msg`] fault.
    pub fn message(&self) -> Option<&str> {
        match &*self.repr {
            FaultRepr::Message(m) => Some(m),
            _ => None,
        }
    }

    /// Borrows the payload of a [`Fault::payload`] fault as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match &*self.repr {
            FaultRepr::Payload(p) => p.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Default fault equivalence: identity, with `Unset` equal to `Unset`.
    pub fn same(a: &Fault, b: &Fault) -> bool {
        Rc::ptr_eq(&a.repr, &b.repr) || (a.is_unset() && b.is_unset())
    }
}

impl fmt::Debug for FaultRepr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultRepr::Unset => f.write_str("Unset"),
            FaultRepr::Cycle => f.write_str("Cycle"),
            FaultRepr::Message(m) => f.debug_tuple("Message").field(m).finish(),
            FaultRepr::Payload(_) => f.write_str("Payload(..)"),
        }
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fault({:?})", self.repr)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.repr, f)
    }
}

impl std::error::Error for Fault {}

impl PartialEq for Fault {
    fn eq(&self, other: &Self) -> bool {
        Fault::same(self, other)
    }
}

impl Eq for Fault {}
