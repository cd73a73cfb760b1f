//! Module for the [`Engine`] struct: the runtime context that owns all
//! adaptive state and drives change propagation.

use std::any::Any;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::rc::Rc;

use slotmap::SlotMap;

use super::cell::CellData;
use super::event::EventData;
use super::fault::Fault;
use super::queue::ReaderQueue;
use super::reader::ReaderData;
use super::timeline::Timeline;
use super::{CellKey, Cleanup, EventKey, MemoKey, RawResult, ReaderKey, TimeKey};

/// The self-adjusting computation engine. Owns the timeline, the
/// cell/reader/event arenas, the pending-reader queue, and the event FIFO,
/// and exposes the entire API as methods.
///
/// The engine is strictly single-threaded; its internals use `Rc`, so the
/// type is `!Send` and the discipline is enforced at compile time. All
/// handles ([`Cell`](super::Cell), [`Writer`](super::Writer),
/// [`Event`](super::Event), ...) are keys into this engine's arenas and must
/// not be used with another engine or retained across [`Engine::init`].
pub struct Engine {
    pub(crate) timeline: Timeline,
    pub(crate) cells: SlotMap<CellKey, CellData>,
    pub(crate) readers: SlotMap<ReaderKey, ReaderData>,
    pub(crate) events: SlotMap<EventKey, EventData>,
    pub(crate) memos: SlotMap<MemoKey, Box<dyn Any>>,
    pub(crate) queue: ReaderQueue,
    /// Finish timestamps of the readers currently executing, innermost
    /// last. Memoization uses the top as the bound a cached range must fit
    /// under.
    pub(crate) finish_stack: Vec<TimeKey>,
    /// Depth of reader bodies currently on the call stack, including the
    /// eager first run during construction (which has no finish yet).
    pub(crate) run_depth: usize,
    /// FIFO of event occurrences not yet dispatched.
    pub(crate) sends: VecDeque<(EventKey, RawResult)>,
    /// Guards the event dispatch loop against re-entry: nested sends only
    /// enqueue, the outermost loop drains.
    pub(crate) dispatching: bool,
    pub(crate) fault_handler: Option<Rc<RefCell<dyn FnMut(&Fault)>>>,
    pub(crate) fault_eq: Option<Rc<dyn Fn(&Fault, &Fault) -> bool>>,
    pub(crate) debug_hook: Option<Rc<RefCell<dyn FnMut(&str)>>>,
}

impl Engine {
    /// Creates a fresh engine.
    pub fn new() -> Self {
        Self {
            timeline: Timeline::new(),
            cells: SlotMap::with_key(),
            readers: SlotMap::with_key(),
            events: SlotMap::with_key(),
            memos: SlotMap::with_key(),
            queue: ReaderQueue::new(),
            finish_stack: Vec::new(),
            run_depth: 0,
            sends: VecDeque::new(),
            dispatching: false,
            fault_handler: None,
            fault_eq: None,
            debug_hook: None,
        }
    }

    /// Resets the engine: every outstanding cleanup fires once, in timeline
    /// order, then the timeline, arenas, queues and memo tables are
    /// discarded. Handles created before the reset must not be used again.
    /// Installed fault/debug hooks survive.
    pub fn init(&mut self) {
        let cleanups = self.timeline.drain_all_cleanups();
        for cleanup in cleanups {
            cleanup(self);
        }
        self.timeline = Timeline::new();
        self.cells.clear();
        self.readers.clear();
        self.events.clear();
        self.memos.clear();
        self.queue.clear();
        self.finish_stack.clear();
        self.run_depth = 0;
        self.sends.clear();
        self.dispatching = false;
        tracing::debug!("engine reset");
    }

    /// Installs the handler invoked for faults that have no output cell to
    /// land in (currently: dependency cycles detected mid-propagation).
    /// Without a handler such faults panic.
    pub fn set_fault_handler(&mut self, handler: impl FnMut(&Fault) + 'static) {
        self.fault_handler = Some(Rc::new(RefCell::new(handler)));
    }

    /// Overrides the equivalence used when a fault is written over a fault.
    /// The default treats faults as equal only by identity (with any two
    /// unset faults equal), which can cause spurious propagation for
    /// distinct-but-equivalent errors.
    pub fn set_fault_eq(&mut self, eq: impl Fn(&Fault, &Fault) -> bool + 'static) {
        self.fault_eq = Some(Rc::new(eq));
    }

    /// Installs a line-oriented debug hook fed by the engine's key decision
    /// points, complementing the `tracing` instrumentation.
    pub fn set_debug(&mut self, hook: impl FnMut(&str) + 'static) {
        self.debug_hook = Some(Rc::new(RefCell::new(hook)));
    }

    pub(crate) fn debug_emit(&self, message: impl FnOnce() -> String) {
        if let Some(hook) = &self.debug_hook {
            (&mut *hook.borrow_mut())(&message());
        }
    }

    /// Registers `action` to run when the current point of the computation
    /// is discarded. A fresh timestamp is ticked to anchor the action, so a
    /// cleanup registered inside a reader body fires when that run's range
    /// is spliced out; at top level it only fires on [`Engine::init`].
    pub fn cleanup(&mut self, action: impl FnOnce(&mut Engine) + 'static) {
        let t = self.timeline.tick();
        self.timeline.add_cleanup(t, Box::new(action));
    }

    /// Attaches an arena-removal cleanup for a resource created inside a
    /// currently running reader, so splice-out is also deallocation.
    /// Resources created at top level live until [`Engine::init`].
    pub(crate) fn scope_to_current_run(&mut self, action: Cleanup) {
        if self.run_depth > 0 {
            let t = self.timeline.tick();
            self.timeline.add_cleanup(t, action);
        }
    }

    /// Drives the pending-reader queue to a fixed point: stale readers are
    /// re-executed in increasing start-timestamp order, each one's unused
    /// previous effects spliced out. On return no live reader is pending
    /// and the virtual clock is back where it was.
    pub fn propagate(&mut self) {
        self.propagate_until(None);
    }

    /// Propagation loop, optionally bounded: with `until` set, stops before
    /// any reader whose start lies after `until` (used by memoization to
    /// reconcile a re-spliced range).
    #[tracing::instrument(level = "trace", skip(self))]
    pub(crate) fn propagate_until(&mut self, until: Option<TimeKey>) {
        if self.queue.is_empty() {
            return;
        }
        let now_before = self.timeline.now();
        let mut last_start: Option<TimeKey> = None;
        while let Some(entry) = self.queue.peek() {
            if !self.timeline.is_live(entry.start) || !self.readers.contains_key(entry.reader) {
                // Stale: its range was spliced out since it was enqueued.
                self.queue.pop(&self.timeline);
                continue;
            }
            if let Some(until) = until {
                if self.timeline.compare(entry.start, until) == Ordering::Greater {
                    break;
                }
            }
            self.queue.pop(&self.timeline);
            if let Some(reader) = self.readers.get_mut(entry.reader) {
                reader.queued = false;
            }
            if let Some(prev) = last_start {
                if self.timeline.compare(entry.start, prev) != Ordering::Greater {
                    // A reader at or before the point we already passed was
                    // re-enqueued mid-propagation: a dependency cycle.
                    self.raise_cycle();
                    continue;
                }
            }
            last_start = Some(entry.start);
            self.run_reader(entry.reader);
        }
        debug_assert!(self.timeline.is_live(now_before));
        self.timeline.set_now(now_before);
    }

    /// Re-executes one reader: clock to its start, run the body, splice out
    /// whatever remains of its previous range, and give it a fresh finish.
    fn run_reader(&mut self, reader: ReaderKey) {
        let (run, start, finish) = {
            let data = &self.readers[reader];
            (Rc::clone(&data.run), data.start, data.finish)
        };
        let _span = tracing::trace_span!("run_reader", reader = ?reader).entered();
        self.debug_emit(|| format!("run reader {:?}", reader));

        self.finish_stack.push(finish);
        self.timeline.set_now(start);
        self.run_depth += 1;
        (&mut *run.borrow_mut())(self);
        self.run_depth -= 1;
        self.finish_stack.pop();

        // Everything of the previous run that the body did not re-splice is
        // now the unused suffix `(now, finish]`; discard it.
        let now = self.timeline.now();
        let cleanups = self.timeline.splice_out(now, finish);
        for cleanup in cleanups {
            cleanup(self);
        }
        let new_finish = self.timeline.tick();
        if let Some(data) = self.readers.get_mut(reader) {
            data.finish = new_finish;
        }
    }

    fn raise_cycle(&mut self) {
        tracing::error!("dependency cycle detected during propagation");
        let fault = Fault::cycle();
        match self.fault_handler.clone() {
            Some(handler) => (&mut *handler.borrow_mut())(&fault),
            None => panic!("eddy: dependency cycle detected during propagation"),
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
