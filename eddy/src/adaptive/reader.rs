//! Reader records: re-runnable computations bracketed by timestamps.

use std::cell::RefCell;
use std::rc::Rc;

use super::graph::Engine;
use super::queue::QueueEntry;
use super::{CellKey, DepFn, RawResult, ReaderKey, TimeKey};

/// Arena record of one reader. The boxed body is the capability the
/// scheduler invokes; `start`/`finish` bracket every side effect the body
/// produces on the timeline.
pub(crate) struct ReaderData {
    pub run: Rc<RefCell<dyn FnMut(&mut Engine)>>,
    pub start: TimeKey,
    /// Re-ticked after every run; the previous finish dies in the closing
    /// splice.
    pub finish: TimeKey,
    /// True while an enqueue for this reader is outstanding, so the queue
    /// holds it at most once per notification burst.
    pub queued: bool,
}

impl Engine {
    /// Installs a reader over `inputs`: ticks its start, runs `body` once
    /// eagerly (so nested writes and sub-readers materialize inside the
    /// range), ticks its finish, then subscribes an enqueue-dependency to
    /// each input. Both the subscriptions and the reader record itself are
    /// torn down when `start` is spliced out.
    pub(crate) fn add_reader(
        &mut self,
        inputs: &[CellKey],
        mut body: impl FnMut(&mut Engine) + 'static,
    ) -> ReaderKey {
        let start = self.timeline.tick();
        self.run_depth += 1;
        body(self);
        self.run_depth -= 1;
        let finish = self.timeline.tick();

        let run: Rc<RefCell<dyn FnMut(&mut Engine)>> = Rc::new(RefCell::new(body));
        let reader = self.readers.insert(ReaderData {
            run,
            start,
            finish,
            queued: false,
        });
        tracing::trace!(?reader, inputs = inputs.len(), "reader installed");

        for &input in inputs {
            let cell = self.cells.get_mut(input).expect("stale cell handle");
            if cell.constant {
                continue;
            }
            let dep: DepFn = Rc::new(RefCell::new(move |engine: &mut Engine, _: &RawResult| {
                engine.enqueue_reader(reader);
            }));
            let entry = cell.deps.push_back(dep);
            self.timeline.add_cleanup(
                start,
                Box::new(move |engine| {
                    if let Some(cell) = engine.cells.get_mut(input) {
                        cell.deps.remove(entry);
                    }
                }),
            );
        }
        self.timeline.add_cleanup(
            start,
            Box::new(move |engine| {
                engine.readers.remove(reader);
            }),
        );
        reader
    }

    /// Schedules a reader for re-execution, unless it is already pending.
    pub(crate) fn enqueue_reader(&mut self, reader: ReaderKey) {
        let Some(data) = self.readers.get_mut(reader) else {
            return;
        };
        if data.queued {
            return;
        }
        data.queued = true;
        let entry = QueueEntry {
            start: data.start,
            reader,
        };
        self.queue.push(entry, &self.timeline);
        tracing::trace!(?reader, "reader enqueued");
    }
}
