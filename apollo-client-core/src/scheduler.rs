//! Cooperative turn scheduling.
//!
//! The cache never delivers observer state synchronously: transitions are
//! deferred onto a turn queue so that chains of synchronous updates collapse
//! to a single delivery per observer. The host decides when a turn happens
//! by draining the queue.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

type Task = Box<dyn FnOnce()>;

/// A cloneable handle on a FIFO queue of deferred tasks.
///
/// Store operations are synchronous atoms; only observer delivery goes
/// through the queue. Clones share the same queue.
#[derive(Clone, Default)]
pub struct Scheduler {
    queue: Rc<RefCell<VecDeque<Task>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `task` to run on the next turn.
    pub fn defer(&self, task: impl FnOnce() + 'static) {
        self.queue.borrow_mut().push_back(Box::new(task));
    }

    /// Run queued tasks in order until the queue is empty. Tasks scheduled
    /// while draining run in the same call. Returns the number of tasks run.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = self.queue.borrow_mut().pop_front();
            match task {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => break,
            }
        }
        tracing::trace!(tasks = ran, "drained deferred task queue");
        ran
    }

    /// The number of tasks currently queued.
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn tasks_run_in_order() {
        let scheduler = Scheduler::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let order = order.clone();
            scheduler.defer(move || order.borrow_mut().push(tag));
        }
        assert_eq!(scheduler.pending(), 3);
        assert_eq!(scheduler.run_until_idle(), 3);
        assert_eq!(*order.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn tasks_scheduled_while_draining_run_in_the_same_drain() {
        let scheduler = Scheduler::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        {
            let order = order.clone();
            let nested = scheduler.clone();
            scheduler.defer(move || {
                order.borrow_mut().push("outer");
                let order = order.clone();
                nested.defer(move || order.borrow_mut().push("inner"));
            });
        }
        assert_eq!(scheduler.run_until_idle(), 2);
        assert_eq!(*order.borrow(), vec!["outer", "inner"]);
    }
}
