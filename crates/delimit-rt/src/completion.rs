// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! External completions.
//!
//! A `Completion` is a one-shot cell that settles exactly once, either
//! before or after a callback is registered on it. `JobQueue` stands in
//! for a host event loop: jobs deferred on it run only when the owner
//! drains the queue, which is how tests produce "later" settlements.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use crate::error::Error;
use crate::outcome::Outcome;

type Waiter<T> = Box<dyn FnOnce(Outcome<T>)>;

enum State<T> {
    Pending(Vec<Waiter<T>>),
    Settled(Outcome<T>),
}

/// Read side of a one-shot completion.
pub struct Completion<T> {
    state: Rc<RefCell<State<T>>>,
}

/// Write side of a one-shot completion.
///
/// Dropping it while the completion is still pending fails the
/// completion with `Error::Abandoned`.
pub struct Settler<T: Clone + 'static> {
    state: Rc<RefCell<State<T>>>,
}

/// Create a pending completion and the handle that settles it.
pub fn pending<T: Clone + 'static>() -> (Completion<T>, Settler<T>) {
    let state = Rc::new(RefCell::new(State::Pending(Vec::new())));
    (
        Completion {
            state: state.clone(),
        },
        Settler { state },
    )
}

impl<T: Clone + 'static> Completion<T> {
    /// A completion that already succeeded.
    pub fn resolved(value: T) -> Self {
        Self::settled(Outcome::Success(value))
    }

    /// A completion that already failed.
    pub fn rejected(error: Error) -> Self {
        Self::settled(Outcome::Failure(error))
    }

    fn settled(outcome: Outcome<T>) -> Self {
        Self {
            state: Rc::new(RefCell::new(State::Settled(outcome))),
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(*self.state.borrow(), State::Settled(_))
    }

    /// The settled outcome, if any.
    pub fn outcome(&self) -> Option<Outcome<T>> {
        match &*self.state.borrow() {
            State::Settled(outcome) => Some(outcome.clone()),
            State::Pending(_) => None,
        }
    }

    /// Register a callback for settlement.
    ///
    /// Runs `f` immediately if the completion has already settled.
    pub fn on_settle(&self, f: impl FnOnce(Outcome<T>) + 'static) {
        let settled = match &mut *self.state.borrow_mut() {
            State::Pending(waiters) => {
                waiters.push(Box::new(f));
                return;
            }
            State::Settled(outcome) => outcome.clone(),
        };
        f(settled);
    }
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.state.borrow() {
            State::Pending(waiters) => format!("pending ({} waiters)", waiters.len()),
            State::Settled(Outcome::Success(_)) => "succeeded".to_string(),
            State::Settled(Outcome::Failure(e)) => format!("failed: {}", e),
        };
        f.debug_struct("Completion").field("state", &state).finish()
    }
}

impl<T: Clone + 'static> Settler<T> {
    pub fn succeed(&self, value: T) -> bool {
        self.settle(Outcome::Success(value))
    }

    pub fn fail(&self, error: Error) -> bool {
        self.settle(Outcome::Failure(error))
    }

    /// Settle the completion. Returns false if it had already settled.
    pub fn settle(&self, outcome: Outcome<T>) -> bool {
        let waiters = {
            let mut state = self.state.borrow_mut();
            if let State::Settled(_) = *state {
                return false;
            }
            match std::mem::replace(&mut *state, State::Settled(outcome.clone())) {
                State::Pending(waiters) => waiters,
                State::Settled(_) => Vec::new(),
            }
        };
        for waiter in waiters {
            waiter(outcome.clone());
        }
        true
    }

    pub fn is_settled(&self) -> bool {
        matches!(*self.state.borrow(), State::Settled(_))
    }
}

impl<T: Clone + 'static> Drop for Settler<T> {
    fn drop(&mut self) {
        if !self.is_settled() {
            self.fail(Error::Abandoned);
        }
    }
}

impl<T: Clone + 'static> fmt::Debug for Settler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settler")
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// FIFO of deferred jobs, drained by its owner.
#[derive(Clone, Default)]
pub struct JobQueue {
    jobs: Rc<RefCell<VecDeque<Box<dyn FnOnce()>>>>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` on a later drain.
    pub fn defer(&self, job: impl FnOnce() + 'static) {
        self.jobs.borrow_mut().push_back(Box::new(job));
    }

    /// A completion that settles with `outcome` on a later drain.
    pub fn settle_later<T: Clone + 'static>(&self, outcome: Outcome<T>) -> Completion<T> {
        let (completion, settler) = pending();
        self.defer(move || {
            settler.settle(outcome);
        });
        completion
    }

    pub fn len(&self) -> usize {
        self.jobs.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.borrow().is_empty()
    }

    /// Run jobs, including ones deferred by other jobs, until none are
    /// left. Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        loop {
            // Release the borrow before running: jobs may defer more jobs.
            let job = self.jobs.borrow_mut().pop_front();
            let Some(job) = job else {
                break;
            };
            job();
            ran += 1;
        }
        ran
    }
}

impl fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobQueue").field("len", &self.len()).finish()
    }
}
