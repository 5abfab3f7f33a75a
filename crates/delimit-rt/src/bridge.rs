// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Completion-bridging scheduler.
//!
//! A trampoline over routines whose only suspension point is awaiting an
//! external completion. The work stack holds two kinds of action: start a
//! routine, and resume a routine with an outcome. A settle callback
//! pushes a resume and restarts the trampoline only if it has already
//! unwound, because a completion may settle before or after `run`
//! returns.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use crate::completion::{self, Completion, Settler};
use crate::config::SchedulerConfig;
use crate::coroutine::{guarded, Coroutine, Step};
use crate::error::{panic_message, Error};
use crate::outcome::Outcome;
use crate::value::Value;

/// The single instruction a bridged routine can yield.
pub enum Instruction {
    Await(Completion<Value>),
}

/// Await `completion` from inside a routine.
pub fn call(completion: Completion<Value>) -> Instruction {
    Instruction::Await(completion)
}

/// A started bridged routine.
pub type Task = Box<dyn Coroutine<Instruction>>;

type StartFn = Box<dyn FnOnce() -> Result<Task, Error>>;

enum Thunk {
    Start { op: StartFn, settler: Settler<Value> },
    Resume { routine: Routine, outcome: Option<Outcome> },
}

struct Routine {
    id: u64,
    task: Task,
    settler: Settler<Value>,
}

struct Trampoline {
    stack: Vec<Thunk>,
    running: bool,
    next_id: u64,
    config: SchedulerConfig,
}

/// Handle to one trampoline. Clones share the same work stack.
#[derive(Clone)]
pub struct Bridge {
    state: Rc<RefCell<Trampoline>>,
}

impl Bridge {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            state: Rc::new(RefCell::new(Trampoline {
                stack: Vec::new(),
                running: false,
                next_id: 0,
                config,
            })),
        }
    }

    /// Start `op` and return the completion of its eventual result.
    pub fn run<F>(&self, op: F) -> Completion<Value>
    where
        F: FnOnce() -> Result<Task, Error> + 'static,
    {
        let (completion, settler) = completion::pending();
        let idle = {
            let mut t = self.state.borrow_mut();
            t.stack.push(Thunk::Start {
                op: Box::new(op),
                settler,
            });
            !t.running
        };
        if idle {
            drive(&self.state);
        }
        completion
    }

    pub fn is_running(&self) -> bool {
        self.state.borrow().running
    }

    /// Actions queued but not yet processed.
    pub fn pending_actions(&self) -> usize {
        self.state.borrow().stack.len()
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `op` on a fresh trampoline.
pub fn run<F>(op: F) -> Completion<Value>
where
    F: FnOnce() -> Result<Task, Error> + 'static,
{
    Bridge::new().run(op)
}

/// Clears the running flag however the drain loop exits.
struct Running<'a>(&'a RefCell<Trampoline>);

impl<'a> Running<'a> {
    fn enter(state: &'a RefCell<Trampoline>) -> Self {
        state.borrow_mut().running = true;
        Running(state)
    }
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.borrow_mut().running = false;
    }
}

fn drive(state: &Rc<RefCell<Trampoline>>) {
    let _running = Running::enter(state);
    loop {
        // No borrow may be held while routine code runs.
        let thunk = state.borrow_mut().stack.pop();
        match thunk {
            Some(Thunk::Start { op, settler }) => start(state, op, settler),
            Some(Thunk::Resume { routine, outcome }) => resume(state, routine, outcome),
            None => break,
        }
    }
}

fn start(state: &Rc<RefCell<Trampoline>>, op: StartFn, settler: Settler<Value>) {
    let catch_panics = state.borrow().config.catch_panics;
    let started = if catch_panics {
        panic::catch_unwind(AssertUnwindSafe(op))
            .unwrap_or_else(|payload| Err(Error::Panicked(panic_message(payload))))
    } else {
        op()
    };

    match started {
        Ok(task) => {
            let mut t = state.borrow_mut();
            let id = t.next_id;
            t.next_id += 1;
            log::trace!("{}: started routine #{}", t.config.name, id);
            t.stack.push(Thunk::Resume {
                routine: Routine { id, task, settler },
                outcome: None,
            });
        }
        Err(error) => {
            log::debug!("{}: routine failed to start: {}", state.borrow().config.name, error);
            settler.fail(error);
        }
    }
}

fn resume(state: &Rc<RefCell<Trampoline>>, routine: Routine, outcome: Option<Outcome>) {
    let catch_panics = state.borrow().config.catch_panics;
    let Routine {
        id,
        mut task,
        settler,
    } = routine;
    let input = outcome.unwrap_or_else(Outcome::unit);

    match guarded(catch_panics, || task.resume(input)) {
        Step::Done(outcome) => {
            log::trace!(
                "{}: routine #{} finished (success: {})",
                state.borrow().config.name,
                id,
                outcome.is_success()
            );
            settler.settle(outcome);
        }
        Step::Yield(Instruction::Await(completion)) => {
            log::trace!("{}: routine #{} awaiting", state.borrow().config.name, id);
            let routine = Routine { id, task, settler };
            let state = state.clone();
            completion.on_settle(move |outcome| {
                let idle = {
                    let mut t = state.borrow_mut();
                    t.stack.push(Thunk::Resume {
                        routine,
                        outcome: Some(outcome),
                    });
                    !t.running
                };
                if idle {
                    log::trace!("{}: re-entering trampoline", state.borrow().config.name);
                    drive(&state);
                }
            });
        }
    }
}
