// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Routines the scheduler synthesizes for itself.

use std::rc::Rc;

use crate::completion::Settler;
use crate::coroutine::{Coroutine, Step};
use crate::outcome::Outcome;
use crate::value::Value;

use super::continuation::Continuation;
use super::instruction::{Instruction, Script};

/// Forced return of a still-live child.
///
/// The first resume calls the child's `exit`; later resumes continue any
/// cleanup it yielded. A failure fed in is remembered and becomes the
/// result once cleanup finishes, so failures keep flowing through a
/// sweep. A failure raised by the cleanup itself wins.
pub(crate) struct Exit {
    inner: Script,
    started: bool,
    output: Outcome,
}

impl Exit {
    pub fn new(inner: Script) -> Self {
        Self {
            inner,
            started: false,
            output: Outcome::unit(),
        }
    }
}

impl Clone for Exit {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.fork(),
            started: self.started,
            output: self.output.clone(),
        }
    }
}

impl Coroutine<Instruction> for Exit {
    fn resume(&mut self, input: Outcome) -> Step<Instruction> {
        let input = match input {
            Outcome::Failure(error) => {
                self.output = Outcome::Failure(error);
                Outcome::unit()
            }
            ok => ok,
        };
        let step = if self.started {
            self.inner.resume(input)
        } else {
            self.started = true;
            self.inner.exit()
        };
        match step {
            Step::Done(Outcome::Success(_)) => Step::Done(self.output.clone()),
            other => other,
        }
    }
}

/// Delivers a result stored while children were being swept.
///
/// A failure arriving from the sweep replaces the stored result.
#[derive(Clone)]
pub(crate) struct Settled {
    stored: Outcome,
}

impl Settled {
    pub fn new(stored: Outcome) -> Self {
        Self { stored }
    }
}

impl Coroutine<Instruction> for Settled {
    fn resume(&mut self, input: Outcome) -> Step<Instruction> {
        match input {
            Outcome::Failure(error) => Step::Done(Outcome::Failure(error)),
            Outcome::Success(_) => Step::Done(self.stored.clone()),
        }
    }
}

/// Resumes a continuation from outside the reduction that captured it.
#[derive(Clone)]
pub(crate) struct Reentry {
    k: Continuation,
    value: Option<Value>,
}

impl Reentry {
    pub fn new(k: Continuation, value: Value) -> Self {
        Self {
            k,
            value: Some(value),
        }
    }
}

impl Coroutine<Instruction> for Reentry {
    fn resume(&mut self, input: Outcome) -> Step<Instruction> {
        match self.value.take() {
            Some(value) => Step::Yield(self.k.resume(value)),
            None => Step::Done(input),
        }
    }
}

/// Root wrapper that reports the root's own result to a completion.
pub(crate) struct Root {
    inner: Script,
    settler: Rc<Settler<Value>>,
}

impl Root {
    pub fn new(inner: Script, settler: Settler<Value>) -> Self {
        Self {
            inner,
            settler: Rc::new(settler),
        }
    }

    fn report(&self, step: Step<Instruction>) -> Step<Instruction> {
        if let Step::Done(outcome) = &step {
            self.settler.settle(outcome.clone());
        }
        step
    }
}

impl Clone for Root {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.fork(),
            settler: self.settler.clone(),
        }
    }
}

impl Coroutine<Instruction> for Root {
    fn resume(&mut self, input: Outcome) -> Step<Instruction> {
        let step = self.inner.resume(input);
        self.report(step)
    }

    fn exit(&mut self) -> Step<Instruction> {
        let step = self.inner.exit();
        self.report(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion;
    use crate::coroutine::Staged;
    use crate::error::Error;
    use std::cell::RefCell;

    fn done_value(step: Step<Instruction>) -> Outcome {
        match step {
            Step::Done(outcome) => outcome,
            Step::Yield(i) => panic!("unexpected yield {:?}", i),
        }
    }

    #[test]
    fn settled_returns_stored_unless_failure_arrives() {
        let mut s = Settled::new(Outcome::of(3));
        let out = done_value(s.resume(Outcome::unit())).unbox().unwrap();
        assert_eq!(out.cloned::<i32>(), Ok(3));

        let mut s = Settled::new(Outcome::of(3));
        let out = done_value(s.resume(Outcome::Failure(Error::raised("sweep"))));
        assert_eq!(out.unbox().unwrap_err(), Error::raised("sweep"));
    }

    #[test]
    fn exit_runs_cleanup_and_keeps_incoming_failure() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = log.clone();
        let mut child = Staged::new()
            .and_then(|_| Step::Yield(Instruction::Suspend))
            .on_exit(move || {
                l.borrow_mut().push("exited");
                Outcome::unit()
            });
        child.resume(Outcome::unit());

        let mut exit = Exit::new(Box::new(child));
        let out = done_value(exit.resume(Outcome::Failure(Error::raised("parent"))));
        assert_eq!(out.unbox().unwrap_err(), Error::raised("parent"));
        assert_eq!(*log.borrow(), vec!["exited"]);
    }

    #[test]
    fn exit_cleanup_failure_wins() {
        let mut child = Staged::new()
            .and_then(|_| Step::Yield(Instruction::Suspend))
            .on_exit(|| Outcome::Failure(Error::raised("cleanup")));
        child.resume(Outcome::unit());
        let mut exit = Exit::new(Box::new(child));
        let out = done_value(exit.resume(Outcome::unit()));
        assert_eq!(out.unbox().unwrap_err(), Error::raised("cleanup"));
    }

    #[test]
    fn root_reports_once_even_when_forked() {
        let (done, settler) = completion::pending();
        let mut root = Root::new(
            Box::new(Staged::<Instruction>::returning(Outcome::of(1))),
            settler,
        );
        let mut fork = root.clone();
        done_value(root.resume(Outcome::unit()));
        done_value(fork.resume(Outcome::unit()));
        let value = done.outcome().unwrap().unbox().unwrap();
        assert_eq!(value.cloned::<i32>(), Ok(1));
    }
}
