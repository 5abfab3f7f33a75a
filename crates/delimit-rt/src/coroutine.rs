// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Resumable instruction sequences.
//!
//! Both schedulers drive routines through one primitive: feed an outcome
//! in, get either the next instruction or the final outcome back. A
//! failure fed in is the "thrown" value; a coroutine that does not handle
//! it finishes with that failure.

use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use crate::error::{panic_message, Error};
use crate::outcome::Outcome;
use crate::value::Value;

/// Result of advancing a coroutine by one step.
#[derive(Debug)]
pub enum Step<I> {
    /// Suspended on an instruction for the scheduler.
    Yield(I),
    /// Sequence exhausted with a final outcome.
    Done(Outcome),
}

/// A lazy sequence of instructions of type `I`.
pub trait Coroutine<I> {
    /// Advance with the outcome of the previous instruction.
    fn resume(&mut self, input: Outcome) -> Step<I>;

    /// Forced return. Cleanup may itself yield instructions; later
    /// `resume` calls continue it.
    fn exit(&mut self) -> Step<I> {
        Step::Done(Outcome::unit())
    }
}

impl<I, C: Coroutine<I> + ?Sized> Coroutine<I> for Box<C> {
    fn resume(&mut self, input: Outcome) -> Step<I> {
        (**self).resume(input)
    }

    fn exit(&mut self) -> Step<I> {
        (**self).exit()
    }
}

/// Coroutine backed by a closure.
#[derive(Clone)]
pub struct FromFn<F>(F);

pub fn from_fn<I, F>(f: F) -> FromFn<F>
where
    F: FnMut(Outcome) -> Step<I>,
{
    FromFn(f)
}

impl<I, F> Coroutine<I> for FromFn<F>
where
    F: FnMut(Outcome) -> Step<I>,
{
    fn resume(&mut self, input: Outcome) -> Step<I> {
        (self.0)(input)
    }
}

type Stage<I> = Rc<dyn Fn(Outcome) -> Step<I>>;

/// A coroutine built from a fixed list of stages.
///
/// Stage `n` receives the outcome of the instruction stage `n - 1`
/// yielded (the first stage receives the start input). Once every stage
/// has yielded, the next resume finishes with the value it was given.
/// Clones share the stage list and copy the position, so a clone resumes
/// from wherever the original was when cloned.
pub struct Staged<I> {
    stages: Rc<Vec<Stage<I>>>,
    on_exit: Option<Rc<dyn Fn() -> Outcome>>,
    pc: usize,
    finished: bool,
}

impl<I: 'static> Staged<I> {
    pub fn new() -> Self {
        Self {
            stages: Rc::new(Vec::new()),
            on_exit: None,
            pc: 0,
            finished: false,
        }
    }

    /// A sequence that immediately finishes with `outcome`.
    pub fn returning(outcome: Outcome) -> Self {
        Self::new().then(move |_| Step::Done(outcome.clone()))
    }

    /// Append a stage that sees the raw outcome, failures included.
    pub fn then(mut self, stage: impl Fn(Outcome) -> Step<I> + 'static) -> Self {
        Rc::make_mut(&mut self.stages).push(Rc::new(stage));
        self
    }

    /// Append a stage that only runs on success; a failure finishes the
    /// sequence with that failure.
    pub fn and_then(self, stage: impl Fn(Value) -> Step<I> + 'static) -> Self {
        self.then(move |input| match input {
            Outcome::Success(value) => stage(value),
            Outcome::Failure(error) => Step::Done(Outcome::Failure(error)),
        })
    }

    /// Cleanup run on a forced return of a started, unfinished sequence.
    pub fn on_exit(mut self, f: impl Fn() -> Outcome + 'static) -> Self {
        self.on_exit = Some(Rc::new(f));
        self
    }

    /// How many stages have run.
    pub fn position(&self) -> usize {
        self.pc
    }
}

impl<I: 'static> Default for Staged<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I> Clone for Staged<I> {
    fn clone(&self) -> Self {
        Self {
            stages: self.stages.clone(),
            on_exit: self.on_exit.clone(),
            pc: self.pc,
            finished: self.finished,
        }
    }
}

impl<I> Coroutine<I> for Staged<I> {
    fn resume(&mut self, input: Outcome) -> Step<I> {
        if self.finished {
            return Step::Done(input);
        }
        let Some(stage) = self.stages.get(self.pc).cloned() else {
            self.finished = true;
            return Step::Done(input);
        };
        self.pc += 1;
        let step = stage(input);
        if let Step::Done(_) = step {
            self.finished = true;
        }
        step
    }

    fn exit(&mut self) -> Step<I> {
        let started = self.pc > 0 && !self.finished;
        self.finished = true;
        match &self.on_exit {
            Some(cleanup) if started => Step::Done(cleanup()),
            _ => Step::Done(Outcome::unit()),
        }
    }
}

/// Run one coroutine step, turning a panic into `Error::Panicked`.
pub(crate) fn guarded<I>(catch_panics: bool, step: impl FnOnce() -> Step<I>) -> Step<I> {
    if !catch_panics {
        return step();
    }
    match panic::catch_unwind(AssertUnwindSafe(step)) {
        Ok(step) => step,
        Err(payload) => Step::Done(Outcome::Failure(Error::Panicked(panic_message(payload)))),
    }
}
