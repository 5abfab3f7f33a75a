// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The reduce loop.
//!
//! One `Machine` per scheduler: the routine arena, the work stack and the
//! register fed into the next step. The loop pops a routine, takes its
//! script out of the arena, advances it with no borrow held, then puts
//! the result back. User code (steps, blocks, forks and drops of
//! scripts) never runs while the machine is borrowed, so continuations
//! and re-entry can reach the machine from inside a step.

use std::cell::RefCell;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::thread;

use crate::completion::{self, Completion};
use crate::config::SchedulerConfig;
use crate::coroutine::{guarded, Staged, Step};
use crate::error::{panic_message, Error};
use crate::outcome::Outcome;
use crate::value::Value;

use super::arena::{Arena, Routine, RoutineId};
use super::continuation::{Capture, Continuation, Frame, Reenter};
use super::frames::{Exit, Root, Settled};
use super::instruction::{Instruction, Script};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Work {
    Routine(RoutineId),
    Boundary,
}

pub(super) struct Machine {
    pub routines: Arena,
    pub stack: Vec<Work>,
    pub register: Outcome,
    pub running: bool,
    pub unhandled: Vec<Error>,
    /// The routine whose step is in flight.
    current: Option<RoutineId>,
    /// Scripts of removed routines, dropped once the borrow is released.
    graveyard: Vec<Script>,
    /// Captured routines whose continuation died without being invoked.
    reclaim: Rc<RefCell<Vec<RoutineId>>>,
    pub config: SchedulerConfig,
}

impl Machine {
    fn new(config: SchedulerConfig) -> Self {
        Self {
            routines: Arena::new(),
            stack: Vec::new(),
            register: Outcome::unit(),
            running: false,
            unhandled: Vec::new(),
            current: None,
            graveyard: Vec::new(),
            reclaim: Rc::new(RefCell::new(Vec::new())),
            config,
        }
    }

    /// Pop until a live routine turns up, consuming boundaries on the way.
    fn next_routine(&mut self) -> Option<(RoutineId, Script)> {
        while let Some(work) = self.stack.pop() {
            let id = match work {
                Work::Boundary => {
                    log::trace!("{}: boundary consumed", self.config.name);
                    continue;
                }
                Work::Routine(id) => id,
            };
            let Some(routine) = self.routines.get_mut(id) else {
                log::trace!("{}: skipping stale {}", self.config.name, id);
                continue;
            };
            if let Some(script) = routine.script.take() {
                log::trace!("{}: resuming {} {}", self.config.name, routine.name, id);
                self.current = Some(id);
                return Some((id, script));
            }
        }
        None
    }

    /// Put a suspended routine back on the stack.
    fn park(&mut self, id: RoutineId, script: Script) {
        match self.routines.get_mut(id) {
            Some(routine) => {
                routine.script = Some(script);
                self.stack.push(Work::Routine(id));
            }
            None => self.graveyard.push(script),
        }
    }

    fn spawn_child(&mut self, name: &'static str, script: Script, parent: RoutineId) {
        let child = self.routines.spawn(name, script, Some(parent));
        log::trace!("{}: {} spawned {} {}", self.config.name, parent, name, child);
        self.stack.push(Work::Routine(child));
        self.register = Outcome::unit();
    }

    /// Pop the frames down to the nearest boundary, which is consumed,
    /// taking their scripts out. Bottom-to-top.
    fn take_frames(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(work) = self.stack.pop() {
            let id = match work {
                Work::Boundary => break,
                Work::Routine(id) => id,
            };
            let Some(routine) = self.routines.get_mut(id) else {
                continue;
            };
            if let Some(script) = routine.script.take() {
                frames.push(Frame {
                    id,
                    name: routine.name,
                    script,
                    parent: routine.parent,
                });
            }
        }
        frames.reverse();
        log::debug!("{}: captured {} frame(s)", self.config.name, frames.len());
        frames
    }

    /// Hand captured frames their scripts back. They stay off the stack
    /// until the continuation is invoked.
    fn restore(&mut self, frames: Vec<Frame>) {
        for frame in frames {
            match self.routines.get_mut(frame.id) {
                Some(routine) => routine.script = Some(frame.script),
                None => self.graveyard.push(frame.script),
            }
        }
    }

    /// A routine ran to completion: unlink it and publish its result,
    /// sweeping any children that are still alive first.
    fn finish(&mut self, id: RoutineId, script: Script, outcome: Outcome) {
        self.graveyard.push(script);
        let Some(routine) = self.routines.remove(id) else {
            self.register = outcome;
            return;
        };
        log::trace!(
            "{}: {} {} finished (success: {})",
            self.config.name,
            routine.name,
            id,
            outcome.is_success()
        );
        if let Some(parent) = routine.parent.and_then(|p| self.routines.get_mut(p)) {
            parent.children.shift_remove(&id);
        }

        if !routine.children.is_empty() {
            log::debug!(
                "{}: {} {} left {} live child(ren); forcing exit",
                self.config.name,
                routine.name,
                id,
                routine.children.len()
            );
            let settled = self
                .routines
                .spawn("settled", Box::new(Settled::new(outcome.clone())), None);
            self.stack.push(Work::Routine(settled));
            for child in routine.children {
                if let Some(exit) = self.force_exit(child) {
                    self.stack.push(Work::Routine(exit));
                }
            }
        }
        self.register = outcome;
    }

    /// Replace a live child with a parentless routine that runs its
    /// forced return. The wrapper inherits the child's own children.
    fn force_exit(&mut self, child: RoutineId) -> Option<RoutineId> {
        let mut routine = self.routines.remove(child)?;
        let Some(script) = routine.script.take() else {
            for grandchild in routine.children {
                self.routines.adopt(grandchild, None);
            }
            return None;
        };
        let wrapper = self.routines.insert(Routine::new("exit", Box::new(Exit::new(script))));
        for &grandchild in &routine.children {
            if let Some(g) = self.routines.get_mut(grandchild) {
                g.parent = Some(wrapper);
            }
        }
        if let Some(w) = self.routines.get_mut(wrapper) {
            w.children = routine.children;
        }
        Some(wrapper)
    }

    /// `Suspend`: a routine with a live parent waits to be swept, anything
    /// else is unreachable and freed.
    fn discard(&mut self, id: RoutineId, script: Script) {
        let attached = self
            .routines
            .get(id)
            .and_then(|r| r.parent)
            .is_some_and(|p| self.routines.contains(p));
        match self.routines.get_mut(id) {
            Some(routine) if attached => routine.script = Some(script),
            _ => {
                self.graveyard.push(script);
                self.bury(id);
            }
        }
    }

    /// Free a routine and every descendant that is not on the stack.
    fn bury(&mut self, id: RoutineId) {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            let Some(routine) = self.routines.remove(id) else {
                continue;
            };
            log::trace!("{}: freed {} {}", self.config.name, routine.name, id);
            if let Some(script) = routine.script {
                self.graveyard.push(script);
            }
            if let Some(parent) = routine.parent.and_then(|p| self.routines.get_mut(p)) {
                parent.children.shift_remove(&id);
            }
            for child in routine.children {
                if self.stack.contains(&Work::Routine(child)) {
                    self.routines.adopt(child, None);
                } else {
                    pending.push(child);
                }
            }
        }
    }

    /// A step unwound out of the loop: drop everything the pass still had
    /// scheduled so the next pass starts from an empty stack.
    fn abandon_pass(&mut self) {
        let mut ids: Vec<RoutineId> = self
            .stack
            .drain(..)
            .filter_map(|work| match work {
                Work::Routine(id) => Some(id),
                Work::Boundary => None,
            })
            .collect();
        ids.extend(self.current.take());
        log::warn!(
            "{}: pass unwound; abandoning {} scheduled routine(s)",
            self.config.name,
            ids.len()
        );
        for id in ids {
            self.bury(id);
        }
        self.register = Outcome::unit();
    }

    /// Free captured routines nothing can reach any more.
    fn collect_reclaimed(&mut self) -> usize {
        let ids: Vec<RoutineId> = self.reclaim.borrow_mut().drain(..).collect();
        let mut freed = 0;
        for id in ids {
            let Some(routine) = self.routines.get(id) else {
                continue;
            };
            let orphaned = routine.parent.map_or(true, |p| !self.routines.contains(p));
            if orphaned && !self.stack.contains(&Work::Routine(id)) {
                self.bury(id);
                freed += 1;
            }
        }
        freed
    }
}

/// Clears the running flag however the loop exits. On unwind the pass's
/// leftover work is buried; the scripts are dropped by the next sweep.
struct Running<'a>(&'a RefCell<Machine>);

impl<'a> Running<'a> {
    fn enter(machine: &'a RefCell<Machine>) -> Self {
        machine.borrow_mut().running = true;
        Running(machine)
    }
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        let Ok(mut m) = self.0.try_borrow_mut() else {
            return;
        };
        m.running = false;
        if thread::panicking() {
            m.abandon_pass();
        }
    }
}

/// Run one reduction pass until the stack is empty and return the
/// register.
pub(super) fn reduce(machine: &Rc<RefCell<Machine>>) -> Outcome {
    let _running = Running::enter(machine);
    loop {
        let next = machine.borrow_mut().next_routine();
        let Some((id, mut script)) = next else {
            break;
        };
        let (input, catch_panics) = {
            let mut m = machine.borrow_mut();
            (mem::replace(&mut m.register, Outcome::unit()), m.config.catch_panics)
        };

        match guarded(catch_panics, || script.resume(input)) {
            Step::Done(outcome) => machine.borrow_mut().finish(id, script, outcome),
            Step::Yield(instruction) => dispatch(machine, id, script, instruction),
        }
        machine.borrow_mut().current = None;
        sweep_garbage(machine);
    }
    let result = mem::replace(&mut machine.borrow_mut().register, Outcome::unit());
    result
}

fn dispatch(
    machine: &Rc<RefCell<Machine>>,
    id: RoutineId,
    script: Script,
    instruction: Instruction,
) {
    match instruction {
        Instruction::Reset(block) => {
            {
                let mut m = machine.borrow_mut();
                m.park(id, script);
                m.stack.push(Work::Boundary);
            }
            let child = start_block(machine, block);
            machine.borrow_mut().spawn_child("reset", child, id);
        }
        Instruction::Shift(block) => {
            let (frames, reclaim) = {
                let mut m = machine.borrow_mut();
                m.park(id, script);
                (m.take_frames(), m.reclaim.clone())
            };
            let capture = Capture::new(&frames, reclaim);
            machine.borrow_mut().restore(frames);
            let k = Continuation::new(capture, Rc::downgrade(machine));
            let reenter = Reenter::new(Rc::downgrade(machine));
            let child = start_block(machine, move || block(k, reenter));
            machine.borrow_mut().spawn_child("shift", child, id);
        }
        Instruction::Suspend => machine.borrow_mut().discard(id, script),
        Instruction::Splice(nested) => {
            let mut m = machine.borrow_mut();
            m.park(id, script);
            m.spawn_child("splice", nested, id);
        }
    }
}

/// Call a `reset`/`shift` block. A panicking block becomes a child that
/// fails immediately.
fn start_block(machine: &RefCell<Machine>, block: impl FnOnce() -> Script) -> Script {
    let catch_panics = machine.borrow().config.catch_panics;
    if !catch_panics {
        return block();
    }
    panic::catch_unwind(AssertUnwindSafe(block)).unwrap_or_else(|payload| {
        let error = Error::Panicked(panic_message(payload));
        Box::new(Staged::<Instruction>::returning(Outcome::Failure(error)))
    })
}

/// Drop removed scripts and reclaimed routines outside any borrow.
/// Dropping a script can release more captures, so repeat until quiet.
fn sweep_garbage(machine: &RefCell<Machine>) {
    loop {
        let dead = {
            let mut m = machine.borrow_mut();
            let freed = m.collect_reclaimed();
            if freed == 0 && m.graveyard.is_empty() {
                break;
            }
            mem::take(&mut m.graveyard)
        };
        drop(dead);
    }
}

/// Delimited-continuation scheduler.
pub struct Scheduler {
    machine: Rc<RefCell<Machine>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            machine: Rc::new(RefCell::new(Machine::new(config))),
        }
    }

    /// Run `op` as a root routine and return the register once the stack
    /// drains.
    ///
    /// Work scheduled through `Reenter` after this returns runs in later
    /// passes; use [`Scheduler::start`] to observe a root that finishes
    /// there.
    pub fn evaluate<F>(&self, op: F) -> Result<Value, Error>
    where
        F: FnOnce() -> Script,
    {
        if self.is_running() {
            return Err(Error::Reentrant);
        }
        let root = start_block(&self.machine, op);
        self.push_root(root);
        reduce(&self.machine).unbox()
    }

    /// Run `op` as a root routine whose own result settles the returned
    /// completion, in whichever pass it finishes.
    pub fn start<F>(&self, op: F) -> Completion<Value>
    where
        F: FnOnce() -> Script,
    {
        if self.is_running() {
            return Completion::rejected(Error::Reentrant);
        }
        let (completion, settler) = completion::pending();
        let root = start_block(&self.machine, op);
        self.push_root(Box::new(Root::new(root, settler)));
        if let Outcome::Failure(error) = reduce(&self.machine) {
            log::debug!("{}: first pass ended in failure: {}", self.config_name(), error);
        }
        completion
    }

    fn push_root(&self, script: Script) {
        let mut m = self.machine.borrow_mut();
        let id = m.routines.spawn("root", script, None);
        log::debug!("{}: starting root {}", m.config.name, id);
        m.stack.push(Work::Routine(id));
        m.register = Outcome::unit();
    }

    fn config_name(&self) -> String {
        self.machine.borrow().config.name.clone()
    }

    /// Failures that ended a re-entry pass with nobody to raise them to.
    pub fn take_unhandled(&self) -> Vec<Error> {
        mem::take(&mut self.machine.borrow_mut().unhandled)
    }

    /// Routines currently held in the arena.
    pub fn live_routines(&self) -> usize {
        if !self.is_running() {
            sweep_garbage(&self.machine);
        }
        self.machine.borrow().routines.len()
    }

    pub fn is_running(&self) -> bool {
        self.machine.borrow().running
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
