// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Captured continuations and asynchronous re-entry.
//!
//! A capture keeps two things: the ids of the routines that were popped
//! off the stack, and a fork of each taken at capture time. The first
//! invocation reinstates the original routines, so structured
//! cancellation still sees them as children of whoever spawned them.
//! Any later invocation, or one made after the originals were swept,
//! reinstates fresh forks of the snapshot. Replays therefore restart from
//! the point of capture; side effects made through shared handles are
//! not undone.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexSet;

use crate::outcome::Outcome;
use crate::value::Value;

use super::arena::{Arena, Routine, RoutineId};
use super::frames::Reentry;
use super::instruction::{Instruction, Script};
use super::scheduler::{reduce, Machine, Work};

/// Where a captured frame's parent lives.
#[derive(Clone, Copy)]
enum Link {
    /// Another frame of the same capture, by position.
    Captured(usize),
    /// Outside the capture (or no parent at all).
    Outside(Option<RoutineId>),
}

struct Template {
    name: &'static str,
    script: Script,
    parent: Link,
}

/// A routine lifted off the stack by `shift`, script taken out so it can
/// be forked without the machine borrowed.
pub(super) struct Frame {
    pub id: RoutineId,
    pub name: &'static str,
    pub script: Script,
    pub parent: Option<RoutineId>,
}

pub(crate) struct Capture {
    /// Bottom-to-top. Taken by the first invocation.
    originals: RefCell<Option<Vec<RoutineId>>>,
    templates: Vec<Template>,
    /// Ids handed back to the scheduler if this capture dies unused.
    reclaim: Rc<RefCell<Vec<RoutineId>>>,
}

impl Capture {
    /// Snapshot `frames` (bottom-to-top).
    pub fn new(frames: &[Frame], reclaim: Rc<RefCell<Vec<RoutineId>>>) -> Self {
        let kept: IndexSet<RoutineId> = frames.iter().map(|f| f.id).collect();
        let templates = frames
            .iter()
            .map(|frame| {
                let parent = match frame.parent.and_then(|p| kept.get_index_of(&p)) {
                    Some(pos) => Link::Captured(pos),
                    None => Link::Outside(frame.parent),
                };
                Template {
                    name: frame.name,
                    script: frame.script.fork(),
                    parent,
                }
            })
            .collect();
        Self {
            originals: RefCell::new(Some(kept.into_iter().collect())),
            templates,
            reclaim,
        }
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// The original routines, if this is the first invocation and none
    /// of them has been swept.
    fn take_originals(&self, arena: &Arena) -> Option<Vec<RoutineId>> {
        let originals = self.originals.borrow_mut().take()?;
        if originals.iter().all(|&id| arena.contains(id)) {
            return Some(originals);
        }
        log::debug!("captured frames were swept; replaying from snapshot");
        None
    }

    fn fork_templates(&self) -> Vec<Script> {
        self.templates.iter().map(|t| t.script.fork()).collect()
    }

    /// Insert forked frames, re-linking parents inside the capture to
    /// their own forks.
    fn instantiate(&self, arena: &mut Arena, forks: Vec<Script>) -> Vec<RoutineId> {
        let ids: Vec<RoutineId> = self
            .templates
            .iter()
            .zip(forks)
            .map(|(t, script)| arena.insert(Routine::new(t.name, script)))
            .collect();
        for (template, &id) in self.templates.iter().zip(&ids) {
            let parent = match template.parent {
                Link::Captured(pos) => Some(ids[pos]),
                Link::Outside(parent) => parent,
            };
            arena.adopt(id, parent);
        }
        ids
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        if let Some(originals) = self.originals.get_mut().take() {
            self.reclaim.borrow_mut().extend(originals);
        }
    }
}

/// The frames between a `shift` and its nearest boundary, as a value.
#[derive(Clone)]
pub struct Continuation {
    capture: Rc<Capture>,
    machine: Weak<RefCell<Machine>>,
}

impl Continuation {
    pub(super) fn new(capture: Capture, machine: Weak<RefCell<Machine>>) -> Self {
        Self {
            capture: Rc::new(capture),
            machine,
        }
    }

    /// Reinstate the captured frames with `value` as the result of their
    /// `shift`, beneath a fresh boundary.
    ///
    /// The returned instruction must be yielded by the invoking routine:
    /// it ends that strand so the reinstated frames run next.
    pub fn resume(&self, value: Value) -> Instruction {
        let Some(machine) = self.machine.upgrade() else {
            log::debug!("continuation invoked after its scheduler was dropped");
            return Instruction::Suspend;
        };
        let reused = self.capture.take_originals(&machine.borrow().routines);
        let frames = match reused {
            Some(ids) => ids,
            None => {
                let forks = self.capture.fork_templates();
                self.capture.instantiate(&mut machine.borrow_mut().routines, forks)
            }
        };
        let mut m = machine.borrow_mut();
        log::debug!(
            "{}: reinstating {} captured frame(s)",
            m.config.name,
            frames.len()
        );
        m.register = Outcome::Success(value);
        m.stack.push(Work::Boundary);
        m.stack.extend(frames.into_iter().map(Work::Routine));
        Instruction::Suspend
    }

    /// Number of frames captured.
    pub fn depth(&self) -> usize {
        self.capture.len()
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("depth", &self.depth())
            .finish()
    }
}

/// Schedules a continuation from outside the active reduction.
///
/// If the scheduler is mid-reduction the resumption is queued on its
/// stack; otherwise a new reduction pass starts immediately.
#[derive(Clone)]
pub struct Reenter {
    machine: Weak<RefCell<Machine>>,
}

impl Reenter {
    pub(super) fn new(machine: Weak<RefCell<Machine>>) -> Self {
        Self { machine }
    }

    pub fn resume(&self, k: &Continuation, value: Value) {
        let Some(machine) = self.machine.upgrade() else {
            log::debug!("re-entry after scheduler was dropped");
            return;
        };
        let idle = {
            let mut m = machine.borrow_mut();
            let id = m.routines.spawn(
                "reenter",
                Box::new(Reentry::new(k.clone(), value.clone())),
                None,
            );
            m.stack.push(Work::Routine(id));
            if m.running {
                false
            } else {
                m.register = Outcome::Success(value);
                true
            }
        };
        if !idle {
            return;
        }

        log::debug!("{}: re-entering reduction", machine.borrow().config.name);
        match reduce(&machine) {
            Outcome::Success(_) => {}
            Outcome::Failure(error) => {
                let mut m = machine.borrow_mut();
                log::warn!(
                    "{}: re-entered reduction ended in failure: {}",
                    m.config.name,
                    error
                );
                m.unhandled.push(error);
            }
        }
    }
}

impl fmt::Debug for Reenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reenter")
            .field("attached", &(self.machine.strong_count() > 0))
            .finish()
    }
}
