// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Instructions understood by the delimited-continuation scheduler.

use std::fmt;

use crate::coroutine::Coroutine;

use super::continuation::{Continuation, Reenter};

/// A coroutine the scheduler can snapshot.
///
/// Continuations replay captured frames from the point of capture, so
/// every frame must be able to produce an independent copy of itself.
/// Any `Clone` coroutine qualifies.
pub trait Resumable: Coroutine<Instruction> {
    fn fork(&self) -> Script;
}

impl<T> Resumable for T
where
    T: Coroutine<Instruction> + Clone + 'static,
{
    fn fork(&self) -> Script {
        Box::new(self.clone())
    }
}

/// A started operation.
pub type Script = Box<dyn Resumable>;

pub type ResetBlock = Box<dyn FnOnce() -> Script>;
pub type ShiftBlock = Box<dyn FnOnce(Continuation, Reenter) -> Script>;

pub enum Instruction {
    /// Run the block under a fresh continuation boundary.
    Reset(ResetBlock),
    /// Capture the frames up to the nearest boundary and hand them to the
    /// block as a continuation.
    Shift(ShiftBlock),
    /// Abandon the current strand.
    Suspend,
    /// Run a nested sequence in place, without a boundary.
    Splice(Script),
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Reset(_) => write!(f, "Reset"),
            Instruction::Shift(_) => write!(f, "Shift"),
            Instruction::Suspend => write!(f, "Suspend"),
            Instruction::Splice(_) => write!(f, "Splice"),
        }
    }
}

/// Box a coroutine as a script.
pub fn script(coroutine: impl Resumable + 'static) -> Script {
    Box::new(coroutine)
}

pub fn reset(block: impl FnOnce() -> Script + 'static) -> Instruction {
    Instruction::Reset(Box::new(block))
}

pub fn shift(block: impl FnOnce(Continuation, Reenter) -> Script + 'static) -> Instruction {
    Instruction::Shift(Box::new(block))
}

pub fn splice(nested: impl Resumable + 'static) -> Instruction {
    Instruction::Splice(Box::new(nested))
}
