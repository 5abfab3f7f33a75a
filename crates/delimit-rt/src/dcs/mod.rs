// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Delimited-continuation scheduler (`shift`/`reset`).
//!
//! Routines form a tree in an arena; a work stack of routine ids and
//! boundary markers decides what runs next. Finishing a routine forces
//! its live children through their exit path before its result surfaces.
//!
//! Components:
//! - `instruction`  — what a routine can yield, and the `Resumable` bound
//! - `arena`        — generational routine slots, parent/child links
//! - `frames`       — routines the scheduler synthesizes (exit, settled, re-entry, root)
//! - `continuation` — captured frames as a value; async re-entry
//! - `scheduler`    — the reduce loop and the public `Scheduler`

mod arena;
mod continuation;
mod frames;
mod instruction;
mod scheduler;

pub use continuation::{Continuation, Reenter};
pub use instruction::{
    reset, script, shift, splice, Instruction, ResetBlock, Resumable, Script, ShiftBlock,
};
pub use scheduler::Scheduler;
