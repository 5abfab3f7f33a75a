// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Single-threaded coroutine schedulers driven by an explicit work stack.
//!
//! Components:
//! - `dcs`        — delimited continuations (`reset`/`shift`) with structured cancellation
//! - `bridge`     — trampoline whose only suspension point is an external completion
//! - `outcome`    — success/failure register threaded through both
//! - `completion` — one-shot external completions and a job queue to settle them later
//! - `coroutine`  — the `resume(outcome) -> Step` interface and builders

pub mod bridge;
pub mod completion;
pub mod config;
pub mod coroutine;
pub mod dcs;
pub mod error;
pub mod outcome;
pub mod value;

pub use completion::{Completion, JobQueue, Settler};
pub use config::SchedulerConfig;
pub use coroutine::{from_fn, Coroutine, Staged, Step};
pub use dcs::Scheduler;
pub use error::Error;
pub use outcome::Outcome;
pub use value::Value;
