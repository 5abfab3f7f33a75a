// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Deep operation trees whose leaves await external completions.
//!
//! Each level delegates to the next; the bottom awaits `BREADTH`
//! completions and then records a checkpoint.

use std::cell::RefCell;
use std::rc::Rc;

use delimit_rt::bridge::{self, Bridge, Task};
use delimit_rt::dcs::{script, shift, splice, Instruction};
use delimit_rt::{Completion, Coroutine, JobQueue, Outcome, Scheduler, Staged, Step, Value};

const DEPTH: usize = 100;
const BREADTH: usize = 5;

type Checkpoints = Rc<RefCell<Vec<String>>>;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// How a leaf waits for one tick.
#[derive(Clone)]
enum Ticks {
    /// Completions that have already settled.
    Resolved,
    /// Completions settled when the queue is drained.
    Queued(JobQueue),
}

impl Ticks {
    fn wait(&self) -> Instruction {
        let completion = match self {
            Ticks::Resolved => Completion::resolved(Value::unit()),
            Ticks::Queued(queue) => queue.settle_later(Outcome::unit()),
        };
        shift(move |k, reenter| {
            completion.on_settle(move |outcome| {
                if let Outcome::Success(value) = outcome {
                    reenter.resume(&k, value);
                }
            });
            script(Staged::<Instruction>::returning(Outcome::unit()))
        })
    }
}

fn leaf(label: String, ticks: Ticks, checkpoints: Checkpoints) -> Staged<Instruction> {
    let mut stages = Staged::new();
    for _ in 0..BREADTH {
        let ticks = ticks.clone();
        stages = stages.and_then(move |_| Step::Yield(ticks.wait()));
    }
    stages.and_then(move |_| {
        checkpoints.borrow_mut().push(label.clone());
        Step::Done(Outcome::unit())
    })
}

/// A chain `depth` levels deep ending in one leaf.
fn chain(depth: usize, ticks: Ticks, checkpoints: Checkpoints) -> Staged<Instruction> {
    if depth <= 1 {
        return leaf("bottom".to_string(), ticks, checkpoints);
    }
    Staged::new().and_then(move |_| {
        Step::Yield(splice(chain(depth - 1, ticks.clone(), checkpoints.clone())))
    })
}

/// A binary tree; leaves are labelled by their path from the root.
fn tree(depth: usize, path: String, ticks: Ticks, checkpoints: Checkpoints) -> Staged<Instruction> {
    if depth == 0 {
        return leaf(path, ticks, checkpoints);
    }
    let mut stages = Staged::new();
    for side in ["L", "R"] {
        let (path, ticks, checkpoints) = (
            format!("{}{}", path, side),
            ticks.clone(),
            checkpoints.clone(),
        );
        stages = stages.and_then(move |_| {
            Step::Yield(splice(tree(depth - 1, path.clone(), ticks.clone(), checkpoints.clone())))
        });
    }
    stages
}

#[test]
fn deep_chain_with_resolved_ticks_finishes_synchronously() {
    init();
    let checkpoints = Checkpoints::default();
    let sched = Scheduler::new();
    let c = checkpoints.clone();
    let result = sched.evaluate(move || script(chain(DEPTH, Ticks::Resolved, c)));

    assert!(result.is_ok());
    assert_eq!(*checkpoints.borrow(), vec!["bottom"]);
    assert_eq!(sched.live_routines(), 0);
}

#[test]
fn deep_chain_with_queued_ticks_finishes_on_drain() {
    init();
    let queue = JobQueue::new();
    let checkpoints = Checkpoints::default();
    let sched = Scheduler::new();
    let (q, c) = (queue.clone(), checkpoints.clone());
    let done = sched.start(move || script(chain(DEPTH, Ticks::Queued(q), c)));

    assert!(!done.is_settled());
    assert!(checkpoints.borrow().is_empty());
    // The first tick was scheduled by the synchronous pass; each later
    // one is scheduled by the re-entry before it.
    assert_eq!(queue.run_until_idle(), BREADTH);

    assert_eq!(done.outcome().map(|o| o.is_success()), Some(true));
    assert_eq!(*checkpoints.borrow(), vec!["bottom"]);
    assert!(sched.take_unhandled().is_empty());
    assert_eq!(sched.live_routines(), 0);
}

#[test]
fn tree_leaves_visit_depth_first_left_to_right() {
    init();
    for ticks in [Ticks::Resolved, Ticks::Queued(JobQueue::new())] {
        let checkpoints = Checkpoints::default();
        let sched = Scheduler::new();
        let (t, c) = (ticks.clone(), checkpoints.clone());
        let done = sched.start(move || script(tree(3, String::new(), t, c)));
        if let Ticks::Queued(queue) = &ticks {
            queue.run_until_idle();
        }

        assert!(done.is_settled());
        assert_eq!(
            *checkpoints.borrow(),
            vec!["LLL", "LLR", "LRL", "LRR", "RLL", "RLR", "RRL", "RRR"]
        );
        assert_eq!(sched.live_routines(), 0);
    }
}

/// Hand-written bridged level: delegate to the next level through the
/// trampoline, or await `BREADTH` resolved completions at the bottom.
struct Level {
    depth: usize,
    bridge: Bridge,
    checkpoints: Checkpoints,
    step: usize,
}

impl Coroutine<bridge::Instruction> for Level {
    fn resume(&mut self, input: Outcome) -> Step<bridge::Instruction> {
        let input = match input {
            Outcome::Failure(e) => return Step::Done(Outcome::Failure(e)),
            ok => ok,
        };
        self.step += 1;
        if self.depth > 1 {
            if self.step > 1 {
                return Step::Done(input);
            }
            let next = Level {
                depth: self.depth - 1,
                bridge: self.bridge.clone(),
                checkpoints: self.checkpoints.clone(),
                step: 0,
            };
            let child = self.bridge.run(move || Ok(Box::new(next) as Task));
            return Step::Yield(bridge::call(child));
        }
        if self.step <= BREADTH {
            return Step::Yield(bridge::call(Completion::resolved(Value::unit())));
        }
        self.checkpoints.borrow_mut().push("bottom".to_string());
        Step::Done(Outcome::of(self.step - 1))
    }
}

#[test]
fn bridged_deep_chain_visits_bottom_once() {
    init();
    let checkpoints = Checkpoints::default();
    let b = Bridge::new();
    let root = Level {
        depth: DEPTH,
        bridge: b.clone(),
        checkpoints: checkpoints.clone(),
        step: 0,
    };
    let done = b.run(move || Ok(Box::new(root) as Task));

    let awaited = done.outcome().map(|o| o.unbox().unwrap().cloned::<usize>());
    assert_eq!(awaited, Some(Ok(BREADTH)));
    assert_eq!(*checkpoints.borrow(), vec!["bottom"]);
    assert!(!b.is_running());
    assert_eq!(b.pending_actions(), 0);
}
