//! The reactor the executor runs on.
//!
//! # Design
//! The executor never blocks and never owns a thread. It asks an `EventLoop`
//! to run work on the next tick and to fire timers, and everything else
//! happens inside those callbacks. Two loops ship with the crate:
//!
//! - `LocalLoop` runs on a virtual clock. `run` drains ticks and jumps time
//!   forward to the next timer, so timeout behavior is deterministic and
//!   instant to test.
//! - `TokioLoop` maps ticks and timers onto `spawn_local` tasks and must be
//!   driven from inside a `tokio::task::LocalSet`.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use tokio::task::JoinHandle;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce()>;

/// Opaque reference to a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

pub trait EventLoop {
    /// Run `task` on the next loop iteration, after the current callback returns.
    fn next_tick(&self, task: Task);

    /// Run `task` once `after` has elapsed.
    fn add_timer(&self, after: Duration, task: Task) -> TimerHandle;

    /// Cancel a timer. Cancelling a fired or cancelled timer does nothing.
    fn cancel_timer(&self, handle: TimerHandle);
}

#[derive(Default)]
struct LocalState {
    now: Duration,
    next_id: u64,
    ticks: VecDeque<Task>,
    timers: BTreeMap<(Duration, u64), Task>,
    deadlines: HashMap<u64, Duration>,
    timers_armed: usize,
}

/// Single-threaded loop with a virtual clock.
#[derive(Default)]
pub struct LocalLoop {
    state: RefCell<LocalState>,
}

impl LocalLoop {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Virtual time elapsed since the loop was created.
    pub fn now(&self) -> Duration {
        self.state.borrow().now
    }

    /// Number of timers scheduled over the loop's lifetime.
    pub fn timers_armed(&self) -> usize {
        self.state.borrow().timers_armed
    }

    /// Timers currently scheduled and not cancelled.
    pub fn pending_timers(&self) -> usize {
        self.state.borrow().timers.len()
    }

    /// Run pending ticks, advancing the clock to each timer in turn, until
    /// nothing is left to do.
    pub fn run(&self) {
        while self.turn(None) {}
    }

    /// Like `run`, but never advances the clock past `limit`.
    pub fn run_until(&self, limit: Duration) {
        while self.turn(Some(limit)) {}
        let mut state = self.state.borrow_mut();
        if state.now < limit {
            state.now = limit;
        }
    }

    fn turn(&self, limit: Option<Duration>) -> bool {
        // The borrow must be released before the task runs; tasks schedule more work.
        let task = {
            let mut state = self.state.borrow_mut();
            match state.ticks.pop_front() {
                Some(task) => Some(task),
                None => {
                    let due = state
                        .timers
                        .keys()
                        .next()
                        .copied()
                        .filter(|(deadline, _)| limit.map_or(true, |limit| *deadline <= limit));
                    due.and_then(|key| {
                        state.now = state.now.max(key.0);
                        state.deadlines.remove(&key.1);
                        state.timers.remove(&key)
                    })
                }
            }
        };
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }
}

impl EventLoop for LocalLoop {
    fn next_tick(&self, task: Task) {
        self.state.borrow_mut().ticks.push_back(task);
    }

    fn add_timer(&self, after: Duration, task: Task) -> TimerHandle {
        let mut state = self.state.borrow_mut();
        let id = state.next_id;
        state.next_id += 1;
        let deadline = state.now + after;
        state.timers.insert((deadline, id), task);
        state.deadlines.insert(id, deadline);
        state.timers_armed += 1;
        TimerHandle(id)
    }

    fn cancel_timer(&self, handle: TimerHandle) {
        let mut state = self.state.borrow_mut();
        if let Some(deadline) = state.deadlines.remove(&handle.0) {
            state.timers.remove(&(deadline, handle.0));
        }
    }
}

/// Loop backed by the current tokio `LocalSet`.
#[derive(Default)]
pub struct TokioLoop {
    next_id: Cell<u64>,
    timers: Rc<RefCell<HashMap<u64, JoinHandle<()>>>>,
}

impl TokioLoop {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }
}

impl EventLoop for TokioLoop {
    fn next_tick(&self, task: Task) {
        tokio::task::spawn_local(async move {
            tokio::task::yield_now().await;
            task();
        });
    }

    fn add_timer(&self, after: Duration, task: Task) -> TimerHandle {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let timers = Rc::downgrade(&self.timers);
        let handle = tokio::task::spawn_local(async move {
            tokio::time::sleep(after).await;
            if let Some(timers) = timers.upgrade() {
                timers.borrow_mut().remove(&id);
            }
            task();
        });
        self.timers.borrow_mut().insert(id, handle);
        TimerHandle(id)
    }

    fn cancel_timer(&self, handle: TimerHandle) {
        if let Some(handle) = self.timers.borrow_mut().remove(&handle.0) {
            handle.abort();
        }
    }
}
