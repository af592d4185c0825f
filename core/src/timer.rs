//! Connect and total timeout windows for one attempt.

use std::rc::Rc;
use std::time::Duration;

use crate::event_loop::{EventLoop, Task, TimerHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerKind {
    /// Runs from dispatch until the request headers are written.
    Connect,
    /// Runs from the end of the send until the end of the transfer.
    Total,
}

pub(crate) struct TimerController {
    event_loop: Rc<dyn EventLoop>,
    connect: Option<TimerHandle>,
    total: Option<TimerHandle>,
}

impl TimerController {
    pub(crate) fn new(event_loop: Rc<dyn EventLoop>) -> Self {
        Self {
            event_loop,
            connect: None,
            total: None,
        }
    }

    fn slot(&mut self, kind: TimerKind) -> &mut Option<TimerHandle> {
        match kind {
            TimerKind::Connect => &mut self.connect,
            TimerKind::Total => &mut self.total,
        }
    }

    /// Schedule `on_fire` after `after`. A zero duration arms nothing.
    pub(crate) fn arm(&mut self, kind: TimerKind, after: Duration, on_fire: Task) -> bool {
        if after.is_zero() {
            return false;
        }
        self.disarm(kind);
        let handle = self.event_loop.add_timer(after, on_fire);
        *self.slot(kind) = Some(handle);
        true
    }

    pub(crate) fn disarm(&mut self, kind: TimerKind) {
        if let Some(handle) = self.slot(kind).take() {
            self.event_loop.cancel_timer(handle);
        }
    }

    pub(crate) fn disarm_all(&mut self) {
        self.disarm(TimerKind::Connect);
        self.disarm(TimerKind::Total);
    }

    /// Record that a `kind` timer fired. Returns false when no such timer was
    /// armed, meaning the fire is stale and must be ignored.
    pub(crate) fn take_fired(&mut self, kind: TimerKind) -> bool {
        self.slot(kind).take().is_some()
    }

    #[cfg(test)]
    pub(crate) fn is_armed(&self, kind: TimerKind) -> bool {
        match kind {
            TimerKind::Connect => self.connect.is_some(),
            TimerKind::Total => self.total.is_some(),
        }
    }
}
