//! Progress notifications for observers.
//!
//! Observers only watch. A panicking observer is caught and logged so it can
//! never leave a timer armed or an outcome unresolved.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use tracing::warn;

use crate::http::ResponseHead;

#[derive(Debug, Clone, Copy)]
pub enum ProgressEvent<'a> {
    /// The response head arrived.
    Response(&'a ResponseHead),
    /// A body chunk arrived (not reported in sink mode).
    Data(&'a [u8]),
}

impl ProgressEvent<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Response(_) => "response",
            Self::Data(_) => "data",
        }
    }
}

pub trait ProgressObserver {
    fn on_event(&self, event: ProgressEvent<'_>);
}

impl<F> ProgressObserver for F
where
    F: Fn(ProgressEvent<'_>),
{
    fn on_event(&self, event: ProgressEvent<'_>) {
        self(event)
    }
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_event(&self, _event: ProgressEvent<'_>) {}
}

#[derive(Clone)]
pub(crate) struct ProgressNotifier {
    observer: Rc<dyn ProgressObserver>,
}

impl ProgressNotifier {
    pub(crate) fn new(observer: Rc<dyn ProgressObserver>) -> Self {
        Self { observer }
    }

    pub(crate) fn response(&self, head: &ResponseHead) {
        self.notify(ProgressEvent::Response(head));
    }

    pub(crate) fn data(&self, chunk: &[u8]) {
        self.notify(ProgressEvent::Data(chunk));
    }

    fn notify(&self, event: ProgressEvent<'_>) {
        let kind = event.kind();
        let observer = &self.observer;
        if catch_unwind(AssertUnwindSafe(|| observer.on_event(event))).is_err() {
            warn!(event = kind, "progress observer panicked; continuing");
        }
    }
}

impl Default for ProgressNotifier {
    fn default() -> Self {
        Self::new(Rc::new(NoProgress))
    }
}
