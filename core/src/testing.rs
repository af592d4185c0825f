//! Scripted collaborators for unit tests.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use bytes::Bytes;

use crate::body::{BodySink, SinkEvents, SinkOpener};
use crate::error::{RequestError, TransportError, TransportErrorKind};
use crate::event_loop::{EventLoop, LocalLoop};
use crate::http::{CallHead, ResponseHead};
use crate::transport::{Call, CallEvents, Transport};

/// One notification a `FakeTransport` plays back after the request is sent.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    HeadersWritten,
    Response(ResponseHead),
    Data(&'static str),
    Error(TransportError),
    End,
    /// Let virtual time pass before the next step.
    Wait(Duration),
}

/// Headers written, a response with `chunks` as its body, then end.
pub(crate) fn ok_script(status: u16, chunks: &[&'static str]) -> Vec<Step> {
    let mut steps = vec![
        Step::HeadersWritten,
        Step::Response(ResponseHead::new(status, "OK")),
    ];
    steps.extend(chunks.iter().copied().map(Step::Data));
    steps.push(Step::End);
    steps
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Closed {
    WithError(String),
    Graceful(String),
}

#[derive(Debug, Clone)]
pub(crate) struct CallLog {
    pub(crate) head: CallHead,
    pub(crate) body: Vec<u8>,
    pub(crate) ended: bool,
    pub(crate) closed: Option<Closed>,
}

/// Plays one script per call, each step on its own loop tick.
///
/// A closed call keeps playing its script, like a transport whose events were
/// already in flight; the executor must ignore them.
pub(crate) struct FakeTransport {
    event_loop: Rc<LocalLoop>,
    scripts: RefCell<VecDeque<Vec<Step>>>,
    calls: Rc<RefCell<Vec<CallLog>>>,
    synchronous: bool,
}

impl FakeTransport {
    pub(crate) fn new(event_loop: &Rc<LocalLoop>) -> Rc<Self> {
        Rc::new(Self {
            event_loop: event_loop.clone(),
            scripts: RefCell::new(VecDeque::new()),
            calls: Rc::new(RefCell::new(Vec::new())),
            synchronous: false,
        })
    }

    /// Plays every step from inside `Call::end`.
    pub(crate) fn synchronous(event_loop: &Rc<LocalLoop>) -> Rc<Self> {
        Rc::new(Self {
            event_loop: event_loop.clone(),
            scripts: RefCell::new(VecDeque::new()),
            calls: Rc::new(RefCell::new(Vec::new())),
            synchronous: true,
        })
    }

    pub(crate) fn push_script(&self, steps: Vec<Step>) {
        self.scripts.borrow_mut().push_back(steps);
    }

    pub(crate) fn calls(&self) -> Vec<CallLog> {
        self.calls.borrow().clone()
    }
}

impl Transport for FakeTransport {
    fn begin_call(&self, head: CallHead, events: CallEvents) -> Box<dyn Call> {
        let mut calls = self.calls.borrow_mut();
        calls.push(CallLog {
            head,
            body: Vec::new(),
            ended: false,
            closed: None,
        });
        Box::new(FakeCall {
            index: calls.len() - 1,
            calls: self.calls.clone(),
            event_loop: self.event_loop.clone(),
            events,
            script: self.scripts.borrow_mut().pop_front().unwrap_or_default(),
            synchronous: self.synchronous,
        })
    }
}

struct FakeCall {
    index: usize,
    calls: Rc<RefCell<Vec<CallLog>>>,
    event_loop: Rc<LocalLoop>,
    events: CallEvents,
    script: Vec<Step>,
    synchronous: bool,
}

impl FakeCall {
    fn log(&self, update: impl FnOnce(&mut CallLog)) {
        update(&mut self.calls.borrow_mut()[self.index]);
    }
}

fn emit(events: &CallEvents, step: Step) {
    match step {
        Step::HeadersWritten => events.headers_written(),
        Step::Response(head) => events.response(head),
        Step::Data(chunk) => events.data(chunk),
        Step::Error(error) => events.error(error),
        Step::End => events.end(),
        Step::Wait(_) => {}
    }
}

fn play(event_loop: Rc<LocalLoop>, events: CallEvents, mut steps: VecDeque<Step>) {
    let Some(step) = steps.pop_front() else {
        return;
    };
    let next_loop = event_loop.clone();
    if let Step::Wait(delay) = step {
        event_loop.add_timer(delay, Box::new(move || play(next_loop, events, steps)));
        return;
    }
    event_loop.next_tick(Box::new(move || {
        emit(&events, step);
        play(next_loop, events, steps);
    }));
}

impl Call for FakeCall {
    fn write(&mut self, body: &[u8]) {
        self.log(|call| call.body.extend_from_slice(body));
    }

    fn end(&mut self) {
        self.log(|call| call.ended = true);
        let steps = std::mem::take(&mut self.script);
        if self.synchronous {
            for step in steps {
                emit(&self.events, step);
            }
            return;
        }
        play(self.event_loop.clone(), self.events.clone(), steps.into());
    }

    fn close_with_error(&mut self, reason: &RequestError) {
        let message = reason.to_string();
        self.log(|call| call.closed = Some(Closed::WithError(message.clone())));
        let events = self.events.clone();
        self.event_loop.next_tick(Box::new(move || {
            events.error(TransportError::new(TransportErrorKind::Connect, message));
            events.end();
        }));
    }

    fn close(&mut self, reason: &RequestError) {
        let message = reason.to_string();
        self.log(|call| call.closed = Some(Closed::Graceful(message)));
        let events = self.events.clone();
        self.event_loop.next_tick(Box::new(move || events.end()));
    }
}

/// A transport that never reports anything.
#[derive(Default)]
pub(crate) struct SilentTransport {
    pub(crate) closed_with_error: Rc<Cell<usize>>,
}

impl Transport for SilentTransport {
    fn begin_call(&self, _head: CallHead, _events: CallEvents) -> Box<dyn Call> {
        Box::new(SilentCall {
            closed_with_error: self.closed_with_error.clone(),
        })
    }
}

struct SilentCall {
    closed_with_error: Rc<Cell<usize>>,
}

impl Call for SilentCall {
    fn write(&mut self, _body: &[u8]) {}

    fn end(&mut self) {}

    fn close_with_error(&mut self, _reason: &RequestError) {
        self.closed_with_error.set(self.closed_with_error.get() + 1);
    }

    fn close(&mut self, _reason: &RequestError) {}
}

#[derive(Debug, Default)]
struct SinkState {
    bytes: Vec<u8>,
    finished: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum SinkFailure {
    #[default]
    Never,
    OnWrite,
    OnFinish,
}

/// Sinks that live in memory, keyed by path.
#[derive(Default)]
pub(crate) struct MemorySinks {
    files: Rc<RefCell<HashMap<PathBuf, SinkState>>>,
    failure: SinkFailure,
    deferred: bool,
    pending: Rc<RefCell<Vec<SinkEvents>>>,
}

impl MemorySinks {
    /// Sinks that open fine but reject every write.
    pub(crate) fn failing() -> Self {
        Self {
            failure: SinkFailure::OnWrite,
            ..Self::default()
        }
    }

    /// Sinks that accept writes but fail to flush.
    pub(crate) fn failing_on_finish() -> Self {
        Self {
            failure: SinkFailure::OnFinish,
            ..Self::default()
        }
    }

    /// Sinks that only report completion when `complete_pending` is called.
    pub(crate) fn deferred() -> Self {
        Self {
            deferred: true,
            ..Self::default()
        }
    }

    pub(crate) fn complete_pending(&self) {
        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        for events in pending {
            events.finished();
        }
    }

    pub(crate) fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.files.borrow().get(Path::new(path)).map(|state| state.bytes.clone())
    }

    pub(crate) fn finished(&self, path: &str) -> bool {
        self.files
            .borrow()
            .get(Path::new(path))
            .is_some_and(|state| state.finished)
    }
}

impl SinkOpener for MemorySinks {
    fn open(&self, path: &Path, events: SinkEvents) -> Box<dyn BodySink> {
        self.files
            .borrow_mut()
            .insert(path.to_path_buf(), SinkState::default());
        Box::new(MemorySink {
            path: path.to_path_buf(),
            files: self.files.clone(),
            failure: self.failure,
            deferred: self.deferred,
            pending: self.pending.clone(),
            events,
        })
    }
}

struct MemorySink {
    path: PathBuf,
    files: Rc<RefCell<HashMap<PathBuf, SinkState>>>,
    failure: SinkFailure,
    deferred: bool,
    pending: Rc<RefCell<Vec<SinkEvents>>>,
    events: SinkEvents,
}

impl BodySink for MemorySink {
    fn write_chunk(&mut self, chunk: Bytes) {
        if self.failure == SinkFailure::OnWrite {
            self.events
                .failed(io::Error::new(io::ErrorKind::Other, "disk full"));
            return;
        }
        if let Some(state) = self.files.borrow_mut().get_mut(&self.path) {
            state.bytes.extend_from_slice(&chunk);
        }
    }

    fn finish(&mut self) {
        if self.failure == SinkFailure::OnFinish {
            self.events
                .failed(io::Error::new(io::ErrorKind::Other, "flush failed"));
            return;
        }
        if let Some(state) = self.files.borrow_mut().get_mut(&self.path) {
            state.finished = true;
        }
        if self.deferred {
            self.pending.borrow_mut().push(self.events.clone());
        } else {
            self.events.finished();
        }
    }
}
