//! The request lifecycle state machine.
//!
//! # Design
//! Each `send` creates one executor. Transport notifications, timer fires and
//! deferred ticks all arrive as `Event` messages through a `Mailbox`, and the
//! executor handles them one at a time:
//!
//! ```text
//! Pending -> Connecting -> HeadersSent -> ResponseReceived -> Ended -> Resolved
//! ```
//!
//! with a recorded-error slot alongside. Dispatch and reconciliation both run
//! one tick after they are requested. Reconciliation is the only place an
//! outcome is decided, and the outcome `Sender` is consumed when it is, so a
//! request cannot resolve twice.
//!
//! A redirect does not spawn a nested executor. The executor swaps in the
//! next hop's description, bumps its attempt number (which silences anything
//! still arriving for the old call) and dispatches again with fresh timers.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::{debug, info_span, trace, warn, Span};
use uuid::Uuid;

use crate::body::{Accumulator, FileSinkOpener, SinkEvents, SinkOpener, SinkStatus};
use crate::error::{RequestError, TransportError};
use crate::event_loop::EventLoop;
use crate::http::{CallHead, RequestDescription, ResponseHead, ResponseRecord};
use crate::progress::{ProgressNotifier, ProgressObserver};
use crate::redirect;
use crate::timer::{TimerController, TimerKind};
use crate::transport::{Call, CallEvents, Transport};

type OutcomeResult = Result<ResponseRecord, RequestError>;

/// Send `request` over `transport`, driven by `event_loop`.
///
/// Nothing happens until the loop runs: dispatch is scheduled for its next tick.
pub fn send(
    request: RequestDescription,
    transport: Rc<dyn Transport>,
    event_loop: Rc<dyn EventLoop>,
    observer: Option<Rc<dyn ProgressObserver>>,
) -> Outcome {
    let mut client = Client::new(transport, event_loop);
    if let Some(observer) = observer {
        client = client.with_progress(observer);
    }
    client.send(request)
}

/// The collaborators shared by every request: transport, loop, progress
/// observer and sink opener.
#[derive(Clone)]
pub struct Client {
    transport: Rc<dyn Transport>,
    event_loop: Rc<dyn EventLoop>,
    progress: ProgressNotifier,
    sinks: Rc<dyn SinkOpener>,
}

impl Client {
    pub fn new(transport: Rc<dyn Transport>, event_loop: Rc<dyn EventLoop>) -> Self {
        Self {
            transport,
            event_loop,
            progress: ProgressNotifier::default(),
            sinks: Rc::new(FileSinkOpener),
        }
    }

    pub fn with_progress(mut self, observer: Rc<dyn ProgressObserver>) -> Self {
        self.progress = ProgressNotifier::new(observer);
        self
    }

    /// Replace how `save_to` destinations are opened.
    pub fn with_sinks(mut self, sinks: Rc<dyn SinkOpener>) -> Self {
        self.sinks = sinks;
        self
    }

    pub fn send(&self, request: RequestDescription) -> Outcome {
        let (resolver, rx) = oneshot::channel();
        let mailbox = Rc::new_cyclic(|weak| Mailbox {
            queue: RefCell::new(VecDeque::new()),
            executor: RefCell::new(Executor::new(self.clone(), request, resolver, weak.clone())),
        });
        mailbox.executor.borrow().defer(Event::Dispatch);
        Outcome { rx, taken: false }
    }
}

/// The eventual result of one request.
///
/// Await it, or poll it with `try_take` from code that drives the loop itself.
#[derive(Debug)]
pub struct Outcome {
    rx: oneshot::Receiver<OutcomeResult>,
    taken: bool,
}

impl Outcome {
    /// Take the result if the request has finished. Returns `None` while it
    /// is still in flight, and again once the result has been taken.
    pub fn try_take(&mut self) -> Option<OutcomeResult> {
        if self.taken {
            return None;
        }
        let result = match self.rx.try_recv() {
            Ok(result) => result,
            Err(oneshot::error::TryRecvError::Empty) => return None,
            Err(oneshot::error::TryRecvError::Closed) => Err(RequestError::Abandoned),
        };
        self.taken = true;
        Some(result)
    }
}

impl Future for Outcome {
    type Output = OutcomeResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(RequestError::Abandoned)))
    }
}

pub(crate) enum Event {
    Dispatch,
    HeadersWritten,
    Response(ResponseHead),
    Data(Bytes),
    Error(TransportError),
    End,
    Sink(SinkStatus),
    TimerFired(TimerKind),
    Reconcile,
}

impl Event {
    fn name(&self) -> &'static str {
        match self {
            Self::Dispatch => "dispatch",
            Self::HeadersWritten => "headers_written",
            Self::Response(_) => "response",
            Self::Data(_) => "data",
            Self::Error(_) => "error",
            Self::End => "end",
            Self::Sink(_) => "sink",
            Self::TimerFired(_) => "timer",
            Self::Reconcile => "reconcile",
        }
    }
}

/// Serializes event delivery into the executor.
///
/// An event delivered while the executor is already handling one (a transport
/// reporting synchronously from inside `write`, say) is queued and handled
/// right after the current handler returns.
pub(crate) struct Mailbox {
    queue: RefCell<VecDeque<(u64, Event)>>,
    executor: RefCell<Executor>,
}

impl Mailbox {
    pub(crate) fn deliver(&self, attempt: u64, event: Event) {
        self.queue.borrow_mut().push_back((attempt, event));
        let Ok(mut executor) = self.executor.try_borrow_mut() else {
            return;
        };
        loop {
            let next = self.queue.borrow_mut().pop_front();
            match next {
                Some((attempt, event)) => executor.handle(attempt, event),
                None => break,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    Pending,
    Connecting,
    HeadersSent,
    ResponseReceived,
    Ended,
    Resolved,
}

struct Executor {
    client: Client,
    span: Span,
    request: RequestDescription,
    attempt: u64,
    phase: Phase,
    timers: TimerController,
    call: Option<Box<dyn Call>>,
    head: Option<ResponseHead>,
    body: Option<Accumulator>,
    /// The transport reported `end` for this attempt.
    transport_ended: bool,
    /// The response sink reported completion for this attempt.
    sink_finished: bool,
    error: Option<RequestError>,
    resolver: Option<oneshot::Sender<OutcomeResult>>,
    mailbox: Weak<Mailbox>,
}

impl Executor {
    fn new(
        client: Client,
        request: RequestDescription,
        resolver: oneshot::Sender<OutcomeResult>,
        mailbox: Weak<Mailbox>,
    ) -> Self {
        let span = info_span!(
            "evhttp.request",
            request_id = %Uuid::new_v4(),
            method = %request.method,
        );
        let timers = TimerController::new(client.event_loop.clone());
        Self {
            client,
            span,
            request,
            attempt: 0,
            phase: Phase::Pending,
            timers,
            call: None,
            head: None,
            body: None,
            transport_ended: false,
            sink_finished: false,
            error: None,
            resolver: Some(resolver),
            mailbox,
        }
    }

    fn handle(&mut self, attempt: u64, event: Event) {
        let span = self.span.clone();
        let _entered = span.enter();
        if attempt != self.attempt || self.phase == Phase::Resolved {
            trace!(event = event.name(), attempt, "ignoring event for a finished attempt");
            return;
        }
        match event {
            Event::Dispatch => self.dispatch(),
            Event::HeadersWritten => self.on_headers_written(),
            Event::Response(head) => self.on_response(head),
            Event::Data(chunk) => self.on_data(chunk),
            Event::Error(error) => self.on_error(error.into()),
            Event::End => self.on_end(),
            Event::Sink(status) => self.on_sink(status),
            Event::TimerFired(kind) => self.on_timer(kind),
            Event::Reconcile => self.reconcile(),
        }
    }

    /// Deliver `event` to this attempt on the next loop tick.
    fn defer(&self, event: Event) {
        let Some(mailbox) = self.mailbox.upgrade() else {
            return;
        };
        let attempt = self.attempt;
        self.client
            .event_loop
            .next_tick(Box::new(move || mailbox.deliver(attempt, event)));
    }

    fn arm(&mut self, kind: TimerKind) {
        let after = match kind {
            TimerKind::Connect => self.request.client.connect_timeout,
            TimerKind::Total => self.request.client.timeout,
        };
        let Some(mailbox) = self.mailbox.upgrade() else {
            return;
        };
        let attempt = self.attempt;
        let on_fire = Box::new(move || mailbox.deliver(attempt, Event::TimerFired(kind)));
        if self.timers.arm(kind, after, on_fire) {
            trace!(?kind, timeout_ms = after.as_millis(), "timer armed");
        }
    }

    fn dispatch(&mut self) {
        if self.phase != Phase::Pending {
            return;
        }
        let Some(mailbox) = self.mailbox.upgrade() else {
            return;
        };
        let events = CallEvents::new(mailbox, self.attempt);
        let head = CallHead {
            method: self.request.method.clone(),
            url: self.request.url.clone(),
            headers: self.request.wire_headers(),
        };
        debug!(url = %head.url, attempt = self.attempt, "dispatching request");

        self.phase = Phase::Connecting;
        let mut call = self.client.transport.begin_call(head, events);
        self.arm(TimerKind::Connect);
        if !self.request.body.is_empty() {
            call.write(&self.request.body);
        }
        call.end();
        self.call = Some(call);
        self.arm(TimerKind::Total);
    }

    fn on_headers_written(&mut self) {
        self.timers.disarm(TimerKind::Connect);
        if self.phase == Phase::Connecting {
            self.phase = Phase::HeadersSent;
        }
    }

    fn on_response(&mut self, head: ResponseHead) {
        if self.phase >= Phase::ResponseReceived {
            trace!(status = head.status, "ignoring second response head");
            return;
        }
        self.phase = Phase::ResponseReceived;
        debug!(status = head.status, "response received");

        let events = self.sink_events();
        let sinks = self.client.sinks.clone();
        self.body = Some(Accumulator::open(&self.request.client, |path| {
            debug!(path = %path.display(), "writing response body to sink");
            sinks.open(path, events)
        }));
        self.client.progress.response(&head);
        self.head = Some(head);
    }

    /// A completion channel for this attempt's sink.
    fn sink_events(&self) -> SinkEvents {
        let mailbox = self.mailbox.clone();
        let attempt = self.attempt;
        SinkEvents::new(move |status| {
            if let Some(mailbox) = mailbox.upgrade() {
                mailbox.deliver(attempt, Event::Sink(status));
            }
        })
    }

    fn on_data(&mut self, chunk: Bytes) {
        if self.phase != Phase::ResponseReceived || self.transport_ended {
            trace!(len = chunk.len(), "ignoring body data outside a response");
            return;
        }
        let Some(body) = self.body.as_mut() else {
            return;
        };
        body.push(&chunk);
        if !body.is_sink() {
            self.client.progress.data(&chunk);
        }
    }

    fn on_error(&mut self, error: RequestError) {
        debug!(error = %error, "transport reported an error");
        self.record(error);
    }

    /// The transport is done. In sink mode the transfer also waits for the
    /// sink to report completion; the two may arrive in either order.
    fn on_end(&mut self) {
        if self.phase >= Phase::Ended || self.transport_ended {
            return;
        }
        self.transport_ended = true;
        match self.body.as_mut() {
            Some(body) if body.is_sink() && !self.sink_finished => {
                body.finish();
                trace!("waiting for the response sink to finish");
            }
            _ => self.finish_transfer(),
        }
    }

    fn on_sink(&mut self, status: SinkStatus) {
        if self.phase >= Phase::Ended {
            trace!(?status, "ignoring sink status after the transfer ended");
            return;
        }
        match status {
            SinkStatus::Finished => {
                self.sink_finished = true;
                if self.transport_ended {
                    self.finish_transfer();
                }
            }
            SinkStatus::Failed(error) => {
                let path = self.request.client.save_to.clone().unwrap_or_default();
                warn!(path = %path.display(), error = %error, "response sink failed");
                self.abort(RequestError::sink(path, error));
            }
        }
    }

    fn on_timer(&mut self, kind: TimerKind) {
        if !self.timers.take_fired(kind) || self.phase >= Phase::Ended {
            trace!(?kind, "stale timer fire");
            return;
        }
        let error = match kind {
            TimerKind::Connect => RequestError::ConnectTimeout {
                timeout_ms: self.request.client.connect_timeout.as_millis(),
            },
            TimerKind::Total => RequestError::TransactionTimeout {
                timeout_ms: self.request.client.timeout.as_millis(),
            },
        };
        warn!(url = %self.request.url, error = %error, "request timed out");
        match self.call.as_mut() {
            Some(call) if !self.transport_ended => match kind {
                TimerKind::Connect => call.close_with_error(&error),
                TimerKind::Total => call.close(&error),
            },
            _ => {}
        }
        // Dropping an unfinished sink abandons it.
        self.body = None;
        self.record(error);
        self.finish_transfer();
    }

    /// Stop the transfer early because of `error`.
    fn abort(&mut self, error: RequestError) {
        if !self.transport_ended {
            if let Some(call) = self.call.as_mut() {
                call.close(&error);
            }
        }
        self.body = None;
        self.record(error);
        self.finish_transfer();
    }

    /// The first recorded error is the one reported.
    fn record(&mut self, error: RequestError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    fn finish_transfer(&mut self) {
        if self.phase >= Phase::Ended {
            return;
        }
        self.timers.disarm_all();
        self.call = None;
        self.phase = Phase::Ended;
        self.defer(Event::Reconcile);
    }

    fn reconcile(&mut self) {
        if self.phase != Phase::Ended {
            return;
        }
        if let Some(error) = self.error.take() {
            self.resolve(Err(error));
            return;
        }
        let Some(head) = self.head.take() else {
            self.resolve(Err(RequestError::NoResponse));
            return;
        };
        if let Some(location) = head.location() {
            match redirect::next_hop(&self.request, location) {
                Ok(next) => self.restart(next),
                Err(error) => self.resolve(Err(error)),
            }
            return;
        }

        let body = self
            .body
            .take()
            .map(Accumulator::into_body)
            .unwrap_or_default();
        let record = ResponseRecord {
            effective_url: self.request.url.clone(),
            status: head.status,
            reason: head.reason,
            headers: head.headers,
            body,
        };
        self.resolve(Ok(record));
    }

    fn restart(&mut self, next: RequestDescription) {
        debug!(
            from = %self.request.url,
            to = %next.url,
            remaining = next.client.redirect.map_or(0, |redirect| redirect.max),
            "following redirect"
        );
        self.request = next;
        self.attempt += 1;
        self.phase = Phase::Pending;
        self.body = None;
        self.transport_ended = false;
        self.sink_finished = false;
        self.defer(Event::Dispatch);
    }

    fn resolve(&mut self, result: OutcomeResult) {
        self.timers.disarm_all();
        self.call = None;
        self.body = None;
        self.phase = Phase::Resolved;
        match &result {
            Ok(record) => debug!(status = record.status, url = %record.effective_url, "request completed"),
            Err(error) => debug!(code = error.code().as_str(), error = %error, "request failed"),
        }
        if let Some(resolver) = self.resolver.take() {
            // The caller may have dropped the outcome; nothing is waiting then.
            let _ = resolver.send(result);
        }
    }
}
