//! The transport seam.
//!
//! # Design
//! A `Transport` owns DNS, connections and HTTP framing. The executor starts a
//! call with `begin_call`, passing a `CallEvents` handle that is already wired
//! to the executor, so nothing the transport reports can be missed, even when
//! it reports synchronously from inside `begin_call`, `write` or `end`.
//!
//! Every `CallEvents` is bound to one attempt. Notifications from a call that
//! has been superseded (by a redirect) or closed (by a timeout) are dropped by
//! the executor.

use std::fmt;
use std::rc::Rc;

use bytes::Bytes;

use crate::error::{RequestError, TransportError};
use crate::executor::{Event, Mailbox};
use crate::http::{CallHead, ResponseHead};

pub trait Transport {
    fn begin_call(&self, head: CallHead, events: CallEvents) -> Box<dyn Call>;
}

/// One in-flight call.
pub trait Call {
    fn write(&mut self, body: &[u8]);

    /// No more request body follows.
    fn end(&mut self);

    /// Abort the call; the connection never became usable.
    fn close_with_error(&mut self, reason: &RequestError);

    /// Shut the call down after it was established.
    fn close(&mut self, reason: &RequestError);
}

/// Notifications a transport delivers for one call.
#[derive(Clone)]
pub struct CallEvents {
    mailbox: Rc<Mailbox>,
    attempt: u64,
}

impl CallEvents {
    pub(crate) fn new(mailbox: Rc<Mailbox>, attempt: u64) -> Self {
        Self { mailbox, attempt }
    }

    pub fn headers_written(&self) {
        self.mailbox.deliver(self.attempt, Event::HeadersWritten);
    }

    pub fn response(&self, head: ResponseHead) {
        self.mailbox.deliver(self.attempt, Event::Response(head));
    }

    pub fn data(&self, chunk: impl Into<Bytes>) {
        self.mailbox.deliver(self.attempt, Event::Data(chunk.into()));
    }

    pub fn error(&self, error: TransportError) {
        self.mailbox.deliver(self.attempt, Event::Error(error));
    }

    pub fn end(&self) {
        self.mailbox.deliver(self.attempt, Event::End);
    }
}

impl fmt::Debug for CallEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallEvents")
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}
