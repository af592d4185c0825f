//! Event-loop driven HTTP request executor.
//!
//! # Overview
//! `send` takes a `RequestDescription` and drives a pluggable `Transport`
//! through connection, header and body phases on a pluggable `EventLoop`,
//! returning an `Outcome` that resolves exactly once with a `ResponseRecord`
//! or a `RequestError`.
//!
//! # Design
//! - The executor never performs I/O itself. The transport does the network
//!   work and reports back through `CallEvents`; the loop supplies ticks and
//!   timers. Both are traits, so the whole lifecycle can run on `LocalLoop`'s
//!   virtual clock in tests.
//! - Connect and total timeouts are independent and disabled at zero.
//! - Response bodies are buffered, dropped after progress notification
//!   (`stream`), or handed to a non-blocking sink (`save_to`).
//! - Redirects restart the same executor with one hop fewer; there is no
//!   recursion and no nested outcome forwarding.
//! - Everything is single-threaded (`Rc`, not `Arc`).

pub mod body;
pub mod error;
pub mod event_loop;
pub mod executor;
pub mod http;
pub mod progress;
pub mod redirect;
mod timer;
pub mod transport;

#[cfg(test)]
mod testing;

pub use body::{BodySink, FileSinkOpener, SinkEvents, SinkOpener, SinkStatus};
pub use error::{ConfigError, ErrorCode, RequestError, TransportError, TransportErrorKind};
pub use event_loop::{EventLoop, LocalLoop, Task, TimerHandle, TokioLoop};
pub use executor::{send, Client, Outcome};
pub use http::{
    CallHead, ClientOptions, Headers, RedirectOptions, RequestDescription, ResponseHead,
    ResponseRecord,
};
pub use progress::{NoProgress, ProgressEvent, ProgressObserver};
pub use transport::{Call, CallEvents, Transport};
