//! Where response body chunks go.
//!
//! # Design
//! One `Accumulator` exists per attempt and only the executor writes to it.
//! The mode is fixed when the response head arrives:
//!
//! - `Buffer` appends every chunk to memory; the result becomes the record body.
//! - `Stream` keeps nothing; chunks are only visible to progress observers.
//! - `Sink` hands every chunk to a `BodySink` opened at `save_to`, leaving the
//!   record body empty. `save_to` takes precedence over `stream`.
//!
//! Sinks never block the loop. Opening, writing and flushing happen
//! elsewhere, and the sink reports back through `SinkEvents`: `finished` once
//! everything queued before `finish` is durable, or `failed` as soon as
//! anything goes wrong. The executor treats `finished` as a second
//! end-of-transfer signal alongside the transport's `end`.

use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use bytes::{Bytes, BytesMut};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tracing::trace;

use crate::http::ClientOptions;

/// What a sink reports back once it stops.
#[derive(Debug)]
pub enum SinkStatus {
    /// Everything written before `finish` reached the destination.
    Finished,
    Failed(io::Error),
}

/// Completion channel from a sink back to the request that opened it.
#[derive(Clone)]
pub struct SinkEvents {
    notify: Rc<dyn Fn(SinkStatus)>,
}

impl SinkEvents {
    pub fn new(notify: impl Fn(SinkStatus) + 'static) -> Self {
        Self {
            notify: Rc::new(notify),
        }
    }

    pub fn finished(&self) {
        (self.notify)(SinkStatus::Finished);
    }

    pub fn failed(&self, error: io::Error) {
        (self.notify)(SinkStatus::Failed(error));
    }
}

impl std::fmt::Debug for SinkEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkEvents").finish_non_exhaustive()
    }
}

/// A non-blocking destination for a response body.
///
/// Dropping a sink without calling `finish` abandons it; it must not report
/// anything afterwards.
pub trait BodySink {
    /// Queue a chunk. Must return without waiting on I/O.
    fn write_chunk(&mut self, chunk: Bytes);

    /// No more chunks follow. Completion is reported through `SinkEvents`.
    fn finish(&mut self);
}

/// Opens the sink named by a request's `save_to` option.
///
/// Opening must not block either: a destination that cannot be opened is
/// reported through `events.failed`.
pub trait SinkOpener {
    fn open(&self, path: &Path, events: SinkEvents) -> Box<dyn BodySink>;
}

/// Creates (or truncates) a file at the `save_to` path and writes it from a
/// task on the current tokio `LocalSet`.
///
/// Like `TokioLoop`, it must be used from inside a `LocalSet`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSinkOpener;

enum SinkCommand {
    Chunk(Bytes),
    Finish,
}

impl SinkOpener for FileSinkOpener {
    fn open(&self, path: &Path, events: SinkEvents) -> Box<dyn BodySink> {
        let (tx, rx) = mpsc::unbounded_channel();
        if tokio::runtime::Handle::try_current().is_err() {
            events.failed(io::Error::new(
                io::ErrorKind::Other,
                "file sinks need a running tokio runtime",
            ));
        } else {
            tokio::task::spawn_local(write_file(path.to_path_buf(), rx, events));
        }
        Box::new(FileSink { tx })
    }
}

struct FileSink {
    tx: mpsc::UnboundedSender<SinkCommand>,
}

impl BodySink for FileSink {
    fn write_chunk(&mut self, chunk: Bytes) {
        // A closed channel means the writer already reported a failure.
        let _ = self.tx.send(SinkCommand::Chunk(chunk));
    }

    fn finish(&mut self) {
        let _ = self.tx.send(SinkCommand::Finish);
    }
}

async fn write_file(path: PathBuf, mut rx: mpsc::UnboundedReceiver<SinkCommand>, events: SinkEvents) {
    match copy_commands(&path, &mut rx).await {
        Ok(true) => events.finished(),
        Ok(false) => trace!(path = %path.display(), "response sink abandoned"),
        Err(error) => events.failed(error),
    }
}

/// Returns false when the sink was dropped before `finish`.
async fn copy_commands(
    path: &Path,
    rx: &mut mpsc::UnboundedReceiver<SinkCommand>,
) -> io::Result<bool> {
    let mut file = BufWriter::new(File::create(path).await?);
    while let Some(command) = rx.recv().await {
        match command {
            SinkCommand::Chunk(chunk) => file.write_all(&chunk).await?,
            SinkCommand::Finish => {
                file.flush().await?;
                file.get_mut().sync_all().await?;
                return Ok(true);
            }
        }
    }
    Ok(false)
}

pub(crate) enum Accumulator {
    Buffer(BytesMut),
    Stream,
    Sink(Box<dyn BodySink>),
}

impl Accumulator {
    /// Pick the mode for `options`. `open_sink` is only called for `save_to`.
    pub(crate) fn open(
        options: &ClientOptions,
        open_sink: impl FnOnce(&Path) -> Box<dyn BodySink>,
    ) -> Self {
        if let Some(path) = &options.save_to {
            return Self::Sink(open_sink(path));
        }
        if options.stream {
            return Self::Stream;
        }
        Self::Buffer(BytesMut::new())
    }

    pub(crate) fn is_sink(&self) -> bool {
        matches!(self, Self::Sink(_))
    }

    pub(crate) fn push(&mut self, chunk: &Bytes) {
        match self {
            Self::Buffer(buffer) => buffer.extend_from_slice(chunk),
            Self::Stream => {}
            Self::Sink(sink) => sink.write_chunk(chunk.clone()),
        }
    }

    pub(crate) fn finish(&mut self) {
        if let Self::Sink(sink) = self {
            sink.finish();
        }
    }

    pub(crate) fn into_body(self) -> Bytes {
        match self {
            Self::Buffer(buffer) => buffer.freeze(),
            Self::Stream | Self::Sink(_) => Bytes::new(),
        }
    }
}
