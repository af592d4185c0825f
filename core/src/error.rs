//! Error types for the request executor.
//!
//! # Design
//! Every way a request can fail ends up as one `RequestError` delivered
//! through the request's outcome. Timeouts get their own variants because
//! callers routinely treat them differently from a transport failure.
//! `ErrorCode` gives each variant a stable name for logs and metrics labels.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Read,
    Write,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Write => "write",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

/// A failure reported by the transport through `CallEvents::error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} error: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConnectTimeout,
    TransactionTimeout,
    Transport,
    RedirectExhausted,
    RedirectNotConfigured,
    InvalidRedirectLocation,
    Sink,
    NoResponse,
    Abandoned,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConnectTimeout => "connect_timeout",
            Self::TransactionTimeout => "transaction_timeout",
            Self::Transport => "transport",
            Self::RedirectExhausted => "redirect_exhausted",
            Self::RedirectNotConfigured => "redirect_not_configured",
            Self::InvalidRedirectLocation => "invalid_redirect_location",
            Self::Sink => "sink",
            Self::NoResponse => "no_response",
            Self::Abandoned => "abandoned",
        }
    }
}

/// Why a request's outcome was rejected.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RequestError {
    #[error("connection timed out after {timeout_ms}ms")]
    ConnectTimeout { timeout_ms: u128 },

    #[error("transaction timed out after {timeout_ms}ms")]
    TransactionTimeout { timeout_ms: u128 },

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The hop budget was spent before a non-redirect response arrived.
    #[error("redirect limit exhausted before following {location}")]
    RedirectExhausted { location: String },

    /// A redirect arrived but the request carried no `redirect` option.
    #[error("redirect to {location} received without a redirect limit configured")]
    RedirectNotConfigured { location: String },

    #[error("invalid redirect location: {location}")]
    InvalidRedirectLocation { location: String },

    #[error("failed writing response body to {}: {source}", path.display())]
    Sink {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    /// The transfer ended without a response head and without an error.
    #[error("transfer ended without a response")]
    NoResponse,

    /// The executor was dropped before resolving.
    #[error("request abandoned before completion")]
    Abandoned,
}

impl RequestError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ConnectTimeout { .. } => ErrorCode::ConnectTimeout,
            Self::TransactionTimeout { .. } => ErrorCode::TransactionTimeout,
            Self::Transport(_) => ErrorCode::Transport,
            Self::RedirectExhausted { .. } => ErrorCode::RedirectExhausted,
            Self::RedirectNotConfigured { .. } => ErrorCode::RedirectNotConfigured,
            Self::InvalidRedirectLocation { .. } => ErrorCode::InvalidRedirectLocation,
            Self::Sink { .. } => ErrorCode::Sink,
            Self::NoResponse => ErrorCode::NoResponse,
            Self::Abandoned => ErrorCode::Abandoned,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout { .. } | Self::TransactionTimeout { .. }
        )
    }

    pub(crate) fn sink(path: PathBuf, source: io::Error) -> Self {
        Self::Sink {
            path,
            source: Arc::new(source),
        }
    }
}

/// A request description could not be read.
#[derive(Debug, Error)]
#[error("invalid request description: {0}")]
pub struct ConfigError(#[from] serde_json::Error);
