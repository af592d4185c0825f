//! Request and response data for the executor.
//!
//! # Design
//! These types describe HTTP requests and responses as plain data. The
//! executor consumes a `RequestDescription`, hands the transport a `CallHead`,
//! receives a `ResponseHead` back through `CallEvents`, and finally produces a
//! `ResponseRecord`. Nothing here touches the network.
//!
//! All fields use owned types so a description can be cloned for a redirect
//! hop without borrowing from the previous attempt.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Header name to its values, in the order they were added.
pub type Headers = BTreeMap<String, Vec<String>>;

/// Everything needed to run one request, including its per-call options.
///
/// Absent option fields take their defaults when deserialized, so the JSON
/// `{"method":"GET","url":"http://localhost/ok"}` is a complete description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDescription {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub body: Bytes,
    #[serde(default)]
    pub client: ClientOptions,
}

/// Per-call options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Do not buffer the response body; chunks only reach progress observers.
    pub stream: bool,
    /// Limit for the connection phase. Zero disables the timer.
    #[serde(with = "secs")]
    pub connect_timeout: Duration,
    /// Limit for the whole transfer. Zero disables the timer.
    #[serde(with = "secs")]
    pub timeout: Duration,
    /// Write the response body to this file instead of memory.
    pub save_to: Option<PathBuf>,
    pub redirect: Option<RedirectOptions>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectOptions {
    /// Remaining redirect hops.
    pub max: u32,
}

impl RequestDescription {
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            method: method.to_string(),
            url: url.to_string(),
            headers: Headers::new(),
            body: Bytes::new(),
            client: ClientOptions::default(),
        }
    }

    pub fn get(url: &str) -> Self {
        Self::new("GET", url)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Append a value for `name`, keeping any values already present.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.client.connect_timeout = timeout;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.client.timeout = timeout;
        self
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.client.stream = stream;
        self
    }

    pub fn save_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.client.save_to = Some(path.into());
        self
    }

    pub fn max_redirects(mut self, max: u32) -> Self {
        self.client.redirect = Some(RedirectOptions { max });
        self
    }

    /// Headers in the form the transport accepts: one string per name, with
    /// multiple values joined by `;`.
    pub fn wire_headers(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .map(|(name, values)| (name.clone(), values.join(";")))
            .collect()
    }
}

/// The request line and headers handed to `Transport::begin_call`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallHead {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
}

/// Status line and headers of a response, as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
}

impl ResponseHead {
    pub fn new(status: u16, reason: &str) -> Self {
        Self {
            status,
            reason: reason.to_string(),
            headers: Headers::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
        self
    }

    /// First `location` value, matched case-insensitively.
    pub fn location(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("location"))
            .and_then(|(_, values)| values.first())
            .map(String::as_str)
    }
}

/// The normalized result of a successful request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseRecord {
    /// URL of the attempt that produced this response (the last redirect hop).
    pub effective_url: String,
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    /// Empty when the body was streamed or written to a sink.
    pub body: Bytes,
}

/// Durations as (fractional) seconds.
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
