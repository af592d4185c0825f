//! Redirect hop accounting.
//!
//! # Design
//! A redirect never mutates the request it came from. `next_hop` derives a new
//! `RequestDescription` carrying one hop fewer and the resolved location, and
//! the executor restarts itself with it. A budget of `N` lets a request follow
//! `N` redirects; the redirect after that rejects. There is no cycle
//! detection: a loop ends when the budget does.

use url::Url;

use crate::error::RequestError;
use crate::http::{RedirectOptions, RequestDescription};

pub fn next_hop(
    current: &RequestDescription,
    location: &str,
) -> Result<RequestDescription, RequestError> {
    let Some(redirect) = current.client.redirect else {
        return Err(RequestError::RedirectNotConfigured {
            location: location.to_string(),
        });
    };
    if redirect.max == 0 {
        return Err(RequestError::RedirectExhausted {
            location: location.to_string(),
        });
    }
    let url = resolve_location(&current.url, location).ok_or_else(|| {
        RequestError::InvalidRedirectLocation {
            location: location.to_string(),
        }
    })?;

    let mut next = current.clone();
    next.url = url;
    next.client.redirect = Some(RedirectOptions {
        max: redirect.max - 1,
    });
    Ok(next)
}

/// Resolve `location` against the URL that produced it. Absolute locations
/// pass through unchanged.
pub fn resolve_location(current: &str, location: &str) -> Option<String> {
    if let Ok(absolute) = Url::parse(location) {
        return Some(absolute.to_string());
    }
    let base = Url::parse(current).ok()?;
    base.join(location).ok().map(String::from)
}
