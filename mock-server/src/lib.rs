//! Fixture HTTP server for exercising the executor over real sockets.
//!
//! Routes:
//! - `GET /ok` answers `hello world`.
//! - `GET /redirect/{n}` redirects to `/redirect/{n-1}` until `n` is 0, which
//!   answers `arrived`.
//! - `GET /loop` redirects to itself forever.
//! - `POST /echo` answers with the request body and copies the `x-multi`
//!   request header into `x-echo-multi`.
//! - `GET /large` answers `LARGE_BODY_LEN` bytes of `large_body()`.
//! - `GET /status/{code}` answers an empty body with that status.

use axum::{
    body::Bytes,
    extract::Path,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tracing::debug;

pub const LARGE_BODY_LEN: usize = 64 * 1024;

/// Deterministic, non-repeating-looking payload served by `/large`.
pub fn large_body() -> Vec<u8> {
    (0..LARGE_BODY_LEN).map(|i| (i % 251) as u8).collect()
}

pub fn app() -> Router {
    Router::new()
        .route("/ok", get(ok))
        .route("/redirect/{n}", get(redirect_chain))
        .route("/loop", get(redirect_loop))
        .route("/echo", post(echo))
        .route("/large", get(large))
        .route("/status/{code}", get(status))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

fn found(location: String) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

async fn ok() -> &'static str {
    "hello world"
}

async fn redirect_chain(Path(n): Path<u32>) -> Response {
    debug!(n, "redirect chain");
    if n == 0 {
        return "arrived".into_response();
    }
    found(format!("/redirect/{}", n - 1))
}

async fn redirect_loop() -> Response {
    found("/loop".to_string())
}

async fn echo(headers: HeaderMap, body: Bytes) -> Response {
    let multi = headers
        .get("x-multi")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    ([("x-echo-multi", multi)], body).into_response()
}

async fn large() -> Vec<u8> {
    large_body()
}

async fn status(Path(code): Path<u16>) -> Result<StatusCode, StatusCode> {
    StatusCode::from_u16(code).map_err(|_| StatusCode::BAD_REQUEST)
}
