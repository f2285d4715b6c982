//! Axum integration
//!
//! Mounts a `Listener` as `POST <path>`. The body is read on the async
//! runtime, and only for authenticated requests; the state machine, and
//! therefore the user handler, runs on the blocking pool.

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use tracing::{error, instrument, Span};

use crate::listener::Listener;

impl Listener {
    /// Router serving this listener at `path`.
    pub fn into_router(self, path: &str) -> Router {
        router(Arc::new(self), path)
    }
}

/// Router serving `listener` at `path`. Other methods on `path` get 405.
pub fn router(listener: Arc<Listener>, path: &str) -> Router {
    Router::new()
        .route(path, post(receive_events))
        .with_state(listener)
}

#[instrument(name = "routemaster.webhook", skip_all)]
async fn receive_events(
    State(listener): State<Arc<Listener>>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let body = read_body(&listener, authorization.as_deref(), body).await;

    let span = Span::current();
    let worker = Arc::clone(&listener);
    let status = match tokio::task::spawn_blocking(move || {
        span.in_scope(|| worker.process(authorization.as_deref(), body))
    })
    .await
    {
        Ok(status) => status,
        Err(e) => {
            error!(error = %e, "Webhook task failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    status_response(status)
}

/// Reads the body of an authenticated request. Unauthenticated bodies are
/// left unread; `process` answers those with 401 before looking at them.
async fn read_body(
    listener: &Listener,
    authorization: Option<&str>,
    body: Body,
) -> Result<Bytes, axum::Error> {
    if !listener.authenticate(authorization) {
        return Ok(Bytes::new());
    }
    axum::body::to_bytes(body, listener.max_body_bytes()).await
}

/// 200 with an empty body, anything else with `"<code> <reason>\n"`.
pub fn status_response(status: StatusCode) -> Response {
    if status == StatusCode::OK {
        return StatusCode::OK.into_response();
    }

    let text = format!(
        "{} {}\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or_default()
    );
    let mut response = (status, text).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response.headers_mut().insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    response
}
