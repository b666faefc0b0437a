//! Request context middleware
//!
//! Gives every request a logical context: a `request` span carrying a
//! `request_id`, so everything logged while handling it lands in the same
//! pre-error buffer and is replayed together if the request fails.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

use crate::config::CaptureConfig;
use crate::redaction::SharedRedactor;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Logged in place of a request body that could not be captured
pub const UNAVAILABLE_BODY: &str = "<unavailable>";

const MAX_REQUEST_ID_LEN: usize = 128;

#[derive(Clone)]
pub struct RequestContextState {
    pub redactor: SharedRedactor,
    pub capture: CaptureConfig,
}

/// Request context middleware
///
/// Echoes the request id back in `x-request-id`. Server errors are logged at
/// ERROR inside the request span, which escalates verbosity and replays the
/// request's buffered events.
pub async fn request_context(
    State(state): State<Arc<RequestContextState>>,
    req: Request,
    next: Next,
) -> Response {
    let request_id = resolve_request_id(req.headers());
    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    async move {
        let started = Instant::now();

        let req = if state.capture.request_body {
            capture_body(req, &state).await
        } else {
            req
        };

        let mut response = next.run(req).await;

        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }

        let status = response.status();
        let elapsed_ms = started.elapsed().as_millis() as u64;
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), elapsed_ms, "Request failed");
        } else {
            tracing::debug!(status = status.as_u16(), elapsed_ms, "Request completed");
        }

        response
    }
    .instrument(span)
    .await
}

/// `x-request-id` if usable, else the trace id from `traceparent`, else a new UUID
pub fn resolve_request_id(headers: &HeaderMap) -> String {
    if let Some(id) = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| is_valid_request_id(id))
    {
        return id.to_string();
    }

    if let Some(trace_id) = headers
        .get(TRACEPARENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(trace_id_from_traceparent)
    {
        return trace_id.to_string();
    }

    uuid::Uuid::new_v4().to_string()
}

fn is_valid_request_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_REQUEST_ID_LEN
        && id.bytes().all(|b| b.is_ascii_graphic())
}

/// Trace id from a W3C `traceparent` value (`version-traceid-parentid-flags`)
fn trace_id_from_traceparent(value: &str) -> Option<&str> {
    let mut parts = value.trim().split('-');
    let _version = parts.next()?;
    let trace_id = parts.next()?;
    let _parent = parts.next()?;
    let _flags = parts.next()?;

    let valid = trace_id.len() == 32
        && trace_id.bytes().all(|b| b.is_ascii_hexdigit())
        && trace_id.bytes().any(|b| b != b'0');
    valid.then_some(trace_id)
}

/// Log the (redacted) request body at DEBUG and hand the request on intact
///
/// Only bodies with a known length within `max_body_bytes` are read; anything
/// else is logged as unavailable and passed through untouched.
async fn capture_body(req: Request, state: &RequestContextState) -> Request {
    let declared_len = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());

    let within_limit = matches!(declared_len, Some(len) if len <= state.capture.max_body_bytes);
    if !within_limit {
        tracing::debug!(body = UNAVAILABLE_BODY, declared_len, "Request body");
        return req;
    }

    let (parts, body) = req.into_parts();
    match axum::body::to_bytes(body, state.capture.max_body_bytes).await {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes);
            let redacted = state.redactor.load().redact(&text).into_owned();
            tracing::debug!(body = %redacted, bytes = bytes.len(), "Request body");
            Request::from_parts(parts, Body::from(bytes))
        }
        Err(e) => {
            tracing::debug!(body = UNAVAILABLE_BODY, error = %e, "Request body");
            Request::from_parts(parts, Body::empty())
        }
    }
}
