/// Integration tests for the request context middleware and its buffer replay
use adaptive_logging::{
    buffer::MemorySink,
    config::Config,
    middleware::{request_context, RequestContextState, UNAVAILABLE_BODY},
    pipeline::LogPipeline,
};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceExt;
use tracing_subscriber::prelude::*;

async fn failing_handler() -> StatusCode {
    tracing::debug!(user = "u-42", "loading user");
    tracing::info!("calling billing backend");
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn ok_handler() -> &'static str {
    tracing::debug!("all good");
    "ok"
}

async fn echo_failing(body: String) -> (StatusCode, String) {
    (StatusCode::BAD_GATEWAY, body)
}

fn app(pipeline: &LogPipeline, config: &Config) -> Router {
    let state = Arc::new(RequestContextState {
        redactor: pipeline.redactor().clone(),
        capture: config.capture.clone(),
    });

    Router::new()
        .route("/fail", get(failing_handler))
        .route("/ok", get(ok_handler))
        .route("/echo", post(echo_failing))
        .layer(middleware::from_fn_with_state(state, request_context))
}

#[tokio::test]
async fn test_server_error_replays_request_context() {
    let config = Config::default();
    let sink = Arc::new(MemorySink::new());
    let pipeline = LogPipeline::with_sink(&config, sink.clone()).unwrap();

    let subscriber = tracing_subscriber::registry()
        .with(pipeline.buffer_layer())
        .with(pipeline.trigger_layer());
    let _guard = tracing::subscriber::set_default(subscriber);

    let ok = app(&pipeline, &config)
        .oneshot(
            Request::builder()
                .uri("/ok")
                .header("x-request-id", "req-ok")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);

    let failed = app(&pipeline, &config)
        .oneshot(
            Request::builder()
                .uri("/fail")
                .header("x-request-id", "req-500")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(failed.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(failed.headers()["x-request-id"], "req-500");

    let events = sink.events();
    let messages: Vec<&str> = events.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, ["loading user", "calling billing backend"]);
    assert!(events
        .iter()
        .all(|e| e.context_id.as_deref() == Some("req-500")));
    assert_eq!(events[0].fields["user"], "u-42");

    // The successful request stays buffered under its own id
    let buffer = pipeline.buffer().unwrap();
    assert_eq!(buffer.retained("req-ok"), 2);
    assert_eq!(pipeline.telemetry().snapshot().errors_observed, 1);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_captured_body_is_redacted_and_forwarded() {
    let mut config = Config::default();
    config.capture.request_body = true;
    config.redaction.rules = vec![r"sk-[a-z0-9]+".to_string()];

    let sink = Arc::new(MemorySink::new());
    let pipeline = LogPipeline::with_sink(&config, sink.clone()).unwrap();

    let subscriber = tracing_subscriber::registry()
        .with(pipeline.buffer_layer())
        .with(pipeline.trigger_layer());
    let _guard = tracing::subscriber::set_default(subscriber);

    let payload = r#"{"api_key":"sk-abc123","amount":10}"#;
    let response = app(&pipeline, &config)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/echo")
                .header("x-request-id", "req-body")
                .header("content-length", payload.len())
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let echoed = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&echoed[..], payload.as_bytes());

    let events = sink.events();
    let body_event = events
        .iter()
        .find(|e| e.message == "Request body")
        .expect("body was captured");
    assert_eq!(
        body_event.fields["body"],
        r#"{"api_key":"***REDACTED***","amount":10}"#
    );

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_oversized_body_logged_as_unavailable() {
    let mut config = Config::default();
    config.capture.request_body = true;
    config.capture.max_body_bytes = 8;

    let sink = Arc::new(MemorySink::new());
    let pipeline = LogPipeline::with_sink(&config, sink.clone()).unwrap();

    let subscriber = tracing_subscriber::registry()
        .with(pipeline.buffer_layer())
        .with(pipeline.trigger_layer());
    let _guard = tracing::subscriber::set_default(subscriber);

    let payload = "this body is longer than eight bytes";
    let response = app(&pipeline, &config)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/echo")
                .header("x-request-id", "req-big")
                .header("content-length", payload.len())
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
        .unwrap();

    // The handler still sees the whole body
    let echoed = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&echoed[..], payload.as_bytes());

    let events = sink.events();
    let body_event = events
        .iter()
        .find(|e| e.message == "Request body")
        .expect("body event was logged");
    assert_eq!(body_event.fields["body"], UNAVAILABLE_BODY);

    pipeline.shutdown().await;
}
