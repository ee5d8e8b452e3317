mod common;

use acai_core::{FALLBACK_TITLE, Orchestrator};
use acai_server::{metrics::testing::Harness, routes::router};
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use common::KeywordModel;
use serde_json::{Value, json};
use tower::ServiceExt;

fn app(harness: &Harness) -> Router {
    router(Orchestrator::new(KeywordModel), harness.metrics())
}

fn start(message: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/conversations")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "message": message }).to_string()))
        .unwrap()
}

async fn body_json(res: axum::response::Response) -> Value {
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn start_conversation_returns_title_and_reply() {
    let harness = Harness::new();

    let res = app(&harness).oneshot(start("sourdough tips")).await.unwrap();

    assert_eq!(res.status(), StatusCode::CREATED);
    let body = body_json(res).await;
    assert_eq!(body["title"], "About sourdough");
    assert_eq!(body["messages"][0]["role"], "user");
    assert_eq!(body["messages"][0]["content"], "sourdough tips");
    assert_eq!(body["messages"][1]["role"], "assistant");
    assert_eq!(body["messages"][1]["content"], "Reply to sourdough tips");
    assert!(!body["id"].as_str().unwrap().is_empty());

    let snap = harness.snapshot();
    assert_eq!(snap.requests.get(&201), Some(&1));
    assert!(snap.errors.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn title_failure_is_transparent_to_the_client() {
    let harness = Harness::new();

    let res = app(&harness).oneshot(start("no-title please")).await.unwrap();

    assert_eq!(res.status(), StatusCode::CREATED);
    let body = body_json(res).await;
    assert_eq!(body["title"], FALLBACK_TITLE);
    assert_eq!(body["messages"][1]["content"], "Reply to no-title please");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reply_failure_is_an_opaque_internal_error() {
    let harness = Harness::new();

    let res = app(&harness).oneshot(start("no-reply no-title")).await.unwrap();

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(res).await;
    assert_eq!(body, json!({ "error": "internal error" }));

    let snap = harness.snapshot();
    assert_eq!(snap.requests.get(&500), Some(&1));
    assert_eq!(snap.errors.get(&500), Some(&1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn blank_message_is_a_bad_request() {
    let harness = Harness::new();

    let res = app(&harness).oneshot(start("   ")).await.unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body = body_json(res).await;
    assert_eq!(body["error"], "Invalid request: message must not be empty");
    assert_eq!(harness.snapshot().errors.get(&400), Some(&1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn extractor_rejections_are_counted_as_errors() {
    let harness = Harness::new();
    let app = app(&harness);

    let missing_field = Request::builder()
        .method("POST")
        .uri("/conversations")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"text": "hi"}"#))
        .unwrap();
    let res = app.clone().oneshot(missing_field).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let not_found = Request::builder()
        .uri("/nope")
        .body(Body::empty())
        .unwrap();
    let res = app.oneshot(not_found).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let snap = harness.snapshot();
    assert_eq!(snap.total_requests(), 2);
    assert_eq!(snap.errors.get(&422), Some(&1));
    assert_eq!(snap.errors.get(&404), Some(&1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn healthz_is_counted_without_errors() {
    let harness = Harness::new();
    let app = app(&harness);

    for _ in 0..3 {
        let req = Request::builder()
            .uri("/healthz")
            .body(Body::empty())
            .unwrap();
        let res = app.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"ok");
    }

    let snap = harness.snapshot();
    assert_eq!(snap.requests.get(&200), Some(&3));
    assert!(snap.errors.is_empty());
}
