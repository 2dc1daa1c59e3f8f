mod support;

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use focus_sync::{
    api::create_router, bus::ChannelHub, clock::ManualClock, state::AppState,
};
use serde_json::{json, Value};
use support::*;
use tower::ServiceExt;

async fn app() -> (Arc<ManualClock>, Router) {
    let clock = Arc::new(ManualClock::new(t0()));
    let test = EngineBuilder::new(clock.clone(), Arc::new(ChannelHub::default())).build();
    test.engine.initialize().await;
    let state = Arc::new(AppState::new(test.engine, 20554, "127.0.0.1".to_string()));
    (clock, create_router(state))
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn commands_drive_the_timer() {
    let (clock, app) = app().await;

    let (status, body) = call(&app, "POST", "/timer/start", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "running");
    assert_eq!(body["timer"]["phase"], "RUNNING");

    clock.advance(90);
    let (status, body) = call(&app, "POST", "/timer/toggle", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "paused");
    assert_eq!(body["timer"]["state"]["accumulatedSeconds"], 90);
    assert_eq!(body["timer"]["remainingSeconds"], 1410);

    let (status, body) = call(&app, "POST", "/timer/reset", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "idle");
}

#[tokio::test]
async fn rejected_commands_return_conflict() {
    let (_, app) = app().await;

    let (status, body) = call(&app, "POST", "/timer/pause", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], "error");
    assert_eq!(body["message"], "timer is not running");

    call(&app, "POST", "/timer/start", None).await;
    let (status, _) = call(
        &app,
        "POST",
        "/timer/category",
        Some(json!({ "categoryId": "reading", "durationSeconds": 600 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn category_change_and_reads() {
    let (_, app) = app().await;

    let (status, body) = call(
        &app,
        "POST",
        "/timer/category",
        Some(json!({ "categoryId": "reading", "durationSeconds": 600 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["timer"]["state"]["categoryId"], "reading");

    let (_, timer) = call(&app, "GET", "/timer", None).await;
    assert_eq!(timer["phase"], "IDLE");
    assert_eq!(timer["remainingSeconds"], 600);

    let (_, session) = call(&app, "GET", "/timer/session", None).await;
    assert!(session.is_null());

    let (_, status) = call(&app, "GET", "/status", None).await;
    assert_eq!(status["last_action"], "category");
    assert_eq!(status["port"], 20554);
    assert!(status["origin"].is_string());

    let (_, health) = call(&app, "GET", "/health", None).await;
    assert_eq!(health["status"], "ok");
}

#[tokio::test]
async fn focus_reports_reconcile_outcome() {
    let (_, app) = app().await;

    let (status, body) = call(&app, "POST", "/timer/focus", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"]["outcome"], "adopted");
    assert_eq!(body["outcome"]["phase"], "IDLE");
}
