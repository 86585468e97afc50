//! Integration tests for the health check and import endpoints.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{body_json, build_test_app, build_test_app_with, get, post, GatedSource};
use dumpsync_api::router::REQUEST_ID_HEADER;
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Test: GET /health returns 200 with expected JSON fields
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_check_returns_ok_with_json() {
    let test = build_test_app();
    let response = get(test.app, "/health").await;

    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["import_enabled"], true);
}

// ---------------------------------------------------------------------------
// Test: Unknown route returns 404
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_route_returns_404() {
    let test = build_test_app();
    let response = get(test.app, "/this-route-does-not-exist").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Test: x-request-id header is present in response
// ---------------------------------------------------------------------------

#[tokio::test]
async fn response_contains_x_request_id_header() {
    let test = build_test_app();
    let response = get(test.app, "/health").await;

    let request_id = response.headers().get("x-request-id");
    assert!(
        request_id.is_some(),
        "Response must contain an x-request-id header"
    );

    // The value should be a valid UUID (36 chars with hyphens).
    let id_str = request_id.unwrap().to_str().unwrap();
    assert_eq!(id_str.len(), 36, "x-request-id should be a UUID string");
}

#[tokio::test]
async fn client_request_id_is_echoed() {
    let test = build_test_app();
    let request = Request::builder()
        .uri("/api/v1/import/status")
        .header(REQUEST_ID_HEADER, "import-check-42")
        .body(Body::empty())
        .unwrap();
    let response = test.app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(REQUEST_ID_HEADER).unwrap(),
        "import-check-42"
    );
}

// ---------------------------------------------------------------------------
// Test: Status before any run is idle, wrapped in the data envelope
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_is_idle_before_first_run() {
    let test = build_test_app();
    let response = get(test.app, "/api/v1/import/status").await;

    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let status = &json["data"];
    assert_eq!(status["status"], "idle");
    assert_eq!(status["progress"], 0);
    assert!(status["started_at"].is_null());
    assert!(status["error"].is_null());
}

// ---------------------------------------------------------------------------
// Test: Trigger is accepted, a second trigger conflicts, run completes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn trigger_accepts_then_rejects_concurrent_run() {
    let test = build_test_app_with(GatedSource::gated(), true);

    let response = post(test.app.clone(), "/api/v1/import/trigger").await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["data"]["triggered"], true);

    let status = body_json(get(test.app.clone(), "/api/v1/import/status").await).await;
    assert_eq!(status["data"]["status"], "running");

    // The first run is held in its listing, so this one must be rejected.
    let response = post(test.app.clone(), "/api/v1/import/trigger").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = body_json(response).await;
    assert_eq!(json["code"], "ALREADY_RUNNING");
    assert!(json["error"].is_string());

    test.source.release();
    test.orchestrator.wait_idle().await;

    let status = body_json(get(test.app.clone(), "/api/v1/import/status").await).await;
    assert_eq!(status["data"]["status"], "skipped");
    assert_eq!(status["data"]["skip_reason"], "no matching remote files found");

    // The guard is free again and the released gate lets this run finish.
    let response = post(test.app.clone(), "/api/v1/import/trigger").await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    test.orchestrator.wait_idle().await;

    let status = body_json(get(test.app, "/api/v1/import/status").await).await;
    assert_eq!(status["data"]["status"], "skipped");
}

// ---------------------------------------------------------------------------
// Test: Trigger while disabled returns 503
// ---------------------------------------------------------------------------

#[tokio::test]
async fn trigger_when_disabled_returns_503() {
    let test = build_test_app_with(GatedSource::open(), false);

    let health = body_json(get(test.app.clone(), "/health").await).await;
    assert_eq!(health["import_enabled"], false);

    let response = post(test.app.clone(), "/api/v1/import/trigger").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = body_json(response).await;
    assert_eq!(json["code"], "SERVICE_DISABLED");

    let status = body_json(get(test.app, "/api/v1/import/status").await).await;
    assert_eq!(status["data"]["status"], "idle");
}

// ---------------------------------------------------------------------------
// Test: Logs honour the limit and return the most recent entries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn logs_respect_limit() {
    let test = build_test_app();
    test.orchestrator.run_now().await.unwrap();

    let all = body_json(get(test.app.clone(), "/api/v1/import/logs").await).await;
    let all = all["data"].as_array().unwrap().clone();
    assert!(all.len() >= 2, "a run should log at least its start and end");
    assert!(all.iter().all(|e| e["level"].is_string() && e["step"].is_string()));

    let response = get(test.app.clone(), "/api/v1/import/logs?limit=1").await;
    assert_eq!(response.status(), StatusCode::OK);
    let limited = body_json(response).await;
    let limited = limited["data"].as_array().unwrap();
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0], all[all.len() - 1]);

    // Limits above the buffer size are capped rather than rejected.
    let response = get(test.app, "/api/v1/import/logs?limit=100000").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn logs_with_zero_limit_is_bad_request() {
    let test = build_test_app();
    let response = get(test.app, "/api/v1/import/logs?limit=0").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "BAD_REQUEST");
}
