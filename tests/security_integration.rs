//! Security filter end-to-end through the middleware chain

mod common;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use axum::response::Html;
use axum::routing::get;
use serde_json::Value;
use tower::ServiceExt;

fn demo_routes() -> Router {
    Router::new()
        .route("/x", get(|| async { "ok" }))
        .route("/docs", get(|| async { Html("<html>docs</html>") }))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn sql_injection_in_query_rejected() {
    let state = common::build_state(common::memory_config()).await;
    let app = common::app(&state, Some(demo_routes()));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/x?q=1%20OR%201%3D1")
                .header("x-forwarded-for", "203.0.113.9")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "security_violation");
    assert_eq!(body["error"]["violation"], "sql_injection");
}

#[tokio::test]
async fn xss_in_body_rejected() {
    let state = common::build_state(common::memory_config()).await;
    let app = common::app(&state, Some(demo_routes()));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::PUT)
                .uri("/admin/flags/beta")
                .header("content-type", "application/json")
                .header("x-forwarded-for", "203.0.113.9")
                .body(Body::from(
                    "{\"enabled\": true, \"note\": \"<script>alert(1)</script>\"}",
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["violation"], "xss");
}

#[tokio::test]
async fn spoofing_header_rejected() {
    let state = common::build_state(common::memory_config()).await;
    let app = common::app(&state, Some(demo_routes()));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/x")
                .header("x-original-url", "/admin/flags")
                .header("x-forwarded-for", "203.0.113.9")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["violation"], "spoofed_header");
}

#[tokio::test]
async fn forbidden_origin_rejected() {
    let mut config = common::memory_config();
    config.security.allowed_origins = vec!["*.example.com".to_string()];
    let state = common::build_state(config).await;
    let app = common::app(&state, Some(demo_routes()));

    let allowed = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/x")
                .header("origin", "https://app.example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);

    let rejected = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/x")
                .header("origin", "https://evil.io")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn method_outside_allow_list_rejected() {
    let mut config = common::memory_config();
    config.security.allowed_methods = vec!["GET".to_string()];
    let state = common::build_state(config).await;
    let app = common::app(&state, Some(demo_routes()));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/x")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["violation"], "method_not_allowed");
}

#[tokio::test]
async fn repeated_violations_escalate_to_429() {
    let state = common::build_state(common::memory_config()).await;
    let app = common::app(&state, Some(demo_routes()));

    // Budget is 5 per 60s window; the sixth probe gets throttled.
    for _ in 0..5 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/x?q=%3Cscript%3Ealert(1)%3C/script%3E")
                    .header("x-forwarded-for", "203.0.113.9")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    let throttled = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/x?q=%3Cscript%3Ealert(1)%3C/script%3E")
                .header("x-forwarded-for", "203.0.113.9")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(throttled.status(), StatusCode::TOO_MANY_REQUESTS);

    // Another client still gets plain 400s.
    let other = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/x?q=%3Cscript%3Ealert(1)%3C/script%3E")
                .header("x-forwarded-for", "203.0.113.200")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(other.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn clean_responses_carry_security_headers() {
    let state = common::build_state(common::memory_config()).await;
    let app = common::app(&state, Some(demo_routes()));

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/x").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::X_FRAME_OPTIONS], "DENY");
    assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    assert!(headers.contains_key(header::STRICT_TRANSPORT_SECURITY));
    assert!(headers.contains_key("permissions-policy"));
    assert!(
        headers[header::CONTENT_SECURITY_POLICY]
            .to_str()
            .unwrap()
            .contains("default-src 'none'")
    );
}

#[tokio::test]
async fn docs_routes_get_relaxed_csp() {
    let state = common::build_state(common::memory_config()).await;
    let app = common::app(&state, Some(demo_routes()));

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/docs").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let csp = response.headers()[header::CONTENT_SECURITY_POLICY]
        .to_str()
        .unwrap();
    assert!(csp.contains("'unsafe-inline'"));
    assert_eq!(response.headers()[header::X_FRAME_OPTIONS], "DENY");
}

#[tokio::test]
async fn rejections_also_carry_security_headers() {
    let state = common::build_state(common::memory_config()).await;
    let app = common::app(&state, Some(demo_routes()));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/x?q=1%20OR%201%3D1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.headers()[header::X_FRAME_OPTIONS], "DENY");
}
