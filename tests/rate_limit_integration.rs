//! Rate limiting end-to-end through the middleware chain

mod common;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::routing::get;
use fleetguard::rate_limit::RateLimitRule;
use serde_json::Value;
use tower::ServiceExt;

fn demo_routes() -> Router {
    Router::new().route("/x", get(|| async { "ok" }))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn request(path: &str, client_ip: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header("x-forwarded-for", client_ip)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn two_per_minute_allows_twice_then_rejects() {
    let mut config = common::memory_config();
    config.rate_limit.rules.push(RateLimitRule {
        route: "/x".to_string(),
        per_minute: 2,
        per_hour: 1000,
        per_day: None,
    });
    let state = common::build_state(config).await;
    let app = common::app(&state, Some(demo_routes()));

    let first = app.clone().oneshot(request("/x", "203.0.113.9")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.clone().oneshot(request("/x", "203.0.113.9")).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);

    let third = app.clone().oneshot(request("/x", "203.0.113.9")).await.unwrap();
    assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(third.headers().contains_key(header::RETRY_AFTER));

    let body = body_json(third).await;
    assert_eq!(body["error"]["code"], "rate_limit_exceeded");
    assert_eq!(body["error"]["minute_count"], 3);
}

#[tokio::test]
async fn clients_have_independent_budgets() {
    let mut config = common::memory_config();
    config.rate_limit.rules.push(RateLimitRule {
        route: "/x".to_string(),
        per_minute: 1,
        per_hour: 1000,
        per_day: None,
    });
    let state = common::build_state(config).await;
    let app = common::app(&state, Some(demo_routes()));

    let first = app.clone().oneshot(request("/x", "203.0.113.9")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let rejected = app.clone().oneshot(request("/x", "203.0.113.9")).await.unwrap();
    assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);

    // A different forwarded address is a different client.
    let other = app.clone().oneshot(request("/x", "203.0.113.77")).await.unwrap();
    assert_eq!(other.status(), StatusCode::OK);
}

#[tokio::test]
async fn unprotected_routes_are_not_limited() {
    let mut config = common::memory_config();
    config.rate_limit.rules.push(RateLimitRule {
        route: "/x".to_string(),
        per_minute: 1,
        per_hour: 1000,
        per_day: None,
    });
    let state = common::build_state(config).await;
    let app = common::app(&state, Some(demo_routes()));

    for _ in 0..5 {
        let response = app
            .clone()
            .oneshot(request("/health", "203.0.113.9"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn disabled_rate_limiting_always_allows() {
    let mut config = common::memory_config();
    config.rate_limit.enabled = false;
    config.rate_limit.rules.push(RateLimitRule {
        route: "/x".to_string(),
        per_minute: 1,
        per_hour: 1,
        per_day: None,
    });
    let state = common::build_state(config).await;
    let app = common::app(&state, Some(demo_routes()));

    for _ in 0..5 {
        let response = app.clone().oneshot(request("/x", "203.0.113.9")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
