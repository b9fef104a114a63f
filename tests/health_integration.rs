//! Health and readiness endpoints, end-to-end

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use fleetguard::Result;
use fleetguard::resilience::DependencyKey;
use serde_json::Value;
use tower::ServiceExt;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_healthy_with_no_failures() {
    let mut config = common::memory_config();
    config.service.name = "appointments".to_string();
    let state = common::build_state(config).await;
    state
        .resilience
        .register(&DependencyKey::new("billing", "charge"));
    let app = common::app(&state, None);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "appointments");
    assert!(body["version"].is_string());
    assert_eq!(body["checks"][0]["dependency"], "billing/charge");
    assert_eq!(body["checks"][0]["circuit_state"], "closed");
}

#[tokio::test]
async fn open_circuit_turns_health_unhealthy() {
    let mut config = common::memory_config();
    config.resilience.circuit_breaker.failure_threshold = 2;
    config.resilience.retry.enabled = false;
    let state = common::build_state(config).await;
    let app = common::app(&state, None);

    let key = DependencyKey::new("billing", "charge");
    for _ in 0..2 {
        let _: Result<()> = state
            .resilience
            .call(&key, || async {
                Err(fleetguard::Error::Upstream {
                    dependency: "billing/charge".to_string(),
                    status: 502,
                })
            })
            .await;
    }

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["checks"][0]["circuit_state"], "open");
}

#[tokio::test]
async fn ready_lists_store_and_dependencies() {
    let state = common::build_state(common::memory_config()).await;
    state
        .resilience
        .register(&DependencyKey::new("llm", "completion"));
    let app = common::app(&state, None);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["dependencies"]["counter_store"], "ready");
    assert_eq!(body["dependencies"]["llm/completion"], "ready");
}

#[tokio::test]
async fn open_circuit_marks_dependency_not_ready() {
    let mut config = common::memory_config();
    config.resilience.circuit_breaker.failure_threshold = 1;
    config.resilience.retry.enabled = false;
    let state = common::build_state(config).await;
    let app = common::app(&state, None);

    let key = DependencyKey::new("billing", "charge");
    let _: Result<()> = state
        .resilience
        .call(&key, || async {
            Err(fleetguard::Error::Upstream {
                dependency: "billing/charge".to_string(),
                status: 502,
            })
        })
        .await;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();

    // Readiness itself holds (the store is fine), but the dependency shows.
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["dependencies"]["billing/charge"], "not ready");
}
