//! Feature flag admin surface and request gating, end-to-end

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::routing::get;
use axum::{Router, middleware};
use fleetguard::http::middleware::{FlagGate, flag_gate_middleware};
use serde_json::{Value, json};
use tower::ServiceExt;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn put_flag(name: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::PUT)
        .uri(format!("/admin/flags/{name}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn admin_crud_lifecycle() {
    let state = common::build_state(common::memory_config()).await;
    let app = common::app(&state, None);

    // Create
    let created = app
        .clone()
        .oneshot(put_flag(
            "new-booking-flow",
            json!({"enabled": true, "default_value": false, "rules": [
                {"type": "environment", "environments": ["staging"]}
            ]}),
        ))
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let body = body_json(created).await;
    assert_eq!(body["name"], "new-booking-flow");
    assert_eq!(body["rules"][0]["type"], "environment");

    // List
    let listed = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/admin/flags")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(listed.status(), StatusCode::OK);
    let body = body_json(listed).await;
    assert_eq!(body["flags"].as_array().unwrap().len(), 1);

    // Update
    let updated = app
        .clone()
        .oneshot(put_flag(
            "new-booking-flow",
            json!({"enabled": false, "default_value": false, "rules": []}),
        ))
        .await
        .unwrap();
    assert_eq!(updated.status(), StatusCode::OK);
    let body = body_json(updated).await;
    assert_eq!(body["enabled"], false);

    // Delete
    let deleted = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::DELETE)
                .uri("/admin/flags/new-booking-flow")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    // Deleting again is a 404
    let missing = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::DELETE)
                .uri("/admin/flags/new-booking-flow")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn gated_route_is_404_until_flag_enables_it() {
    let state = common::build_state(common::memory_config()).await;

    let gated = Router::new()
        .route("/beta-reports", get(|| async { "beta" }))
        .route_layer(middleware::from_fn_with_state(
            FlagGate::new(Arc::clone(&state.flags), "beta-reports"),
            flag_gate_middleware,
        ));
    let app = common::app(&state, Some(gated));

    // No such flag: the surface stays invisible.
    let hidden = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/beta-reports")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(hidden.status(), StatusCode::NOT_FOUND);
    let body = body_json(hidden).await;
    assert_eq!(body["error"]["code"], "feature_unavailable");

    // Enable via the admin surface; same instance sees it immediately.
    let created = app
        .clone()
        .oneshot(put_flag(
            "beta-reports",
            json!({"enabled": true, "default_value": true, "rules": []}),
        ))
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);

    let visible = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/beta-reports")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(visible.status(), StatusCode::OK);
}

#[tokio::test]
async fn bootstrap_flags_are_visible_in_admin_list() {
    let mut config = common::memory_config();
    config.flags.bootstrap.push(fleetguard::config::FlagSeed {
        name: "dark-mode".to_string(),
        enabled: true,
        default_value: true,
        rules: vec![],
    });
    let state = common::build_state(config).await;
    let app = common::app(&state, None);

    let listed = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/admin/flags")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(listed).await;
    assert_eq!(body["flags"][0]["name"], "dark-mode");
}
