//! REST API の統合テスト（tower::ServiceExt + oneshot、インメモリ構成）

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use workloom_integration_server::adapter::handler::{self, AppState};
use workloom_integration_server::test_support::make_test_app_state;

fn app(state: &AppState) -> Router {
    handler::router(state.clone())
}

async fn send(
    state: &AppState,
    method: &str,
    uri: &str,
    user: Option<&str>,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&json).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app(state).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

fn linkedin_account_body() -> serde_json::Value {
    serde_json::json!({
        "name": "Recruiting",
        "credentials": {
            "provider": "LINKEDIN",
            "username": "alice@example.com",
            "password": "super-secret-password"
        }
    })
}

#[tokio::test]
async fn test_healthz_needs_no_user() {
    let state = make_test_app_state().unwrap();
    let (status, json) = send(&state, "GET", "/healthz", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");

    let (status, json) = send(&state, "GET", "/readyz", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["database"], "in-memory");
}

#[tokio::test]
async fn test_api_requires_user_header() {
    let state = make_test_app_state().unwrap();
    let (status, json) = send(&state, "GET", "/api/v1/accounts", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"]["code"], "WL_INTEGRATION_UNAUTHENTICATED");
}

#[tokio::test]
async fn test_create_account_hides_credentials() {
    let state = make_test_app_state().unwrap();
    let (status, json) = send(
        &state,
        "POST",
        "/api/v1/accounts",
        Some("alice"),
        Some(linkedin_account_body()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["account"]["provider"], "LINKEDIN");
    assert_eq!(json["account"]["status"], "ACTIVE");
    assert_eq!(json["connection_test"]["success"], true);
    assert!(!json.to_string().contains("super-secret-password"));

    let id = json["account"]["id"].as_str().unwrap().to_string();
    let (status, json) = send(&state, "GET", &format!("/api/v1/accounts/{id}"), Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["name"], "Recruiting");
    assert!(!json.to_string().contains("super-secret-password"));

    let (status, json) = send(&state, "GET", "/api/v1/accounts", Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["accounts"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_other_users_account_is_not_found() {
    let state = make_test_app_state().unwrap();
    let (_, json) = send(
        &state,
        "POST",
        "/api/v1/accounts",
        Some("alice"),
        Some(linkedin_account_body()),
    )
    .await;
    let id = json["account"]["id"].as_str().unwrap().to_string();

    let (status, json) = send(&state, "GET", &format!("/api/v1/accounts/{id}"), Some("mallory"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "WL_INTEGRATION_NOT_FOUND");

    let (status, _) = send(&state, "DELETE", &format!("/api/v1/accounts/{id}"), Some("mallory"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&state, "DELETE", &format!("/api/v1/accounts/{id}"), Some("alice"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_invalid_input_is_bad_request() {
    let state = make_test_app_state().unwrap();
    let mut body = linkedin_account_body();
    body["name"] = serde_json::json!("   ");
    let (status, json) = send(&state, "POST", "/api/v1/accounts", Some("alice"), Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "WL_INTEGRATION_VALIDATION_ERROR");

    let (status, _) = send(
        &state,
        "POST",
        "/api/v1/mappings",
        Some("alice"),
        Some(serde_json::json!({ "name": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_mapping_lifecycle_over_http() {
    let state = make_test_app_state().unwrap();
    let (status, json) = send(
        &state,
        "POST",
        "/api/v1/mappings",
        Some("alice"),
        Some(serde_json::json!({ "name": "Acme staff", "company": "Acme" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["status"], "CREATED");
    let id = json["id"].as_str().unwrap().to_string();

    // 発見用アカウントがないためランは実行できない
    let (status, json) = send(&state, "POST", &format!("/api/v1/mappings/{id}/run"), Some("alice"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"]["code"], "WL_INTEGRATION_ACCOUNT_UNAVAILABLE");

    let (status, json) = send(&state, "POST", &format!("/api/v1/mappings/{id}/pause"), Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "PAUSED");

    let (status, _) = send(&state, "GET", &format!("/api/v1/mappings/{id}"), Some("mallory"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
