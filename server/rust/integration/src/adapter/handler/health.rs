use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use super::AppState;

pub async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// readyz はデータベース接続が設定されている場合に疎通を確認する。
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let Some(pool) = &state.db_pool else {
        return (
            StatusCode::OK,
            Json(serde_json::json!({"status": "ready", "database": "in-memory"})),
        );
    };
    match sqlx::query("SELECT 1").execute(pool).await {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({"status": "ready", "database": "ok"})),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"status": "not_ready", "database": "unreachable"})),
            )
        }
    }
}
