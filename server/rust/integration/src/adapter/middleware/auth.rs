use axum::{
    body::Body,
    extract::{FromRequestParts, Request},
    http::{request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use crate::adapter::handler::ErrorResponse;

/// 上流ゲートウェイが検証済みのユーザー ID を載せるヘッダー。
pub const USER_ID_HEADER: &str = "x-user-id";

/// UserContext は認証済みユーザーの識別子。リクエストエクステンションに格納される。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    pub user_id: String,
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse::new("WL_INTEGRATION_UNAUTHENTICATED", message)),
    )
        .into_response()
}

/// auth_middleware は x-user-id ヘッダーから UserContext を組み立てる。
/// 認証自体は上流で済んでいる前提で、ヘッダーがなければ 401 を返す。
pub async fn auth_middleware(mut req: Request<Body>, next: Next) -> Response {
    let Some(user_id) = extract_user_id(&req) else {
        return unauthorized("x-user-id header is required");
    };
    req.extensions_mut().insert(UserContext { user_id });
    next.run(req).await
}

fn extract_user_id(req: &Request<Body>) -> Option<String> {
    let value = req.headers().get(USER_ID_HEADER)?.to_str().ok()?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

impl<S: Send + Sync> FromRequestParts<S> for UserContext {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<UserContext>()
            .cloned()
            .ok_or_else(|| unauthorized("request is not authenticated"))
    }
}
