use std::sync::Arc;

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use workloom_telemetry::metrics::Metrics;

/// metrics_middleware はリクエスト数とレイテンシをルートのパターン単位で記録する。
pub async fn metrics_middleware(
    State(metrics): State<Arc<Metrics>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().to_string();
    // パス全体だと ID ごとにラベルが増えるため、マッチしたルートパターンを使う
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_string(), |p| p.as_str().to_string());
    let started = tokio::time::Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16();
    let elapsed = started.elapsed().as_secs_f64();
    metrics.record_http_request(&method, &path, &status.to_string(), elapsed);
    tracing::debug!(
        http.method = %method,
        http.path = %path,
        http.status_code = status,
        duration_secs = elapsed,
        "request completed"
    );
    response
}
