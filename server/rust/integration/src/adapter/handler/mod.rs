pub mod account_handler;
pub mod crm_handler;
pub mod error;
pub mod health;
pub mod linkedin_handler;
pub mod mapping_handler;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use workloom_telemetry::metrics::Metrics;

use crate::adapter::middleware::{auth_middleware, metrics_middleware};
use crate::usecase::{
    AccountRegistry, ConnectionValidator, LinkedInService, MappingRunEngine, MappingService,
    ScrapingJobScheduler, SyncReconciler,
};

/// AppState はアプリケーション全体の共有状態を表す。
#[derive(Clone)]
pub struct AppState {
    pub accounts: Arc<AccountRegistry>,
    pub validator: Arc<ConnectionValidator>,
    pub scheduler: Arc<ScrapingJobScheduler>,
    pub linkedin: Arc<LinkedInService>,
    pub sync: Arc<SyncReconciler>,
    pub mappings: Arc<MappingService>,
    pub runs: Arc<MappingRunEngine>,
    pub metrics: Arc<Metrics>,
    pub db_pool: Option<sqlx::PgPool>,
}

/// リクエストボディの上限（書き出し対象の ID 一覧や取り込みフィルタに十分な大きさ）。
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// REST API ルーターを構築する。
pub fn router(state: AppState) -> Router {
    // 認証不要のエンドポイント
    let public_routes = Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/metrics", get(metrics_handler));

    let api_routes = Router::new()
        // Accounts
        .route(
            "/api/v1/accounts",
            post(account_handler::create_account).get(account_handler::list_accounts),
        )
        .route(
            "/api/v1/accounts/{id}",
            get(account_handler::get_account)
                .put(account_handler::update_account)
                .delete(account_handler::delete_account),
        )
        .route("/api/v1/accounts/{id}/toggle", post(account_handler::toggle_account))
        .route("/api/v1/accounts/{id}/test", post(account_handler::test_account))
        // LinkedIn
        .route(
            "/api/v1/linkedin/{id}/jobs",
            post(linkedin_handler::submit_job).get(linkedin_handler::list_jobs),
        )
        .route("/api/v1/linkedin/jobs/{job_id}", get(linkedin_handler::get_job))
        .route(
            "/api/v1/linkedin/jobs/{job_id}/cancel",
            post(linkedin_handler::cancel_job),
        )
        .route("/api/v1/linkedin/{id}/stats", get(linkedin_handler::get_stats))
        .route(
            "/api/v1/linkedin/{id}/config",
            axum::routing::put(linkedin_handler::update_config),
        )
        .route(
            "/api/v1/linkedin/{id}/validate-session",
            post(linkedin_handler::validate_session),
        )
        .route("/api/v1/linkedin/{id}/profile", get(linkedin_handler::get_profile))
        .route("/api/v1/linkedin/{id}/search", post(linkedin_handler::search_profiles))
        // CRM common
        .route("/api/v1/crm/{id}/import", post(crm_handler::import_data))
        .route("/api/v1/crm/{id}/import/preview", post(crm_handler::preview_import))
        .route("/api/v1/crm/{id}/export", post(crm_handler::export_data))
        .route(
            "/api/v1/crm/{id}/field-mappings",
            get(crm_handler::get_field_mappings).put(crm_handler::update_field_mappings),
        )
        .route("/api/v1/crm/{id}/operations", get(crm_handler::get_operation_history))
        // Salesforce
        .route("/api/v1/salesforce/{id}/objects", get(crm_handler::list_objects))
        .route(
            "/api/v1/salesforce/{id}/objects/{object}/fields",
            get(crm_handler::list_object_fields),
        )
        .route("/api/v1/salesforce/{id}/sync", post(crm_handler::sync_records))
        // HubSpot
        .route(
            "/api/v1/hubspot/{id}/properties/{object_type}",
            get(crm_handler::list_properties),
        )
        .route("/api/v1/hubspot/{id}/workflows", get(crm_handler::list_workflows))
        .route(
            "/api/v1/hubspot/{id}/workflows/{workflow_id}/trigger",
            post(crm_handler::trigger_workflow),
        )
        .route("/api/v1/hubspot/{id}/contacts", post(crm_handler::create_contacts))
        // Mappings
        .route(
            "/api/v1/mappings",
            post(mapping_handler::create_mapping).get(mapping_handler::list_mappings),
        )
        .route(
            "/api/v1/mappings/{id}",
            get(mapping_handler::get_mapping)
                .put(mapping_handler::update_mapping)
                .delete(mapping_handler::delete_mapping),
        )
        .route("/api/v1/mappings/{id}/run", post(mapping_handler::run_mapping))
        .route("/api/v1/mappings/{id}/pause", post(mapping_handler::pause_mapping))
        .route("/api/v1/mappings/{id}/resume", post(mapping_handler::resume_mapping))
        .route("/api/v1/mappings/{id}/profiles", get(mapping_handler::list_profiles))
        .route("/api/v1/mappings/{id}/runs", get(mapping_handler::list_runs))
        .route("/api/v1/mappings/{id}/export", get(mapping_handler::export_mapping))
        .layer(axum::middleware::from_fn(auth_middleware));

    let metrics = state.metrics.clone();
    public_routes
        .merge(api_routes)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(axum::middleware::from_fn_with_state(metrics, metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = state.metrics.gather_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// ErrorResponse は統一エラーレスポンス。
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, serde::Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub request_id: String,
    pub details: Vec<String>,
}

impl ErrorResponse {
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            error: ErrorBody {
                code: code.to_string(),
                message: message.to_string(),
                request_id: uuid::Uuid::new_v4().to_string(),
                details: vec![],
            },
        }
    }
}
