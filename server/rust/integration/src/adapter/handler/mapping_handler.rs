use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ApiError;
use super::AppState;
use crate::adapter::middleware::UserContext;
use crate::domain::entity::mapping::{Mapping, SearchCriteria};
use crate::domain::entity::mapping_run::{MappingRun, RunCounts, RunStatus};
use crate::infrastructure::export_writer::ExportFormat;
use crate::usecase::mapping_service::{
    CreateMappingInput, MappingDetail, ProfilePage, UpdateMappingInput,
};

// --- Request / Response DTOs ---

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateMappingRequest {
    pub name: String,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateMappingRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub criteria: Option<SearchCriteria>,
}

#[derive(Debug, Serialize)]
pub struct ListMappingsResponse {
    pub mappings: Vec<Mapping>,
}

#[derive(Debug, Serialize)]
pub struct ListRunsResponse {
    pub runs: Vec<MappingRun>,
}

/// RunResponse は手動実行の結果。差分件数をトップレベルに展開して返す。
#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub run_id: Uuid,
    pub status: RunStatus,
    #[serde(flatten)]
    pub counts: RunCounts,
    pub error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProfilesQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    #[serde(default = "default_export_format")]
    pub format: ExportFormat,
}

fn default_export_format() -> ExportFormat {
    ExportFormat::Xlsx
}

// --- Handlers ---

pub async fn create_mapping(
    State(state): State<AppState>,
    user: UserContext,
    Json(req): Json<CreateMappingRequest>,
) -> Result<(StatusCode, Json<Mapping>), ApiError> {
    let mapping = state
        .mappings
        .create(
            &user.user_id,
            CreateMappingInput {
                name: req.name,
                criteria: SearchCriteria {
                    job_title: req.job_title,
                    company: req.company,
                    country: req.country,
                },
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(mapping)))
}

pub async fn list_mappings(
    State(state): State<AppState>,
    user: UserContext,
) -> Result<Json<ListMappingsResponse>, ApiError> {
    let mappings = state.mappings.list(&user.user_id).await?;
    Ok(Json(ListMappingsResponse { mappings }))
}

pub async fn get_mapping(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
) -> Result<Json<MappingDetail>, ApiError> {
    Ok(Json(state.mappings.get(&user.user_id, id).await?))
}

pub async fn update_mapping(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateMappingRequest>,
) -> Result<Json<Mapping>, ApiError> {
    let mapping = state
        .mappings
        .update(
            &user.user_id,
            id,
            UpdateMappingInput {
                name: req.name,
                criteria: req.criteria,
            },
        )
        .await?;
    Ok(Json(mapping))
}

pub async fn delete_mapping(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.mappings.delete(&user.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// run_mapping はランを同期的に実行し、差分件数を返す。
pub async fn run_mapping(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
) -> Result<Json<RunResponse>, ApiError> {
    let run = state.runs.run(&user.user_id, id).await?;
    Ok(Json(RunResponse {
        run_id: run.id,
        status: run.status,
        counts: run.counts,
        error_message: run.error_message,
    }))
}

pub async fn pause_mapping(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Mapping>, ApiError> {
    Ok(Json(state.mappings.pause(&user.user_id, id).await?))
}

pub async fn resume_mapping(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Mapping>, ApiError> {
    Ok(Json(state.mappings.resume(&user.user_id, id).await?))
}

pub async fn list_profiles(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
    Query(query): Query<ProfilesQuery>,
) -> Result<Json<ProfilePage>, ApiError> {
    let page = state
        .mappings
        .list_profiles(&user.user_id, id, query.limit, query.offset)
        .await?;
    Ok(Json(page))
}

pub async fn list_runs(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
) -> Result<Json<ListRunsResponse>, ApiError> {
    let runs = state.mappings.list_runs(&user.user_id, id).await?;
    Ok(Json(ListRunsResponse { runs }))
}

/// export_mapping はプロフィール一覧をダウンロード可能なファイルとして返す。
pub async fn export_mapping(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let artifact = state
        .mappings
        .export(&user.user_id, id, query.format)
        .await?;
    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        artifact.file_name
    ))
    .map_err(|e| ApiError(crate::domain::error::IntegrationError::Internal(e.to_string())))?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(artifact.content_type)),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        artifact.bytes,
    )
        .into_response())
}
