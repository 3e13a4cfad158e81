use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::account_handler::AccountResponse;
use super::error::ApiError;
use super::AppState;
use crate::adapter::middleware::UserContext;
use crate::domain::entity::profile::DiscoveredRecord;
use crate::domain::entity::provider_config::ScrapingConfig;
use crate::domain::entity::scraping_job::{JobConfig, JobFilters, JobType, ScrapingJob};
use crate::infrastructure::connector::SearchPage;
use crate::usecase::linkedin_service::{LinkedInStatsView, SearchProfilesInput, SessionValidation};
use crate::usecase::scraping_job_scheduler::SubmitJobInput;

// --- Request / Response DTOs ---

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmitJobRequest {
    pub job_type: JobType,
    #[serde(default)]
    pub config: JobConfig,
}

#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<ScrapingJob>,
}

#[derive(Debug, Deserialize)]
pub struct ProfileQuery {
    pub url: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchProfilesRequest {
    pub query: String,
    #[serde(default)]
    pub filters: JobFilters,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub cursor: Option<String>,
}

// --- Handlers ---

pub async fn submit_job(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
    Json(req): Json<SubmitJobRequest>,
) -> Result<(StatusCode, Json<ScrapingJob>), ApiError> {
    let job = state
        .scheduler
        .submit(
            &user.user_id,
            id,
            SubmitJobInput {
                job_type: req.job_type,
                config: req.config,
            },
        )
        .await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

pub async fn list_jobs(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
) -> Result<Json<ListJobsResponse>, ApiError> {
    let jobs = state.scheduler.list(&user.user_id, id).await?;
    Ok(Json(ListJobsResponse { jobs }))
}

pub async fn get_job(
    State(state): State<AppState>,
    user: UserContext,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ScrapingJob>, ApiError> {
    Ok(Json(state.scheduler.get(&user.user_id, job_id).await?))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    user: UserContext,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ScrapingJob>, ApiError> {
    Ok(Json(state.scheduler.cancel(&user.user_id, job_id).await?))
}

pub async fn get_stats(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
) -> Result<Json<LinkedInStatsView>, ApiError> {
    Ok(Json(state.linkedin.get_stats(&user.user_id, id).await?))
}

pub async fn update_config(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
    Json(config): Json<ScrapingConfig>,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = state
        .linkedin
        .update_config(&user.user_id, id, config)
        .await?;
    Ok(Json(account.into()))
}

pub async fn validate_session(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionValidation>, ApiError> {
    Ok(Json(state.linkedin.validate_session(&user.user_id, id).await?))
}

pub async fn get_profile(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
    Query(query): Query<ProfileQuery>,
) -> Result<Json<DiscoveredRecord>, ApiError> {
    Ok(Json(
        state
            .linkedin
            .get_profile(&user.user_id, id, &query.url)
            .await?,
    ))
}

pub async fn search_profiles(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
    Json(req): Json<SearchProfilesRequest>,
) -> Result<Json<SearchPage>, ApiError> {
    let page = state
        .linkedin
        .search_profiles(
            &user.user_id,
            id,
            SearchProfilesInput {
                query: req.query,
                filters: req.filters,
                page_size: req.page_size,
                cursor: req.cursor,
            },
        )
        .await?;
    Ok(Json(page))
}
