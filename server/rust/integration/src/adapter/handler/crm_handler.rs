use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ApiError;
use super::AppState;
use crate::adapter::middleware::UserContext;
use crate::domain::entity::account::Provider;
use crate::domain::entity::field_mapping::{FieldMapping, FieldMappingEntry};
use crate::domain::entity::sync_operation::SyncOperation;
use crate::infrastructure::connector::{
    FieldDescriptor, ImportFilters, ObjectDescriptor, WorkflowDescriptor,
};
use crate::usecase::sync_reconciler::{FieldMappingView, ImportPreview};

// --- Request / Response DTOs ---

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImportRequest {
    #[serde(default)]
    pub filters: ImportFilters,
    pub target_mapping_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PreviewImportRequest {
    #[serde(default)]
    pub filters: ImportFilters,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExportRequest {
    pub profile_ids: Vec<Uuid>,
    /// 指定するとこの操作に限りアカウントの対応表を置き換える。
    #[serde(default)]
    pub field_mapping: Option<FieldMapping>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileIdsRequest {
    pub profile_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateFieldMappingsRequest {
    pub fields: Vec<FieldMappingEntry>,
    #[serde(default)]
    pub match_field: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerWorkflowRequest {
    pub contact_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct OperationHistoryResponse {
    pub operations: Vec<SyncOperation>,
}

#[derive(Debug, Serialize)]
pub struct ObjectsResponse {
    pub objects: Vec<ObjectDescriptor>,
}

#[derive(Debug, Serialize)]
pub struct FieldsResponse {
    pub fields: Vec<FieldDescriptor>,
}

#[derive(Debug, Serialize)]
pub struct WorkflowsResponse {
    pub workflows: Vec<WorkflowDescriptor>,
}

async fn ensure_provider(
    state: &AppState,
    user_id: &str,
    id: Uuid,
    provider: Provider,
) -> Result<(), ApiError> {
    let account = state.accounts.get(user_id, id).await?;
    if account.provider != provider {
        return Err(ApiError::validation(format!(
            "operation is only available for {provider} accounts"
        )));
    }
    Ok(())
}

// --- Handlers ---

pub async fn import_data(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
    Json(req): Json<ImportRequest>,
) -> Result<Json<SyncOperation>, ApiError> {
    let op = state
        .sync
        .import_data(&user.user_id, id, req.filters, req.target_mapping_id)
        .await?;
    Ok(Json(op))
}

pub async fn preview_import(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
    Json(req): Json<PreviewImportRequest>,
) -> Result<Json<ImportPreview>, ApiError> {
    let preview = state
        .sync
        .preview_import(&user.user_id, id, req.filters, req.limit)
        .await?;
    Ok(Json(preview))
}

pub async fn export_data(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
    Json(req): Json<ExportRequest>,
) -> Result<Json<SyncOperation>, ApiError> {
    let op = state
        .sync
        .export_data(&user.user_id, id, &req.profile_ids, req.field_mapping)
        .await?;
    Ok(Json(op))
}

pub async fn get_field_mappings(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
) -> Result<Json<FieldMappingView>, ApiError> {
    Ok(Json(state.sync.get_field_mappings(&user.user_id, id).await?))
}

pub async fn update_field_mappings(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateFieldMappingsRequest>,
) -> Result<Json<FieldMappingView>, ApiError> {
    let view = state
        .sync
        .update_field_mappings(&user.user_id, id, req.fields, req.match_field)
        .await?;
    Ok(Json(view))
}

pub async fn get_operation_history(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
) -> Result<Json<OperationHistoryResponse>, ApiError> {
    let operations = state.sync.get_operation_history(&user.user_id, id).await?;
    Ok(Json(OperationHistoryResponse { operations }))
}

pub async fn list_objects(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
) -> Result<Json<ObjectsResponse>, ApiError> {
    let objects = state.sync.list_objects(&user.user_id, id).await?;
    Ok(Json(ObjectsResponse { objects }))
}

pub async fn list_object_fields(
    State(state): State<AppState>,
    user: UserContext,
    Path((id, object)): Path<(Uuid, String)>,
) -> Result<Json<FieldsResponse>, ApiError> {
    let fields = state
        .sync
        .list_fields(&user.user_id, id, Provider::Salesforce, &object)
        .await?;
    Ok(Json(FieldsResponse { fields }))
}

pub async fn sync_records(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
    Json(req): Json<ProfileIdsRequest>,
) -> Result<Json<SyncOperation>, ApiError> {
    ensure_provider(&state, &user.user_id, id, Provider::Salesforce).await?;
    let op = state
        .sync
        .export_data(&user.user_id, id, &req.profile_ids, None)
        .await?;
    Ok(Json(op))
}

pub async fn list_properties(
    State(state): State<AppState>,
    user: UserContext,
    Path((id, object_type)): Path<(Uuid, String)>,
) -> Result<Json<FieldsResponse>, ApiError> {
    let fields = state
        .sync
        .list_fields(&user.user_id, id, Provider::Hubspot, &object_type)
        .await?;
    Ok(Json(FieldsResponse { fields }))
}

pub async fn list_workflows(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkflowsResponse>, ApiError> {
    let workflows = state.sync.list_workflows(&user.user_id, id).await?;
    Ok(Json(WorkflowsResponse { workflows }))
}

pub async fn trigger_workflow(
    State(state): State<AppState>,
    user: UserContext,
    Path((id, workflow_id)): Path<(Uuid, String)>,
    Json(req): Json<TriggerWorkflowRequest>,
) -> Result<Json<SyncOperation>, ApiError> {
    let op = state
        .sync
        .trigger_workflow(&user.user_id, id, &workflow_id, &req.contact_ids)
        .await?;
    Ok(Json(op))
}

pub async fn create_contacts(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
    Json(req): Json<ProfileIdsRequest>,
) -> Result<Json<SyncOperation>, ApiError> {
    ensure_provider(&state, &user.user_id, id, Provider::Hubspot).await?;
    let op = state
        .sync
        .export_data(&user.user_id, id, &req.profile_ids, None)
        .await?;
    Ok(Json(op))
}
