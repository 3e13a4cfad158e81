use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ApiError;
use super::AppState;
use crate::adapter::middleware::UserContext;
use crate::domain::entity::account::{Account, AccountStatus, Provider};
use crate::domain::entity::credentials::CredentialBundle;
use crate::domain::entity::provider_config::{ProviderConfig, ProviderStats};
use crate::usecase::account_registry::{CreateAccountInput, UpdateAccountInput};
use crate::usecase::connection_validator::ConnectionTestResult;

// --- Request / Response DTOs ---

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateAccountRequest {
    pub name: String,
    pub credentials: CredentialBundle,
    #[serde(default)]
    pub config: Option<ProviderConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateAccountRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub credentials: Option<CredentialBundle>,
    #[serde(default)]
    pub config: Option<ProviderConfig>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// AccountResponse はアカウントの読み取りビュー。認証情報は含めず、非機密の識別子のみ返す。
#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub id: Uuid,
    pub provider: Provider,
    pub name: String,
    pub username: Option<String>,
    pub is_active: bool,
    pub status: AccountStatus,
    pub last_used_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub config: ProviderConfig,
    pub stats: ProviderStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Account> for AccountResponse {
    fn from(a: Account) -> Self {
        Self {
            id: a.id,
            provider: a.provider,
            name: a.name,
            username: a.credential_hint,
            is_active: a.is_active,
            status: a.status,
            last_used_at: a.last_used_at,
            error_message: a.error_message,
            config: a.config,
            stats: a.stats,
            created_at: a.created_at,
            updated_at: a.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreateAccountResponse {
    pub account: AccountResponse,
    pub connection_test: ConnectionTestResult,
}

#[derive(Debug, Serialize)]
pub struct ListAccountsResponse {
    pub accounts: Vec<AccountResponse>,
}

// --- Handlers ---

/// create_account はアカウントを登録し、続けて接続検証を行う。
/// 検証結果により ACTIVE または ERROR の状態で返る。
pub async fn create_account(
    State(state): State<AppState>,
    user: UserContext,
    Json(req): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<CreateAccountResponse>), ApiError> {
    let account = state
        .accounts
        .create(
            &user.user_id,
            CreateAccountInput {
                name: req.name,
                credentials: req.credentials,
                config: req.config,
            },
        )
        .await?;
    let connection_test = state.validator.probe(account.clone()).await?;
    let account = state.accounts.reload(account.id).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateAccountResponse {
            account: account.into(),
            connection_test,
        }),
    ))
}

pub async fn list_accounts(
    State(state): State<AppState>,
    user: UserContext,
) -> Result<Json<ListAccountsResponse>, ApiError> {
    let accounts = state.accounts.list(&user.user_id).await?;
    Ok(Json(ListAccountsResponse {
        accounts: accounts.into_iter().map(Into::into).collect(),
    }))
}

pub async fn get_account(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = state.accounts.get(&user.user_id, id).await?;
    Ok(Json(account.into()))
}

pub async fn update_account(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateAccountRequest>,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = state
        .accounts
        .update(
            &user.user_id,
            id,
            UpdateAccountInput {
                name: req.name,
                credentials: req.credentials,
                config: req.config,
                is_active: req.is_active,
            },
        )
        .await?;
    Ok(Json(account.into()))
}

pub async fn delete_account(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.accounts.delete(&user.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn toggle_account(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = state.accounts.toggle(&user.user_id, id).await?;
    Ok(Json(account.into()))
}

pub async fn test_account(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
) -> Result<Json<ConnectionTestResult>, ApiError> {
    Ok(Json(state.validator.test(&user.user_id, id).await?))
}
