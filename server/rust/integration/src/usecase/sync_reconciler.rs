use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;
use workloom_telemetry::metrics::Metrics;

use crate::domain::entity::account::{Account, Provider};
use crate::domain::entity::field_mapping::{
    non_destructive_patch, FieldMapping, FieldMappingEntry, ProfileField, TargetRecord,
};
use crate::domain::entity::profile::Profile;
use crate::domain::entity::provider_config::{CrmSettings, DuplicateHandling};
use crate::domain::entity::sync_operation::{SyncDirection, SyncOperation, SyncTally};
use crate::domain::error::IntegrationError;
use crate::domain::repository::{MappingRepository, ProfileRepository, SyncOperationRepository};
use crate::infrastructure::account_guard::AccountWorkGuard;
use crate::infrastructure::clock::Clock;
use crate::infrastructure::connector::{
    CallPolicy, ConnectionContext, ConnectorError, ConnectorRegistry, CrmRecord, FetchQuery,
    FieldDescriptor, ImportFilters, ObjectDescriptor, ProviderConnector, PushCommand,
    WorkflowDescriptor,
};
use crate::usecase::account_registry::AccountRegistry;

pub const DEFAULT_PREVIEW_LIMIT: u32 = 10;
pub const MAX_PREVIEW_LIMIT: u32 = 100;

#[derive(Debug, Clone, Serialize)]
pub struct ImportPreview {
    pub records: Vec<CrmRecord>,
    pub total_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldMappingView {
    pub available: Vec<ProfileField>,
    pub current: Vec<FieldMappingEntry>,
    pub match_field: String,
}

/// SyncReconciler は内部のプロフィールと CRM オブジェクトの取り込み/書き出しを行う。
///
/// レコード単位の失敗はバッチを中断せず SyncOperation.errors に記録する。
/// 同一アカウントで同時に実行できる同期は 1 件のみ（スクレイピングジョブと共有の受付チェック）。
pub struct SyncReconciler {
    registry: Arc<AccountRegistry>,
    mapping_repo: Arc<dyn MappingRepository>,
    profile_repo: Arc<dyn ProfileRepository>,
    sync_repo: Arc<dyn SyncOperationRepository>,
    connectors: ConnectorRegistry,
    guard: Arc<AccountWorkGuard>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    policy: CallPolicy,
}

/// CrmSession は接続済みの CRM アカウント。
struct CrmSession {
    account: Account,
    ctx: ConnectionContext,
    connector: Arc<dyn ProviderConnector>,
    settings: CrmSettings,
}

impl CrmSession {
    fn object(&self) -> Result<String, IntegrationError> {
        self.settings.export_object.clone().ok_or_else(|| {
            IntegrationError::validation(format!(
                "no {} object is enabled for synchronization",
                self.account.provider
            ))
        })
    }
}

impl SyncReconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<AccountRegistry>,
        mapping_repo: Arc<dyn MappingRepository>,
        profile_repo: Arc<dyn ProfileRepository>,
        sync_repo: Arc<dyn SyncOperationRepository>,
        connectors: ConnectorRegistry,
        guard: Arc<AccountWorkGuard>,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
        policy: CallPolicy,
    ) -> Self {
        Self {
            registry,
            mapping_repo,
            profile_repo,
            sync_repo,
            connectors,
            guard,
            clock,
            metrics,
            policy,
        }
    }

    async fn crm_account(&self, user_id: &str, account_id: Uuid) -> Result<Account, IntegrationError> {
        let account = self.registry.get(user_id, account_id).await?;
        if !account.provider.is_crm() {
            return Err(IntegrationError::validation(format!(
                "{} accounts do not support CRM synchronization",
                account.provider
            )));
        }
        Ok(account)
    }

    async fn session(&self, user_id: &str, account_id: Uuid) -> Result<CrmSession, IntegrationError> {
        let account = self.crm_account(user_id, account_id).await?;
        if !account.is_schedulable() {
            return Err(IntegrationError::AccountUnavailable(format!(
                "account {} is not available (status {}, active {})",
                account.id, account.status, account.is_active
            )));
        }
        let ctx = self.registry.open_context(&account)?;
        let connector = self.connectors.get(account.provider)?;
        let settings = account
            .config
            .crm_settings()
            .ok_or_else(|| IntegrationError::Internal("CRM account without CRM settings".into()))?;
        Ok(CrmSession {
            account,
            ctx,
            connector,
            settings,
        })
    }

    async fn session_for(
        &self,
        user_id: &str,
        account_id: Uuid,
        provider: Provider,
    ) -> Result<CrmSession, IntegrationError> {
        let session = self.session(user_id, account_id).await?;
        if session.account.provider != provider {
            return Err(IntegrationError::validation(format!(
                "operation is only available for {provider} accounts"
            )));
        }
        Ok(session)
    }

    /// export_data はプロフィールを CRM に書き出す。field_mapping を指定するとこの操作に限り
    /// アカウントの対応表を置き換える。
    pub async fn export_data(
        &self,
        user_id: &str,
        account_id: Uuid,
        profile_ids: &[Uuid],
        field_mapping: Option<FieldMapping>,
    ) -> Result<SyncOperation, IntegrationError> {
        if profile_ids.is_empty() {
            return Err(IntegrationError::validation("profile_ids must not be empty"));
        }
        let session = self.session(user_id, account_id).await?;
        let mapping = match field_mapping {
            Some(m) => {
                m.validate()?;
                m
            }
            None => session.settings.field_mapping.clone(),
        };
        let object = session.object()?;
        let _permit = self.guard.try_acquire(session.account.id, "a sync operation")?;

        let profiles = self.owned_profiles(user_id, profile_ids).await?;
        let mut tally = SyncTally::new();
        for id in profile_ids {
            match profiles.get(id) {
                Some(profile) => {
                    self.export_one(&session, &mapping, &object, profile, &mut tally)
                        .await;
                }
                None => tally.failure(Some(id.to_string()), "profile not found"),
            }
        }

        self.record(&session.account, SyncDirection::Export, tally).await
    }

    async fn export_one(
        &self,
        session: &CrmSession,
        mapping: &FieldMapping,
        object: &str,
        profile: &Profile,
        tally: &mut SyncTally,
    ) {
        let record_id = Some(profile.id.to_string());
        let resolved = match mapping.resolve(profile) {
            Ok(r) => r,
            Err(msg) => {
                tally.failure(record_id, msg);
                return;
            }
        };

        let result = match session.settings.duplicate_handling {
            DuplicateHandling::CreateNew => self.create(session, object, resolved).await.map(|()| true),
            policy => {
                let Some(query) =
                    existing_query(session.account.provider, mapping, object, profile, &resolved)
                else {
                    tally.failure(
                        record_id,
                        format!("match field {} is empty", mapping.match_field),
                    );
                    return;
                };
                match self.find_existing(session, query).await {
                    Ok(Some(existing)) if policy == DuplicateHandling::Skip => {
                        tracing::debug!(profile_id = %profile.id, crm_id = %existing.id, "existing record skipped");
                        Ok(false)
                    }
                    Ok(Some(existing)) => {
                        let patch = non_destructive_patch(&resolved, &existing.fields);
                        if patch.is_empty() {
                            Ok(true)
                        } else {
                            self.push(
                                session,
                                PushCommand::Update {
                                    object: object.to_string(),
                                    id: existing.id,
                                    fields: patch,
                                },
                            )
                            .await
                            .map(|()| true)
                        }
                    }
                    Ok(None) => self.create(session, object, resolved).await.map(|()| true),
                    Err(e) => Err(e),
                }
            }
        };

        match result {
            Ok(true) => tally.success(),
            Ok(false) => tally.skip(),
            Err(e) => {
                tracing::debug!(profile_id = %profile.id, error = %e, "export of record failed");
                tally.failure(record_id, e.to_string());
            }
        }
    }

    async fn find_existing(
        &self,
        session: &CrmSession,
        query: FetchQuery,
    ) -> Result<Option<CrmRecord>, ConnectorError> {
        self.policy
            .run(|| session.connector.fetch(&session.ctx, query.clone()))
            .await?
            .into_record()
    }

    async fn create(
        &self,
        session: &CrmSession,
        object: &str,
        fields: TargetRecord,
    ) -> Result<(), ConnectorError> {
        self.push(
            session,
            PushCommand::Create {
                object: object.to_string(),
                fields,
            },
        )
        .await
    }

    async fn push(&self, session: &CrmSession, command: PushCommand) -> Result<(), ConnectorError> {
        self.policy
            .run(|| session.connector.push(&session.ctx, command.clone()))
            .await
            .map(|_| ())
    }

    /// owned_profiles はユーザーが所有するマッピングのプロフィールだけを ID で引く。
    async fn owned_profiles(
        &self,
        user_id: &str,
        ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Profile>, IntegrationError> {
        let owned: HashSet<Uuid> = self
            .mapping_repo
            .list_by_user(user_id)
            .await?
            .into_iter()
            .map(|m| m.id)
            .collect();
        Ok(self
            .profile_repo
            .find_by_ids(ids)
            .await?
            .into_iter()
            .filter(|p| owned.contains(&p.mapping_id))
            .map(|p| (p.id, p))
            .collect())
    }

    /// import_data は CRM レコードを取り込み、対象マッピングのプロフィールとして保存する。
    /// 外部 ID は `<provider>:<CRM レコード ID>`。
    pub async fn import_data(
        &self,
        user_id: &str,
        account_id: Uuid,
        filters: ImportFilters,
        target_mapping_id: Uuid,
    ) -> Result<SyncOperation, IntegrationError> {
        let target = self
            .mapping_repo
            .find_by_id(target_mapping_id)
            .await?
            .filter(|m| m.user_id == user_id)
            .ok_or_else(|| IntegrationError::not_found("mapping", target_mapping_id))?;
        let session = self.session(user_id, account_id).await?;
        let object = session.object()?;
        let _permit = self.guard.try_acquire(session.account.id, "a sync operation")?;

        let query = FetchQuery::Records {
            object,
            filters,
            limit: None,
        };
        let records = match self
            .policy
            .run(|| session.connector.fetch(&session.ctx, query.clone()))
            .await
            .and_then(|r| r.into_records())
        {
            Ok(records) => records,
            Err(e) => {
                let e = IntegrationError::from(e);
                self.registry
                    .record_connector_failure(session.account.id, &e.to_string())
                    .await?;
                return self
                    .record_aborted(&session.account, SyncDirection::Import, e.to_string())
                    .await;
            }
        };

        let now = self.clock.now();
        let prefix = external_prefix(session.account.provider);
        let mut existing: HashMap<String, Profile> = self
            .profile_repo
            .list_by_mapping(target.id)
            .await?
            .into_iter()
            .map(|p| (p.external_id.clone(), p))
            .collect();

        let mut tally = SyncTally::new();
        let mut upserts = Vec::new();
        for record in records {
            let external_id = format!("{prefix}{}", record.id);
            let Some(mut observed) = session
                .settings
                .field_mapping
                .reverse(external_id.clone(), &record.fields)
            else {
                tally.failure(Some(record.id), "record has no name fields");
                continue;
            };
            match existing.remove(&external_id) {
                Some(mut profile) => {
                    if observed.image_url.is_none() {
                        observed.image_url.clone_from(&profile.image_url);
                    }
                    if profile.is_active() && !profile.has_changes(&observed) {
                        tally.skip();
                        continue;
                    }
                    profile.observe(observed, now);
                    upserts.push(profile);
                }
                None => upserts.push(Profile::from_record(target.id, observed, now)),
            }
            tally.success();
        }
        if !upserts.is_empty() {
            self.profile_repo.upsert_many(&upserts).await?;
        }

        self.record(&session.account, SyncDirection::Import, tally).await
    }

    pub async fn preview_import(
        &self,
        user_id: &str,
        account_id: Uuid,
        filters: ImportFilters,
        limit: Option<u32>,
    ) -> Result<ImportPreview, IntegrationError> {
        let limit = limit.unwrap_or(DEFAULT_PREVIEW_LIMIT);
        if !(1..=MAX_PREVIEW_LIMIT).contains(&limit) {
            return Err(IntegrationError::validation(format!(
                "limit must be between 1 and {MAX_PREVIEW_LIMIT}"
            )));
        }
        let session = self.session(user_id, account_id).await?;
        let query = FetchQuery::Records {
            object: session.object()?,
            filters,
            limit: None,
        };
        let mut records = self
            .policy
            .run(|| session.connector.fetch(&session.ctx, query.clone()))
            .await
            .and_then(|r| r.into_records())?;
        let total_count = records.len();
        records.truncate(limit as usize);
        Ok(ImportPreview {
            records,
            total_count,
        })
    }

    pub async fn get_field_mappings(
        &self,
        user_id: &str,
        account_id: Uuid,
    ) -> Result<FieldMappingView, IntegrationError> {
        let account = self.crm_account(user_id, account_id).await?;
        let settings = account
            .config
            .crm_settings()
            .ok_or_else(|| IntegrationError::Internal("CRM account without CRM settings".into()))?;
        Ok(FieldMappingView {
            available: ProfileField::ALL.to_vec(),
            current: settings.field_mapping.fields,
            match_field: settings.field_mapping.match_field,
        })
    }

    /// update_field_mappings は対応表を置き換える。match_field 省略時は現在の値を引き継ぐ。
    pub async fn update_field_mappings(
        &self,
        user_id: &str,
        account_id: Uuid,
        fields: Vec<FieldMappingEntry>,
        match_field: Option<String>,
    ) -> Result<FieldMappingView, IntegrationError> {
        let mut account = self.crm_account(user_id, account_id).await?;
        let current = account
            .config
            .crm_settings()
            .map(|s| s.field_mapping.match_field)
            .unwrap_or_default();
        let mapping = FieldMapping {
            fields,
            match_field: match_field.unwrap_or(current),
        };
        account.config.set_field_mapping(mapping.clone())?;
        account.updated_at = self.clock.now();
        self.registry.save(&account).await?;
        tracing::info!(account_id = %account.id, "field mappings updated");
        Ok(FieldMappingView {
            available: ProfileField::ALL.to_vec(),
            current: mapping.fields,
            match_field: mapping.match_field,
        })
    }

    /// get_operation_history は同期履歴を新しい順に返す。
    pub async fn get_operation_history(
        &self,
        user_id: &str,
        account_id: Uuid,
    ) -> Result<Vec<SyncOperation>, IntegrationError> {
        let account = self.crm_account(user_id, account_id).await?;
        Ok(self.sync_repo.list_by_account(account.id).await?)
    }

    pub async fn list_objects(
        &self,
        user_id: &str,
        account_id: Uuid,
    ) -> Result<Vec<ObjectDescriptor>, IntegrationError> {
        let session = self
            .session_for(user_id, account_id, Provider::Salesforce)
            .await?;
        Ok(self
            .policy
            .run(|| session.connector.fetch(&session.ctx, FetchQuery::Objects))
            .await
            .and_then(|r| r.into_objects())?)
    }

    /// list_fields は CRM オブジェクトのフィールド（HubSpot ではプロパティ）一覧を返す。
    pub async fn list_fields(
        &self,
        user_id: &str,
        account_id: Uuid,
        provider: Provider,
        object: &str,
    ) -> Result<Vec<FieldDescriptor>, IntegrationError> {
        if object.trim().is_empty() {
            return Err(IntegrationError::validation("object is required"));
        }
        let session = self.session_for(user_id, account_id, provider).await?;
        let query = FetchQuery::ObjectFields {
            object: object.trim().to_string(),
        };
        Ok(self
            .policy
            .run(|| session.connector.fetch(&session.ctx, query.clone()))
            .await
            .and_then(|r| r.into_fields())?)
    }

    pub async fn list_workflows(
        &self,
        user_id: &str,
        account_id: Uuid,
    ) -> Result<Vec<WorkflowDescriptor>, IntegrationError> {
        let session = self.session_for(user_id, account_id, Provider::Hubspot).await?;
        Ok(self
            .policy
            .run(|| session.connector.fetch(&session.ctx, FetchQuery::Workflows))
            .await
            .and_then(|r| r.into_workflows())?)
    }

    /// trigger_workflow は HubSpot のワークフローにコンタクトを登録する。
    /// コンタクト単位の失敗は書き出しの失敗と同様に記録する。
    pub async fn trigger_workflow(
        &self,
        user_id: &str,
        account_id: Uuid,
        workflow_id: &str,
        contact_ids: &[String],
    ) -> Result<SyncOperation, IntegrationError> {
        if workflow_id.trim().is_empty() || contact_ids.is_empty() {
            return Err(IntegrationError::validation(
                "workflow_id and contact_ids are required",
            ));
        }
        let session = self.session_for(user_id, account_id, Provider::Hubspot).await?;
        let workflows_enabled = matches!(
            &session.account.config,
            crate::domain::entity::provider_config::ProviderConfig::Hubspot(c) if c.enable_workflows
        );
        if !workflows_enabled {
            return Err(IntegrationError::validation(
                "workflows are disabled for this account",
            ));
        }
        let _permit = self.guard.try_acquire(session.account.id, "a sync operation")?;

        let mut tally = SyncTally::new();
        for contact_id in contact_ids {
            let command = PushCommand::TriggerWorkflow {
                workflow_id: workflow_id.to_string(),
                record_id: contact_id.clone(),
            };
            match self.push(&session, command).await {
                Ok(()) => tally.success(),
                Err(e) => tally.failure(Some(contact_id.clone()), e.to_string()),
            }
        }
        self.record(&session.account, SyncDirection::Export, tally).await
    }

    /// record は完了した操作を保存し、アカウントの CRM 統計とメトリクスを更新する。
    async fn record(
        &self,
        account: &Account,
        direction: SyncDirection,
        tally: SyncTally,
    ) -> Result<SyncOperation, IntegrationError> {
        let operation = SyncOperation::completed(account.id, account.user_id.clone(), direction, tally);
        if !operation.stats.is_consistent() {
            return Err(IntegrationError::Internal(format!(
                "sync stats are inconsistent: {:?}",
                operation.stats
            )));
        }
        self.sync_repo.create(&operation).await?;

        let provider = account.provider.as_str();
        let dir = direction.to_string();
        let stats = operation.stats;
        self.metrics
            .record_sync_records(provider, &dir, "successful", u64::from(stats.successful));
        self.metrics
            .record_sync_records(provider, &dir, "failed", u64::from(stats.failed));
        self.metrics
            .record_sync_records(provider, &dir, "skipped", u64::from(stats.skipped));

        let mut fresh = self.registry.reload(account.id).await?;
        if let Some(crm) = fresh.stats.crm_mut() {
            match direction {
                SyncDirection::Import => crm.records_imported += u64::from(stats.successful),
                SyncDirection::Export => crm.records_exported += u64::from(stats.successful),
            }
            crm.sync_errors += u64::from(stats.failed);
            crm.last_sync_at = Some(operation.created_at);
        }
        fresh.last_used_at = Some(operation.created_at);
        self.registry.save(&fresh).await?;

        tracing::info!(
            account_id = %account.id,
            operation_id = %operation.id,
            direction = %direction,
            processed = stats.processed,
            successful = stats.successful,
            failed = stats.failed,
            skipped = stats.skipped,
            "sync operation recorded"
        );
        Ok(operation)
    }

    async fn record_aborted(
        &self,
        account: &Account,
        direction: SyncDirection,
        message: String,
    ) -> Result<SyncOperation, IntegrationError> {
        let operation = SyncOperation::aborted(account.id, account.user_id.clone(), direction, message);
        self.sync_repo.create(&operation).await?;
        tracing::warn!(
            account_id = %account.id,
            operation_id = %operation.id,
            direction = %direction,
            error = %operation.message,
            "sync operation aborted"
        );
        Ok(operation)
    }
}

/// external_prefix は CRM から取り込んだプロフィールの外部 ID の接頭辞（`hubspot:` など）。
fn external_prefix(provider: Provider) -> String {
    format!("{}:", provider.as_str().to_lowercase())
}

/// existing_query は既存レコードの検索条件を決める。同じ CRM から取り込んだプロフィールは
/// レコード ID で引き、それ以外は照合フィールドの値で引く。どちらも無ければ None。
fn existing_query(
    provider: Provider,
    mapping: &FieldMapping,
    object: &str,
    profile: &Profile,
    resolved: &TargetRecord,
) -> Option<FetchQuery> {
    if let Some(id) = profile.external_id.strip_prefix(&external_prefix(provider)) {
        return Some(FetchQuery::FindById {
            object: object.to_string(),
            id: id.to_string(),
        });
    }
    mapping
        .match_key(resolved)
        .filter(|key| !key.trim().is_empty())
        .map(|key| FetchQuery::FindByKey {
            object: object.to_string(),
            field: mapping.match_field.clone(),
            value: key.clone(),
        })
}
