use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use uuid::Uuid;
use workloom_telemetry::metrics::Metrics;

use crate::domain::entity::account::{Account, Provider};
use crate::domain::entity::mapping::Mapping;
use crate::domain::entity::mapping_run::{MappingRun, RunStatus};
use crate::domain::entity::scraping_job::{
    JobConfig, JobFilters, JobStatus, JobType, MAX_RESULTS_LIMIT,
};
use crate::domain::error::IntegrationError;
use crate::domain::repository::{MappingRepository, MappingRunRepository, ProfileRepository};
use crate::domain::service::ProfileDiffService;
use crate::infrastructure::clock::Clock;
use crate::infrastructure::mapping_dispatcher::DueMappingRunner;
use crate::infrastructure::rate_limiter::RateLimiter;
use crate::usecase::account_registry::AccountRegistry;
use crate::usecase::scraping_job_scheduler::{JobReport, ScrapingJobScheduler, SubmitJobInput};

/// 検索条件がすべて空のマッピングに使うワイルドカード検索語。
const MATCH_ANY_QUERY: &str = "*";

#[derive(Debug, Clone)]
pub struct MappingRunSettings {
    pub run_interval: Duration,
    pub max_results_per_run: u32,
}

impl Default for MappingRunSettings {
    fn default() -> Self {
        Self {
            run_interval: Duration::hours(24),
            max_results_per_run: MAX_RESULTS_LIMIT,
        }
    }
}

/// MappingRunEngine はマッピングの検索条件を 1 回のランとして実行し、前回までの
/// プロフィール集合との差分を記録する。
pub struct MappingRunEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    mapping_repo: Arc<dyn MappingRepository>,
    run_repo: Arc<dyn MappingRunRepository>,
    profile_repo: Arc<dyn ProfileRepository>,
    registry: Arc<AccountRegistry>,
    scheduler: Arc<ScrapingJobScheduler>,
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    settings: MappingRunSettings,
}

impl MappingRunEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mapping_repo: Arc<dyn MappingRepository>,
        run_repo: Arc<dyn MappingRunRepository>,
        profile_repo: Arc<dyn ProfileRepository>,
        registry: Arc<AccountRegistry>,
        scheduler: Arc<ScrapingJobScheduler>,
        limiter: Arc<RateLimiter>,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
        settings: MappingRunSettings,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                mapping_repo,
                run_repo,
                profile_repo,
                registry,
                scheduler,
                limiter,
                clock,
                metrics,
                settings,
            }),
        }
    }

    /// run はマッピングを 1 回実行し、終了したランを返す。
    ///
    /// 既に IN_PROGRESS のランがある場合は ConflictError。発見ジョブが失敗した場合も
    /// ランは FAILED として記録され、エラーメッセージはそのまま残る。
    /// ラン作成後の処理は別タスクで進むため、呼び出し側が待機をやめてもランは終了状態まで記録される。
    pub async fn run(&self, user_id: &str, mapping_id: Uuid) -> Result<MappingRun, IntegrationError> {
        let inner = &self.inner;
        let mapping = inner
            .mapping_repo
            .find_by_id(mapping_id)
            .await?
            .filter(|m| m.user_id == user_id)
            .ok_or_else(|| IntegrationError::not_found("mapping", mapping_id))?;

        if inner.run_repo.find_in_progress(mapping.id).await?.is_some() {
            return Err(IntegrationError::Conflict(format!(
                "mapping {mapping_id} already has a run in progress"
            )));
        }

        let account = inner.pick_account(user_id).await?;

        let run = MappingRun::start(mapping.id, inner.clock.now());
        if !inner.run_repo.create_if_idle(&run).await? {
            return Err(IntegrationError::Conflict(format!(
                "mapping {mapping_id} already has a run in progress"
            )));
        }

        let worker = Arc::clone(inner);
        let user_id = user_id.to_string();
        tokio::spawn(async move { worker.drive(&user_id, mapping, account, run).await })
            .await
            .map_err(|e| IntegrationError::Internal(format!("mapping run task aborted: {e}")))?
    }

    /// run_due は定期実行の期限が来たマッピングを順に実行し、実行したラン数を返す。
    pub async fn run_due(&self) -> Result<usize, IntegrationError> {
        let due = self.inner.mapping_repo.find_due(self.inner.clock.now()).await?;
        let mut executed = 0;
        for mapping in due {
            match self.run(&mapping.user_id, mapping.id).await {
                Ok(run) => {
                    executed += 1;
                    tracing::info!(mapping_id = %mapping.id, status = %run.status, "scheduled mapping run finished");
                }
                Err(e) => {
                    tracing::warn!(mapping_id = %mapping.id, error = %e, "scheduled mapping run skipped");
                }
            }
        }
        Ok(executed)
    }

    /// recover_unfinished は起動時に IN_PROGRESS のまま残ったランを FAILED として閉じ、
    /// マッピングの状態とカウンタを戻す。閉じたラン数を返す。
    pub async fn recover_unfinished(&self) -> Result<usize, IntegrationError> {
        let runs = self.inner.run_repo.list_in_progress().await?;
        let count = runs.len();
        for mut run in runs {
            run.fail("interrupted by service restart".to_string());
            self.inner.finalize(run.mapping_id, &run).await?;
        }
        Ok(count)
    }
}

impl EngineInner {
    /// drive はラン作成後の処理を終了状態の保存まで進める。途中のエラーはランの失敗として記録する。
    async fn drive(
        &self,
        user_id: &str,
        mut mapping: Mapping,
        account: Account,
        mut run: MappingRun,
    ) -> Result<MappingRun, IntegrationError> {
        mapping.begin_run(run.run_date);
        if let Err(e) = self.mapping_repo.update(&mapping).await {
            run.fail(format!("failed to mark mapping as running: {e}"));
            self.finalize(mapping.id, &run).await?;
            return Ok(run);
        }
        tracing::info!(
            mapping_id = %mapping.id,
            run_id = %run.id,
            account_id = %account.id,
            "mapping run started"
        );

        let input = self.job_input(&mapping);
        match self
            .scheduler
            .run_to_completion(user_id, account.id, input)
            .await
        {
            Ok(report) => {
                run.job_id = Some(report.job.id);
                if let Err(e) = self.apply(&mapping, &mut run, report).await {
                    run.fail(e.to_string());
                }
            }
            Err(e) => run.fail(e.to_string()),
        }

        self.finalize(mapping.id, &run).await?;
        Ok(run)
    }

    /// pick_account はユーザーの発見用アカウントを選ぶ。
    /// ローテーションが有効なアカウントがあれば、当日のクォータが残っているものからラウンドロビンで選ぶ。
    async fn pick_account(&self, user_id: &str) -> Result<Account, IntegrationError> {
        let candidates: Vec<Account> = self
            .registry
            .list(user_id)
            .await?
            .into_iter()
            .filter(|a| a.provider == Provider::Linkedin)
            .filter(Account::is_schedulable)
            .filter(|a| !self.scheduler.is_running(a.id))
            .collect();

        let no_account = || {
            IntegrationError::AccountUnavailable(
                "no active LinkedIn account is available for discovery".to_string(),
            )
        };
        let rotation = candidates
            .iter()
            .any(|a| a.config.scraping().is_some_and(|c| c.enable_rotation));
        if !rotation {
            return candidates.into_iter().next().ok_or_else(no_account);
        }

        for account in &candidates {
            self.registry.sync_limiter(account).await;
        }
        let ids: Vec<Uuid> = candidates.iter().map(|a| a.id).collect();
        let chosen = self
            .limiter
            .pick_rotating(&format!("{user_id}:linkedin"), &ids)
            .await
            .ok_or_else(|| {
                IntegrationError::AccountUnavailable(
                    "every LinkedIn account has exhausted its daily quota".to_string(),
                )
            })?;
        candidates
            .into_iter()
            .find(|a| a.id == chosen)
            .ok_or_else(|| IntegrationError::Internal("rotation picked an unknown account".into()))
    }

    fn job_input(&self, mapping: &Mapping) -> SubmitJobInput {
        let query = mapping.criteria.search_query();
        SubmitJobInput {
            job_type: JobType::ProfileSearch,
            config: JobConfig {
                search_query: Some(if query.is_empty() {
                    MATCH_ANY_QUERY.to_string()
                } else {
                    query
                }),
                company_url: None,
                profile_url: None,
                max_results: self.settings.max_results_per_run.clamp(1, MAX_RESULTS_LIMIT),
                filters: JobFilters {
                    location: mapping.criteria.country.clone(),
                    industry: None,
                    experience: None,
                },
            },
        }
    }

    /// apply は完了したジョブの結果を差分としてプロフィールとランに反映する。
    async fn apply(
        &self,
        mapping: &Mapping,
        run: &mut MappingRun,
        report: JobReport,
    ) -> Result<(), IntegrationError> {
        let job = report.job;
        match job.status {
            JobStatus::Completed => {}
            JobStatus::Cancelled => {
                run.fail("scraping job was cancelled".to_string());
                return Ok(());
            }
            _ => {
                run.fail(
                    job.error_message
                        .unwrap_or_else(|| format!("scraping job ended with status {}", job.status)),
                );
                return Ok(());
            }
        }

        let existing = self.profile_repo.list_by_mapping(mapping.id).await?;
        let unverified: HashSet<String> = report.unverified.into_iter().collect();
        let diff = ProfileDiffService::compute(
            mapping.id,
            &mapping.criteria,
            &existing,
            report.records,
            &unverified,
            self.clock.now(),
        );
        if !diff.changed.is_empty() {
            self.profile_repo.upsert_many(&diff.changed).await?;
        }
        run.complete(diff.counts);
        Ok(())
    }

    /// finalize はランを保存し、マッピングの非正規化カウンタと次回実行日時を更新する。
    async fn finalize(&self, mapping_id: Uuid, run: &MappingRun) -> Result<(), IntegrationError> {
        self.run_repo.update(run).await?;

        let profiles_count = self.profile_repo.count_active(mapping_id).await?;
        let runs_count = self.run_repo.count_by_mapping(mapping_id).await?;
        // ラン実行中に pause された可能性があるため最新の状態を読み直す
        if let Some(mut mapping) = self.mapping_repo.find_by_id(mapping_id).await? {
            mapping.finish_run(
                run.status,
                run.run_date + self.settings.run_interval,
                profiles_count,
                runs_count,
            );
            self.mapping_repo.update(&mapping).await?;
        }

        let status = run.status.to_string();
        self.metrics.record_mapping_run(&status);
        match run.status {
            RunStatus::Completed => tracing::info!(
                mapping_id = %mapping_id,
                run_id = %run.id,
                total_found = run.counts.total_found,
                new_profiles = run.counts.new_profiles,
                departures = run.counts.departures,
                job_changes = run.counts.job_changes,
                "mapping run completed"
            ),
            _ => tracing::warn!(
                mapping_id = %mapping_id,
                run_id = %run.id,
                error = run.error_message.as_deref().unwrap_or(""),
                "mapping run failed"
            ),
        }
        Ok(())
    }
}

#[async_trait]
impl DueMappingRunner for MappingRunEngine {
    async fn run_due(&self) -> Result<usize, IntegrationError> {
        MappingRunEngine::run_due(self).await
    }
}
