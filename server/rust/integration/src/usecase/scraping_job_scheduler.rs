use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use workloom_telemetry::metrics::Metrics;

use crate::domain::entity::account::{Account, Provider};
use crate::domain::entity::profile::DiscoveredRecord;
use crate::domain::entity::scraping_job::{JobConfig, JobType, ScrapingJob};
use crate::domain::error::IntegrationError;
use crate::domain::repository::ScrapingJobRepository;
use crate::infrastructure::account_guard::{AccountWorkGuard, WorkPermit};
use crate::infrastructure::clock::Clock;
use crate::infrastructure::connector::{
    CallPolicy, ConnectionContext, ConnectorRegistry, FetchQuery, ProviderConnector,
};
use crate::infrastructure::rate_limiter::RateLimiter;
use crate::usecase::account_registry::AccountRegistry;

/// SchedulerSettings はワーカーの動作設定。
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub max_concurrent_jobs: usize,
    pub worker_timeout: Duration,
    pub search_page_size: u32,
    pub cancel_grace: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 8,
            worker_timeout: Duration::from_secs(1800),
            search_page_size: 25,
            cancel_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubmitJobInput {
    pub job_type: JobType,
    pub config: JobConfig,
}

/// JobReport はジョブ終了時の状態と、発見したレコード。
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job: ScrapingJob,
    pub records: Vec<DiscoveredRecord>,
    /// 詳細取得に失敗した候補の外部 ID。
    pub unverified: Vec<String>,
}

struct RunningJob {
    user_id: String,
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
}

/// Discovery は発見処理（または 1 単位の作業）の終わり方。
enum Discovery {
    Finished,
    Cancelled,
}

/// ScrapingJobScheduler はアカウント単位の発見ジョブを受け付けてワーカーで実行する。
///
/// 1 アカウントで同時に実行できるジョブは 1 件のみ（AccountWorkGuard による受付チェック）。
/// ワーカー全体の同時実行数は Semaphore で制限し、空きを待つ間ジョブは PENDING のまま残る。
pub struct ScrapingJobScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<AccountRegistry>,
    job_repo: Arc<dyn ScrapingJobRepository>,
    limiter: Arc<RateLimiter>,
    connectors: ConnectorRegistry,
    guard: Arc<AccountWorkGuard>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    policy: CallPolicy,
    settings: SchedulerSettings,
    slots: Arc<Semaphore>,
    running: Mutex<HashMap<Uuid, RunningJob>>,
}

impl ScrapingJobScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<AccountRegistry>,
        job_repo: Arc<dyn ScrapingJobRepository>,
        limiter: Arc<RateLimiter>,
        connectors: ConnectorRegistry,
        guard: Arc<AccountWorkGuard>,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
        policy: CallPolicy,
        settings: SchedulerSettings,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(settings.max_concurrent_jobs.max(1)));
        Self {
            inner: Arc::new(Inner {
                registry,
                job_repo,
                limiter,
                connectors,
                guard,
                clock,
                metrics,
                policy,
                settings,
                slots,
                running: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// submit はジョブを受け付けてバックグラウンドで実行する。戻り値は PENDING のジョブ。
    pub async fn submit(
        &self,
        user_id: &str,
        account_id: Uuid,
        input: SubmitJobInput,
    ) -> Result<ScrapingJob, IntegrationError> {
        let (job, _handle) = self.start(user_id, account_id, input).await?;
        Ok(job)
    }

    /// run_to_completion はジョブを受け付け、終了まで待って発見結果を返す。
    /// 実行中も cancel による協調的キャンセルの対象になる。
    pub async fn run_to_completion(
        &self,
        user_id: &str,
        account_id: Uuid,
        input: SubmitJobInput,
    ) -> Result<JobReport, IntegrationError> {
        let (_, handle) = self.start(user_id, account_id, input).await?;
        handle
            .await
            .map_err(|e| IntegrationError::Internal(format!("scraping worker aborted: {e}")))
    }

    async fn start(
        &self,
        user_id: &str,
        account_id: Uuid,
        input: SubmitJobInput,
    ) -> Result<(ScrapingJob, JoinHandle<JobReport>), IntegrationError> {
        let account = self.inner.registry.get(user_id, account_id).await?;
        if account.provider != Provider::Linkedin {
            return Err(IntegrationError::validation(format!(
                "{} accounts do not support discovery jobs",
                account.provider
            )));
        }
        if !account.is_schedulable() {
            return Err(IntegrationError::AccountUnavailable(format!(
                "account {} is not available for jobs (status {}, active {})",
                account.id, account.status, account.is_active
            )));
        }
        input.config.validate(input.job_type)?;

        let permit = self.inner.guard.try_acquire(account.id, "a scraping job")?;
        let ctx = self.inner.registry.open_context(&account)?;
        let connector = self.inner.connectors.get(account.provider)?;
        self.inner.registry.sync_limiter(&account).await;

        let job = ScrapingJob::new(account.id, user_id.to_string(), input.job_type, input.config);
        self.inner.job_repo.create(&job).await?;

        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);
        self.inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                job.id,
                RunningJob {
                    user_id: user_id.to_string(),
                    cancel: cancel.clone(),
                    done: done_rx,
                },
            );

        tracing::info!(
            job_id = %job.id,
            account_id = %account.id,
            job_type = %job.job_type,
            "scraping job submitted"
        );

        let inner = Arc::clone(&self.inner);
        let worker_job = job.clone();
        let handle = tokio::spawn(async move {
            let report = inner
                .execute(worker_job, account, ctx, connector, cancel, permit)
                .await;
            inner
                .running
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&report.job.id);
            let _ = done_tx.send(true);
            report
        });
        Ok((job, handle))
    }

    pub async fn get(&self, user_id: &str, job_id: Uuid) -> Result<ScrapingJob, IntegrationError> {
        self.inner
            .job_repo
            .find_by_id(job_id)
            .await?
            .filter(|j| j.user_id == user_id)
            .ok_or_else(|| IntegrationError::not_found("scraping job", job_id))
    }

    /// list はアカウントのジョブを新しい順に返す。
    pub async fn list(
        &self,
        user_id: &str,
        account_id: Uuid,
    ) -> Result<Vec<ScrapingJob>, IntegrationError> {
        let account = self.inner.registry.get(user_id, account_id).await?;
        Ok(self.inner.job_repo.list_by_account(account.id).await?)
    }

    /// cancel はキャンセルを要求する。ワーカーは作業単位の合間にフラグを確認して停止し、
    /// 計上済みの途中結果はそのまま残す。
    pub async fn cancel(&self, user_id: &str, job_id: Uuid) -> Result<ScrapingJob, IntegrationError> {
        let job = self.get(user_id, job_id).await?;
        if job.is_terminal() {
            return Err(IntegrationError::Conflict(format!(
                "scraping job {job_id} already finished with status {}",
                job.status
            )));
        }

        let signal = {
            let running = self.inner.running.lock().unwrap_or_else(PoisonError::into_inner);
            running
                .get(&job_id)
                .filter(|r| r.user_id == user_id)
                .map(|r| (r.cancel.clone(), r.done.clone()))
        };

        match signal {
            Some((token, mut done)) => {
                token.cancel();
                tracing::info!(job_id = %job_id, "scraping job cancellation requested");
                let _ = tokio::time::timeout(
                    self.inner.settings.cancel_grace,
                    done.wait_for(|finished| *finished),
                )
                .await;
            }
            None => {
                // ワーカーが存在しない（再起動で取り残された）ジョブは直接 CANCELLED にする。
                let mut job = job;
                job.cancel();
                self.inner.job_repo.update(&job).await?;
                return Ok(job);
            }
        }
        self.get(user_id, job_id).await
    }

    /// wait はジョブが終了状態になるまで待つ。実行中でなければ現在の状態を返す。
    pub async fn wait(&self, user_id: &str, job_id: Uuid) -> Result<ScrapingJob, IntegrationError> {
        let done = self
            .inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&job_id)
            .map(|r| r.done.clone());
        if let Some(mut done) = done {
            let _ = done.wait_for(|finished| *finished).await;
        }
        self.get(user_id, job_id).await
    }

    /// recover_unfinished は起動時に PENDING / RUNNING のまま残ったジョブを
    /// 再投入可能な FAILED として閉じ、件数を返す。
    pub async fn recover_unfinished(&self) -> Result<usize, IntegrationError> {
        let jobs = self.inner.job_repo.find_unfinished().await?;
        let count = jobs.len();
        for mut job in jobs {
            job.fail("interrupted by service restart".to_string(), true);
            self.inner.job_repo.update(&job).await?;
            tracing::warn!(job_id = %job.id, account_id = %job.account_id, "stale scraping job closed");
        }
        Ok(count)
    }

    pub fn is_running(&self, account_id: Uuid) -> bool {
        self.inner.guard.is_busy(account_id)
    }
}

struct WorkerState {
    job: ScrapingJob,
    records: Vec<DiscoveredRecord>,
    unverified: Vec<String>,
    had_failure: bool,
}

impl Inner {
    async fn execute(
        &self,
        job: ScrapingJob,
        account: Account,
        ctx: ConnectionContext,
        connector: Arc<dyn ProviderConnector>,
        cancel: CancellationToken,
        _permit: WorkPermit,
    ) -> JobReport {
        let mut state = WorkerState {
            job,
            records: Vec::new(),
            unverified: Vec::new(),
            had_failure: false,
        };

        let slot: Option<OwnedSemaphorePermit> = tokio::select! {
            permit = Arc::clone(&self.slots).acquire_owned() => permit.ok(),
            () = cancel.cancelled() => None,
        };
        let Some(_slot) = slot else {
            state.job.cancel();
            self.persist(&state.job).await;
            self.finish(&state, &account).await;
            return state.into_report();
        };

        state.job.start();
        self.persist(&state.job).await;
        self.metrics.record_job_started();
        tracing::info!(job_id = %state.job.id, account_id = %account.id, "scraping job started");

        let timeout = self.settings.worker_timeout;
        let outcome = tokio::time::timeout(
            timeout,
            self.discover(&mut state, &ctx, connector.as_ref(), &cancel),
        )
        .await;

        match outcome {
            Ok(Ok(Discovery::Finished)) => state.job.complete(),
            Ok(Ok(Discovery::Cancelled)) => state.job.cancel(),
            Ok(Err(e)) => {
                let retryable = e.is_retryable();
                state.job.fail(e.to_string(), retryable);
            }
            Err(_) => state.job.fail(
                format!("scraping job exceeded worker timeout of {} s", timeout.as_secs()),
                false,
            ),
        }
        self.persist(&state.job).await;
        self.metrics.scraping_jobs_running.dec();
        self.finish(&state, &account).await;
        state.into_report()
    }

    async fn finish(&self, state: &WorkerState, account: &Account) {
        let job = &state.job;
        self.metrics
            .record_job_finished(&job.job_type.to_string(), &job.status.to_string());
        if let Err(e) = self
            .registry
            .record_job_outcome(account.id, job.scraped, job.failed, self.clock.now())
            .await
        {
            tracing::warn!(account_id = %account.id, error = %e, "failed to update account stats");
        }
        tracing::info!(
            job_id = %job.id,
            status = %job.status,
            found = job.found,
            scraped = job.scraped,
            failed = job.failed,
            error = job.error_message.as_deref().unwrap_or(""),
            "scraping job finished"
        );
    }

    async fn persist(&self, job: &ScrapingJob) {
        if let Err(e) = self.job_repo.update(job).await {
            tracing::error!(job_id = %job.id, error = %e, "failed to persist scraping job");
        }
    }

    /// acquire は 1 単位分のクォータを得る。待機中のキャンセルは false を返す。
    async fn acquire(
        &self,
        account_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<bool, IntegrationError> {
        tokio::select! {
            result = self.limiter.acquire(account_id) => match result {
                Ok(()) => {
                    self.metrics.record_rate_limit("granted");
                    Ok(true)
                }
                Err(e) => {
                    self.metrics.record_rate_limit("rejected");
                    Err(e)
                }
            },
            () = cancel.cancelled() => Ok(false),
        }
    }

    /// on_connector_error は連続失敗を記録し、アカウントが ERROR に遷移した場合はジョブを止める。
    async fn on_connector_error(
        &self,
        state: &mut WorkerState,
        account_id: Uuid,
        error: &IntegrationError,
    ) -> Result<(), IntegrationError> {
        state.had_failure = true;
        let flipped = self
            .registry
            .record_connector_failure(account_id, &error.to_string())
            .await?;
        if flipped {
            return Err(IntegrationError::AccountUnavailable(format!(
                "account {account_id} moved to ERROR: {error}"
            )));
        }
        Ok(())
    }

    async fn on_connector_success(&self, state: &mut WorkerState, account_id: Uuid) {
        if state.had_failure {
            state.had_failure = false;
            if let Err(e) = self
                .registry
                .record_connector_success(account_id, self.clock.now())
                .await
            {
                tracing::warn!(account_id = %account_id, error = %e, "failed to reset failure counter");
            }
        }
    }

    async fn discover(
        &self,
        state: &mut WorkerState,
        ctx: &ConnectionContext,
        connector: &dyn ProviderConnector,
        cancel: &CancellationToken,
    ) -> Result<Discovery, IntegrationError> {
        let account_id = ctx.account_id;

        if state.job.job_type == JobType::SingleProfile {
            let url = state.job.config.profile_url.clone().unwrap_or_default();
            state.job.add_found(1);
            self.persist(&state.job).await;
            return self
                .fetch_detail(state, ctx, connector, cancel, url.clone(), url)
                .await;
        }

        let mut cursor: Option<String> = None;
        loop {
            if cancel.is_cancelled() {
                return Ok(Discovery::Cancelled);
            }
            let remaining = state.job.config.max_results.saturating_sub(state.job.found);
            if remaining == 0 {
                return Ok(Discovery::Finished);
            }
            if !self.acquire(account_id, cancel).await? {
                return Ok(Discovery::Cancelled);
            }

            let query = FetchQuery::SearchPage {
                query: state.job.config.search_query.clone(),
                company_url: state.job.config.company_url.clone(),
                filters: state.job.config.filters.clone(),
                cursor: cursor.clone(),
                page_size: remaining.min(self.settings.search_page_size.max(1)),
            };
            let page = match self
                .policy
                .run(|| connector.fetch(ctx, query.clone()))
                .await
                .and_then(|r| r.into_search_page())
            {
                Ok(page) => {
                    self.on_connector_success(state, account_id).await;
                    page
                }
                Err(e) => {
                    let e = IntegrationError::from(e);
                    self.on_connector_error(state, account_id, &e).await?;
                    return Err(e);
                }
            };

            let offered = u32::try_from(page.candidates.len()).unwrap_or(u32::MAX);
            let added = state.job.add_found(offered);
            self.persist(&state.job).await;

            for candidate in page.candidates.into_iter().take(added as usize) {
                if let Discovery::Cancelled = self
                    .fetch_detail(
                        state,
                        ctx,
                        connector,
                        cancel,
                        candidate.external_id,
                        candidate.profile_url,
                    )
                    .await?
                {
                    return Ok(Discovery::Cancelled);
                }
            }

            cursor = page.next_cursor;
            if cursor.is_none() || offered == 0 {
                return Ok(Discovery::Finished);
            }
        }
    }

    async fn fetch_detail(
        &self,
        state: &mut WorkerState,
        ctx: &ConnectionContext,
        connector: &dyn ProviderConnector,
        cancel: &CancellationToken,
        external_id: String,
        url: String,
    ) -> Result<Discovery, IntegrationError> {
        let account_id = ctx.account_id;
        if cancel.is_cancelled() || !self.acquire(account_id, cancel).await? {
            return Ok(Discovery::Cancelled);
        }

        let result = self
            .policy
            .run(|| connector.fetch(ctx, FetchQuery::Profile { url: url.clone() }))
            .await
            .and_then(|r| r.into_profile());
        match result {
            Ok(record) => {
                state.job.record_scraped();
                state.records.push(record);
                self.on_connector_success(state, account_id).await;
            }
            Err(e) => {
                let e = IntegrationError::from(e);
                tracing::debug!(job_id = %state.job.id, candidate = %external_id, error = %e, "profile fetch failed");
                state.job.record_failed();
                state.unverified.push(external_id);
                self.persist(&state.job).await;
                self.on_connector_error(state, account_id, &e).await?;
                return Ok(Discovery::Finished);
            }
        }
        self.persist(&state.job).await;
        Ok(Discovery::Finished)
    }
}

impl WorkerState {
    fn into_report(self) -> JobReport {
        JobReport {
            job: self.job,
            records: self.records,
            unverified: self.unverified,
        }
    }
}
