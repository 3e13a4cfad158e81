use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use super::clock::Clock;
use crate::domain::entity::provider_config::ScrapingConfig;
use crate::domain::error::IntegrationError;

/// RateLimitPolicy はアカウント単位の日次上限と呼び出し間隔。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub daily_limit: u32,
    pub request_delay: Duration,
    pub enforce_spacing: bool,
}

impl From<&ScrapingConfig> for RateLimitPolicy {
    fn from(config: &ScrapingConfig) -> Self {
        Self {
            daily_limit: config.daily_limit,
            request_delay: Duration::from_millis(config.request_delay_ms),
            enforce_spacing: config.respect_rate_limits,
        }
    }
}

/// QuotaSnapshot はある時点のアカウントのクォータ状況。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaSnapshot {
    pub daily_limit: u32,
    pub used: u32,
    pub remaining: u32,
    pub day: NaiveDate,
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Bucket {
    policy: RateLimitPolicy,
    day: NaiveDate,
    used: u32,
    next_slot: Option<Instant>,
}

/// RateLimiter はアカウントごとの発見処理クォータを管理する。
///
/// カウンタはアカウント単位の Mutex の内側でのみ読み書きし、アカウントをまたぐロックは持たない。
/// 日付境界は設定したタイムゾーン（プロバイダのローカル日）で判定する。
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    timezone: Tz,
    buckets: Mutex<HashMap<Uuid, Arc<Mutex<Bucket>>>>,
    cursors: Mutex<HashMap<String, usize>>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>, timezone: Tz) -> Self {
        Self {
            clock,
            timezone,
            buckets: Mutex::new(HashMap::new()),
            cursors: Mutex::new(HashMap::new()),
        }
    }

    fn today(&self) -> NaiveDate {
        self.clock.now().with_timezone(&self.timezone).date_naive()
    }

    /// next_reset は day の翌日 0 時（ローカル）を UTC で返す。
    fn next_reset(&self, day: NaiveDate) -> DateTime<Utc> {
        let next = day.succ_opt().unwrap_or(day).and_time(chrono::NaiveTime::default());
        self.timezone
            .from_local_datetime(&next)
            .earliest()
            .map_or_else(|| Utc.from_utc_datetime(&next), |t| t.with_timezone(&Utc))
    }

    /// configure はアカウントのポリシーを登録または更新する。
    /// seed には永続化済みの (利用日, 利用数) を渡し、当日分であれば引き継ぐ。
    pub async fn configure(
        &self,
        account_id: Uuid,
        policy: RateLimitPolicy,
        seed: Option<(NaiveDate, u32)>,
    ) {
        let today = self.today();
        let existing = self.buckets.lock().await.get(&account_id).cloned();
        if let Some(existing) = existing {
            existing.lock().await.policy = policy;
            return;
        }
        let mut buckets = self.buckets.lock().await;
        let used = match seed {
            Some((day, used)) if day == today => used,
            _ => 0,
        };
        buckets.entry(account_id).or_insert_with(|| {
            Arc::new(Mutex::new(Bucket {
                policy,
                day: today,
                used,
                next_slot: None,
            }))
        });
    }

    pub async fn forget(&self, account_id: Uuid) {
        self.buckets.lock().await.remove(&account_id);
    }

    async fn bucket(&self, account_id: Uuid) -> Result<Arc<Mutex<Bucket>>, IntegrationError> {
        self.buckets
            .lock()
            .await
            .get(&account_id)
            .cloned()
            .ok_or_else(|| {
                IntegrationError::AccountUnavailable(format!(
                    "account {account_id} has no rate limit policy"
                ))
            })
    }

    fn roll_over(&self, bucket: &mut Bucket) {
        let today = self.today();
        if bucket.day != today {
            bucket.day = today;
            bucket.used = 0;
        }
    }

    /// acquire は 1 単位の発見処理を行う許可を得る。
    ///
    /// 呼び出し間隔が経過するまで待機してから残りクォータを 1 減らす。
    /// 当日の上限に達している場合は QuotaExceeded を返す（待機はしない）。
    pub async fn acquire(&self, account_id: Uuid) -> Result<(), IntegrationError> {
        let bucket = self.bucket(account_id).await?;
        let mut bucket = bucket.lock().await;
        self.roll_over(&mut bucket);

        if bucket.used >= bucket.policy.daily_limit {
            return Err(IntegrationError::QuotaExceeded {
                account_id,
                reset_at: self.next_reset(bucket.day),
            });
        }

        if bucket.policy.enforce_spacing {
            if let Some(next_slot) = bucket.next_slot {
                tokio::time::sleep_until(next_slot).await;
            }
        }

        bucket.used += 1;
        bucket.next_slot = Some(Instant::now() + bucket.policy.request_delay);
        Ok(())
    }

    pub async fn snapshot(&self, account_id: Uuid) -> Option<QuotaSnapshot> {
        let bucket = self.bucket(account_id).await.ok()?;
        let mut bucket = bucket.lock().await;
        self.roll_over(&mut bucket);
        Some(QuotaSnapshot {
            daily_limit: bucket.policy.daily_limit,
            used: bucket.used,
            remaining: bucket.policy.daily_limit.saturating_sub(bucket.used),
            day: bucket.day,
            reset_at: self.next_reset(bucket.day),
        })
    }

    /// pick_rotating は pool_key ごとのラウンドロビンで、当日のクォータが残っている
    /// アカウントを 1 つ選ぶ。クォータは消費しない。
    pub async fn pick_rotating(&self, pool_key: &str, candidates: &[Uuid]) -> Option<Uuid> {
        if candidates.is_empty() {
            return None;
        }
        let mut cursors = self.cursors.lock().await;
        let start = cursors.get(pool_key).copied().unwrap_or(0);
        for offset in 0..candidates.len() {
            let idx = (start + offset) % candidates.len();
            let candidate = candidates[idx];
            let available = self
                .snapshot(candidate)
                .await
                .is_some_and(|s| s.remaining > 0);
            if available {
                cursors.insert(pool_key.to_string(), idx + 1);
                return Some(candidate);
            }
        }
        None
    }

    /// acquire_rotating はラウンドロビンで選んだアカウントの許可を得て、そのアカウント ID を返す。
    /// 全候補が上限に達している場合は最も早くリセットされる候補の QuotaExceeded を返す。
    pub async fn acquire_rotating(
        &self,
        pool_key: &str,
        candidates: &[Uuid],
    ) -> Result<Uuid, IntegrationError> {
        for _ in 0..candidates.len() {
            let Some(account_id) = self.pick_rotating(pool_key, candidates).await else {
                break;
            };
            match self.acquire(account_id).await {
                Ok(()) => return Ok(account_id),
                Err(IntegrationError::QuotaExceeded { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        let mut earliest: Option<(Uuid, DateTime<Utc>)> = None;
        for id in candidates {
            if let Some(s) = self.snapshot(*id).await {
                if earliest.is_none_or(|(_, at)| s.reset_at < at) {
                    earliest = Some((*id, s.reset_at));
                }
            }
        }
        match earliest {
            Some((account_id, reset_at)) => Err(IntegrationError::QuotaExceeded {
                account_id,
                reset_at,
            }),
            None => Err(IntegrationError::AccountUnavailable(
                "no account available for rotation".to_string(),
            )),
        }
    }
}
