use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::error::IntegrationError;

pub const MAX_RESULTS_LIMIT: u32 = 1000;

/// JobType はスクレイピングジョブの種別。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    ProfileSearch,
    CompanyEmployees,
    SingleProfile,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProfileSearch => write!(f, "PROFILE_SEARCH"),
            Self::CompanyEmployees => write!(f, "COMPANY_EMPLOYEES"),
            Self::SingleProfile => write!(f, "SINGLE_PROFILE"),
        }
    }
}

impl JobType {
    pub fn from_str_value(s: &str) -> anyhow::Result<Self> {
        match s {
            "PROFILE_SEARCH" => Ok(Self::ProfileSearch),
            "COMPANY_EMPLOYEES" => Ok(Self::CompanyEmployees),
            "SINGLE_PROFILE" => Ok(Self::SingleProfile),
            _ => anyhow::bail!("invalid job type: {}", s),
        }
    }
}

/// JobStatus はスクレイピングジョブの状態。PENDING → RUNNING → {COMPLETED, FAILED, CANCELLED}。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl JobStatus {
    pub fn from_str_value(s: &str) -> anyhow::Result<Self> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            _ => anyhow::bail!("invalid job status: {}", s),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobFilters {
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub experience: Option<String>,
}

/// JobConfig はジョブの入力。種別ごとに必須項目が異なる。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    #[serde(default)]
    pub search_query: Option<String>,
    #[serde(default)]
    pub company_url: Option<String>,
    #[serde(default)]
    pub profile_url: Option<String>,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default)]
    pub filters: JobFilters,
}

fn default_max_results() -> u32 {
    100
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            search_query: None,
            company_url: None,
            profile_url: None,
            max_results: default_max_results(),
            filters: JobFilters::default(),
        }
    }
}

fn present(value: Option<&String>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

pub(crate) fn require_url(field: &str, value: Option<&String>) -> Result<(), IntegrationError> {
    let Some(raw) = value.filter(|v| !v.trim().is_empty()) else {
        return Err(IntegrationError::validation(format!("{field} is required")));
    };
    let parsed = url::Url::parse(raw.trim())
        .map_err(|e| IntegrationError::validation(format!("{field} is not a valid URL: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(IntegrationError::validation(format!(
            "{field} must be an http(s) URL"
        )));
    }
    Ok(())
}

impl JobConfig {
    pub fn validate(&self, job_type: JobType) -> Result<(), IntegrationError> {
        if self.max_results == 0 || self.max_results > MAX_RESULTS_LIMIT {
            return Err(IntegrationError::validation(format!(
                "max_results must be between 1 and {MAX_RESULTS_LIMIT}"
            )));
        }
        match job_type {
            JobType::ProfileSearch if !present(self.search_query.as_ref()) => Err(
                IntegrationError::validation("search_query is required for PROFILE_SEARCH"),
            ),
            JobType::CompanyEmployees => require_url("company_url", self.company_url.as_ref()),
            JobType::SingleProfile => require_url("profile_url", self.profile_url.as_ref()),
            JobType::ProfileSearch => Ok(()),
        }
    }
}

/// ScrapingJob は 1 アカウントに紐づく発見処理の単位。
///
/// 結果カウンタは単調増加し、常に `scraped + failed <= found` を満たす。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapingJob {
    pub id: Uuid,
    pub account_id: Uuid,
    pub user_id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub config: JobConfig,
    pub found: u32,
    pub scraped: u32,
    pub failed: u32,
    /// FAILED のうち、クォータリセット後などに再投入すれば成功し得るもの。
    pub retryable: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ScrapingJob {
    pub fn new(account_id: Uuid, user_id: String, job_type: JobType, config: JobConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            user_id,
            job_type,
            status: JobStatus::Pending,
            config,
            found: 0,
            scraped: 0,
            failed: 0,
            retryable: false,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn start(&mut self) {
        if self.status == JobStatus::Pending {
            self.status = JobStatus::Running;
            self.started_at = Some(Utc::now());
        }
    }

    /// add_found は発見件数を max_results を上限に加算し、実際に加算した件数を返す。
    pub fn add_found(&mut self, n: u32) -> u32 {
        let room = self.config.max_results.saturating_sub(self.found);
        let added = n.min(room);
        self.found += added;
        added
    }

    /// has_pending_candidates は詳細取得が済んでいない発見済み候補が残っているかを返す。
    pub fn has_pending_candidates(&self) -> bool {
        self.scraped + self.failed < self.found
    }

    pub fn record_scraped(&mut self) {
        if self.has_pending_candidates() {
            self.scraped += 1;
        }
    }

    pub fn record_failed(&mut self) {
        if self.has_pending_candidates() {
            self.failed += 1;
        }
    }

    pub fn complete(&mut self) {
        if !self.is_terminal() {
            self.status = JobStatus::Completed;
            self.completed_at = Some(Utc::now());
        }
    }

    pub fn fail(&mut self, message: String, retryable: bool) {
        if !self.is_terminal() {
            self.status = JobStatus::Failed;
            self.error_message = Some(message);
            self.retryable = retryable;
            self.completed_at = Some(Utc::now());
        }
    }

    /// cancel は CANCELLED に遷移させる。計上済みの途中結果は保持する。
    pub fn cancel(&mut self) {
        if !self.is_terminal() {
            self.status = JobStatus::Cancelled;
            self.completed_at = Some(Utc::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_results: u32) -> JobConfig {
        JobConfig {
            search_query: Some("CTO".into()),
            company_url: None,
            profile_url: None,
            max_results,
            filters: JobFilters::default(),
        }
    }

    #[test]
    fn test_validate_per_job_type() {
        assert!(config(10).validate(JobType::ProfileSearch).is_ok());
        assert!(config(10).validate(JobType::SingleProfile).is_err());
        assert!(config(0).validate(JobType::ProfileSearch).is_err());
        assert!(config(1001).validate(JobType::ProfileSearch).is_err());

        let mut c = config(10);
        c.company_url = Some("ftp://example.com/acme".into());
        assert!(c.validate(JobType::CompanyEmployees).is_err());
        c.company_url = Some("https://www.linkedin.com/company/acme".into());
        assert!(c.validate(JobType::CompanyEmployees).is_ok());
    }

    #[test]
    fn test_unknown_config_key_rejected() {
        let json = serde_json::json!({ "search_query": "CTO", "maxResults": 10 });
        assert!(serde_json::from_value::<JobConfig>(json).is_err());
    }

    #[test]
    fn test_counters_never_exceed_found() {
        let mut job = ScrapingJob::new(Uuid::new_v4(), "u".into(), JobType::ProfileSearch, config(3));
        assert_eq!(job.add_found(5), 3);
        job.record_scraped();
        job.record_failed();
        job.record_scraped();
        job.record_scraped();
        assert_eq!(job.found, 3);
        assert_eq!(job.scraped + job.failed, 3);
        assert_eq!(job.add_found(1), 0);
    }

    #[test]
    fn test_terminal_state_is_sticky() {
        let mut job = ScrapingJob::new(Uuid::new_v4(), "u".into(), JobType::ProfileSearch, config(3));
        job.start();
        assert_eq!(job.status, JobStatus::Running);
        job.cancel();
        job.fail("late".into(), true);
        job.complete();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(!job.retryable);
    }
}
