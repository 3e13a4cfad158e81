use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::mapping_run::RunStatus;
use super::profile::Profile;

/// MappingStatus はマッピングの状態を表す。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MappingStatus {
    Created,
    InProgress,
    Paused,
    Failed,
    Completed,
}

impl std::fmt::Display for MappingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "CREATED"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Paused => write!(f, "PAUSED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Completed => write!(f, "COMPLETED"),
        }
    }
}

impl MappingStatus {
    pub fn from_str_value(s: &str) -> anyhow::Result<Self> {
        match s {
            "CREATED" => Ok(Self::Created),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "PAUSED" => Ok(Self::Paused),
            "FAILED" => Ok(Self::Failed),
            "COMPLETED" => Ok(Self::Completed),
            _ => anyhow::bail!("invalid mapping status: {}", s),
        }
    }
}

/// SearchCriteria はマッピングの検索条件。未指定の項目は「すべてに一致」を意味する。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchCriteria {
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

fn contains_ci(haystack: Option<&str>, needle: Option<&str>) -> bool {
    match needle.map(str::trim).filter(|n| !n.is_empty()) {
        None => true,
        Some(n) => haystack.is_some_and(|h| h.to_lowercase().contains(&n.to_lowercase())),
    }
}

impl SearchCriteria {
    /// matches は保存済みプロフィールが現在の条件にまだ一致するかを返す（大文字小文字を区別しない部分一致）。
    pub fn matches(&self, profile: &Profile) -> bool {
        contains_ci(profile.job_title.as_deref(), self.job_title.as_deref())
            && contains_ci(profile.company.as_deref(), self.company.as_deref())
            && contains_ci(profile.location.as_deref(), self.country.as_deref())
    }

    /// search_query はスクレイピングジョブに渡す検索語を組み立てる。
    pub fn search_query(&self) -> String {
        [self.job_title.as_deref(), self.company.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Mapping は時間をかけて追跡する保存済み検索定義。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub criteria: SearchCriteria,
    pub status: MappingStatus,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub profiles_count: i64,
    pub runs_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Mapping {
    pub fn new(user_id: String, name: String, criteria: SearchCriteria) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            name,
            criteria,
            status: MappingStatus::Created,
            last_run_at: None,
            next_run_at: None,
            profiles_count: 0,
            runs_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// is_due は定期実行の対象かどうかを返す。
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !matches!(self.status, MappingStatus::Paused | MappingStatus::InProgress)
            && self.next_run_at.is_some_and(|next| next <= now)
    }

    /// begin_run はラン開始を反映する。PAUSED のマッピングを手動実行した場合は PAUSED のまま。
    pub fn begin_run(&mut self, started_at: DateTime<Utc>) {
        if self.status != MappingStatus::Paused {
            self.status = MappingStatus::InProgress;
        }
        self.last_run_at = Some(started_at);
        self.updated_at = Utc::now();
    }

    /// finish_run はラン終了を反映する。実行中に PAUSED にされた場合はその状態を保つ。
    pub fn finish_run(
        &mut self,
        outcome: RunStatus,
        next_run_at: DateTime<Utc>,
        profiles_count: i64,
        runs_count: i64,
    ) {
        if self.status != MappingStatus::Paused {
            self.status = match outcome {
                RunStatus::Completed => MappingStatus::Completed,
                RunStatus::Failed | RunStatus::InProgress => MappingStatus::Failed,
            };
        }
        self.next_run_at = Some(next_run_at);
        self.profiles_count = profiles_count;
        self.runs_count = runs_count;
        self.updated_at = Utc::now();
    }

    /// pause は将来の定期実行のみを止める。実行中のランには影響しない。
    pub fn pause(&mut self) {
        self.status = MappingStatus::Paused;
        self.updated_at = Utc::now();
    }

    /// resume は直近ランの結果から状態を復元し、次回実行を即時に設定する。
    pub fn resume(&mut self, latest_run: Option<RunStatus>, now: DateTime<Utc>) {
        if self.status != MappingStatus::Paused {
            return;
        }
        self.status = match latest_run {
            None => MappingStatus::Created,
            Some(RunStatus::Completed) => MappingStatus::Completed,
            Some(RunStatus::Failed) => MappingStatus::Failed,
            Some(RunStatus::InProgress) => MappingStatus::InProgress,
        };
        self.next_run_at = Some(now);
        self.updated_at = now;
    }
}
