use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Profile はマッピングが発見した外部レコード。(mapping_id, external_id) で一意。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub mapping_id: Uuid,
    pub external_id: String,
    pub name: String,
    pub job_title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub profile_url: Option<String>,
    pub image_url: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    /// 直近のランで離脱と判定された時刻。再発見されると None に戻る。
    pub departed_at: Option<DateTime<Utc>>,
}

/// DiscoveredRecord はスクレイピングジョブや CRM インポートが返す 1 件分の観測値。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredRecord {
    pub external_id: String,
    pub name: String,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub profile_url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl DiscoveredRecord {
    /// normalized は前後空白を除去し、空文字列を None に揃える。
    #[must_use]
    pub fn normalized(self) -> Self {
        Self {
            external_id: self.external_id.trim().to_string(),
            name: self.name.trim().to_string(),
            job_title: non_empty(self.job_title),
            company: non_empty(self.company),
            location: non_empty(self.location),
            profile_url: non_empty(self.profile_url),
            image_url: non_empty(self.image_url),
        }
    }
}

impl Profile {
    pub fn from_record(mapping_id: Uuid, record: DiscoveredRecord, seen_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            mapping_id,
            external_id: record.external_id,
            name: record.name,
            job_title: record.job_title,
            company: record.company,
            location: record.location,
            profile_url: record.profile_url,
            image_url: record.image_url,
            first_seen_at: seen_at,
            last_seen_at: seen_at,
            departed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.departed_at.is_none()
    }

    /// has_job_change は役職または会社が観測値と異なるかを返す。
    pub fn has_job_change(&self, record: &DiscoveredRecord) -> bool {
        self.job_title != record.job_title || self.company != record.company
    }

    /// has_changes は保存済みの可変フィールドのいずれかが観測値と異なるかを返す。
    pub fn has_changes(&self, record: &DiscoveredRecord) -> bool {
        self.has_job_change(record)
            || self.name != record.name
            || self.location != record.location
            || self.profile_url != record.profile_url
            || self.image_url != record.image_url
    }

    /// observe は再発見時に可変フィールドと last_seen を更新し、離脱状態を解除する。
    pub fn observe(&mut self, record: DiscoveredRecord, seen_at: DateTime<Utc>) {
        self.name = record.name;
        self.job_title = record.job_title;
        self.company = record.company;
        self.location = record.location;
        self.profile_url = record.profile_url;
        if record.image_url.is_some() {
            self.image_url = record.image_url;
        }
        self.last_seen_at = seen_at;
        self.departed_at = None;
    }

    /// mark_departed は離脱を記録する。last_seen は最後に観測した時刻のまま残す。
    pub fn mark_departed(&mut self, at: DateTime<Utc>) {
        self.departed_at = Some(at);
    }

    /// first_name / last_name は name を最初の空白で分割して得る。
    pub fn first_name(&self) -> Option<String> {
        self.name
            .split_whitespace()
            .next()
            .map(ToString::to_string)
    }

    pub fn last_name(&self) -> Option<String> {
        let trimmed = self.name.trim();
        trimmed
            .split_once(char::is_whitespace)
            .map(|(_, rest)| rest.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}
