use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// SyncDirection は同期の方向。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncDirection {
    Import,
    Export,
}

impl std::fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Import => write!(f, "IMPORT"),
            Self::Export => write!(f, "EXPORT"),
        }
    }
}

impl SyncDirection {
    pub fn from_str_value(s: &str) -> anyhow::Result<Self> {
        match s {
            "IMPORT" => Ok(Self::Import),
            "EXPORT" => Ok(Self::Export),
            _ => anyhow::bail!("invalid sync direction: {}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub processed: u32,
    pub successful: u32,
    pub failed: u32,
    pub skipped: u32,
}

impl SyncStats {
    /// processed = successful + failed + skipped を満たすか。
    pub fn is_consistent(&self) -> bool {
        self.processed == self.successful + self.failed + self.skipped
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecordError {
    pub record_id: Option<String>,
    pub error: String,
}

/// SyncTally はバッチ処理中のレコード単位の結果を集計する。
#[derive(Debug, Clone, Default)]
pub struct SyncTally {
    stats: SyncStats,
    errors: Vec<SyncRecordError>,
}

impl SyncTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn success(&mut self) {
        self.stats.processed += 1;
        self.stats.successful += 1;
    }

    pub fn skip(&mut self) {
        self.stats.processed += 1;
        self.stats.skipped += 1;
    }

    pub fn failure(&mut self, record_id: Option<String>, error: impl Into<String>) {
        self.stats.processed += 1;
        self.stats.failed += 1;
        self.errors.push(SyncRecordError {
            record_id,
            error: error.into(),
        });
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    pub fn into_parts(self) -> (SyncStats, Vec<SyncRecordError>) {
        (self.stats, self.errors)
    }
}

/// SyncOperation は CRM アカウントに対する 1 回のインポート/エクスポート。記録後は不変。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    pub id: Uuid,
    pub account_id: Uuid,
    pub user_id: String,
    pub direction: SyncDirection,
    pub success: bool,
    pub message: String,
    pub stats: SyncStats,
    pub errors: Vec<SyncRecordError>,
    pub created_at: DateTime<Utc>,
}

impl SyncOperation {
    /// completed はバッチを最後まで処理した結果を記録する。レコード単位の失敗は errors に残る。
    pub fn completed(
        account_id: Uuid,
        user_id: String,
        direction: SyncDirection,
        tally: SyncTally,
    ) -> Self {
        let (stats, errors) = tally.into_parts();
        let verb = match direction {
            SyncDirection::Import => "imported",
            SyncDirection::Export => "exported",
        };
        let message = if stats.failed == 0 {
            format!(
                "{} of {} records {verb}, {} skipped",
                stats.successful, stats.processed, stats.skipped
            )
        } else {
            format!(
                "{} of {} records {verb}, {} skipped, {} failed",
                stats.successful, stats.processed, stats.skipped, stats.failed
            )
        };
        Self {
            id: Uuid::new_v4(),
            account_id,
            user_id,
            direction,
            success: true,
            message,
            stats,
            errors,
            created_at: Utc::now(),
        }
    }

    /// aborted はバッチ開始前に失敗した操作を記録する。
    pub fn aborted(
        account_id: Uuid,
        user_id: String,
        direction: SyncDirection,
        message: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            user_id,
            direction,
            success: false,
            message: message.clone(),
            stats: SyncStats::default(),
            errors: vec![SyncRecordError {
                record_id: None,
                error: message,
            }],
            created_at: Utc::now(),
        }
    }
}
