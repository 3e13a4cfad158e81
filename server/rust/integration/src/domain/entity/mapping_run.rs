use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// RunStatus はマッピングランの状態を表す。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    InProgress,
    Completed,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

impl RunStatus {
    pub fn from_str_value(s: &str) -> anyhow::Result<Self> {
        match s {
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            _ => anyhow::bail!("invalid run status: {}", s),
        }
    }
}

/// RunCounts はランの差分集計。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub total_found: u32,
    pub new_profiles: u32,
    pub departures: u32,
    pub job_changes: u32,
}

/// MappingRun はマッピングの 1 回の実行。COMPLETED / FAILED 以降は変更しない。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingRun {
    pub id: Uuid,
    pub mapping_id: Uuid,
    pub run_date: DateTime<Utc>,
    pub status: RunStatus,
    pub job_id: Option<Uuid>,
    pub counts: RunCounts,
    pub error_message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl MappingRun {
    pub fn start(mapping_id: Uuid, run_date: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            mapping_id,
            run_date,
            status: RunStatus::InProgress,
            job_id: None,
            counts: RunCounts::default(),
            error_message: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != RunStatus::InProgress
    }

    pub fn complete(&mut self, counts: RunCounts) {
        if self.is_terminal() {
            return;
        }
        self.counts = counts;
        self.status = RunStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// fail はスケジューラのエラーメッセージをそのまま保持して FAILED にする。
    pub fn fail(&mut self, message: String) {
        if self.is_terminal() {
            return;
        }
        self.status = RunStatus::Failed;
        self.error_message = Some(message);
        self.completed_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_run_is_immutable() {
        let mut run = MappingRun::start(Uuid::new_v4(), Utc::now());
        run.complete(RunCounts {
            total_found: 3,
            new_profiles: 1,
            departures: 1,
            job_changes: 1,
        });
        run.fail("late failure".into());
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.error_message, None);
        assert_eq!(run.counts.total_found, 3);
    }

    #[test]
    fn test_fail_keeps_message_verbatim() {
        let mut run = MappingRun::start(Uuid::new_v4(), Utc::now());
        run.fail("daily quota exceeded for account 1".into());
        assert_eq!(
            run.error_message.as_deref(),
            Some("daily quota exceeded for account 1")
        );
    }
}
