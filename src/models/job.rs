use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::date::DateRange;

/// Lifecycle of a scrape job.
///
/// `Pending -> Authenticating -> Fetching -> Normalizing -> Done`, with
/// `Failed` reachable from `Authenticating` and `Fetching`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    Pending,
    Authenticating,
    Fetching,
    Normalizing,
    Done,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// `Authenticating -> Authenticating` is the interactive credential retry.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;

        matches!(
            (self, next),
            (Pending, Authenticating)
                | (Authenticating, Authenticating)
                | (Authenticating, Fetching)
                | (Authenticating, Failed)
                | (Fetching, Normalizing)
                | (Fetching, Failed)
                | (Normalizing, Done)
        )
    }
}

/// One progress report from the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    /// 0..=100, never decreasing within a job.
    pub percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressUpdate {
    pub fn new(percent: u8, message: Option<String>) -> Self {
        Self {
            percent: percent.min(100),
            message,
        }
    }
}

/// Why a job ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidCredentials,
    DriverFailure,
}

/// The error a failed job holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// A point-in-time view of a job for status endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: Uuid,
    pub user_id: String,
    pub date_range: DateRange,
    pub state: JobState,
    pub last_progress: Option<ProgressUpdate>,
    pub error: Option<JobFailure>,
    pub transaction_count: Option<usize>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}
