use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::types::{RecordId, RecordIdKey};

use super::plan::PlanEntry;

pub const JOB_TABLE: &str = "deletion_job";

/// Identifier of a deletion job (the ULID key of its `deletion_job` record).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        JobId(ulid::Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn record_id(&self) -> RecordId {
        RecordId {
            table: JOB_TABLE.into(),
            key: RecordIdKey::String(self.0.clone()),
        }
    }

    pub fn from_record_id(id: &RecordId) -> Self {
        match &id.key {
            RecordIdKey::String(s) => JobId(s.clone()),
            RecordIdKey::Number(n) => JobId(n.to_string()),
            other => JobId(format!("{other:?}")),
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobId {
    type Err = std::convert::Infallible;

    /// Accepts either the bare key or the full `deletion_job:<key>` form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.strip_prefix("deletion_job:").unwrap_or(s);
        Ok(JobId(key.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Deleting,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Deleting => "deleting",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Deleting)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deleting" => Ok(JobStatus::Deleting),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Durable record of one cascading delete and its progress through the plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletionJob {
    pub id: JobId,
    pub root_table: String,
    pub root_id: String,
    pub plan: Vec<PlanEntry>,
    pub status: JobStatus,
    /// Plan entries processed so far (attempted, not necessarily found).
    pub deleted_so_far: u64,
    pub total_to_delete: u64,
    pub chunk_size: u64,
    /// Entries that actually existed and were removed. Telemetry only.
    pub documents_removed: u64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeletionJob {
    /// The slice of the plan the next tick will process.
    pub fn next_chunk(&self) -> &[PlanEntry] {
        let start = usize::try_from(self.deleted_so_far).unwrap_or(usize::MAX).min(self.plan.len());
        let size = usize::try_from(self.chunk_size).unwrap_or(usize::MAX);
        let end = start.saturating_add(size).min(self.plan.len());
        &self.plan[start..end]
    }

    pub fn remaining(&self) -> u64 {
        self.total_to_delete.saturating_sub(self.deleted_so_far)
    }

    pub fn is_active(&self) -> bool {
        self.status == JobStatus::Deleting
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with(plan_len: usize, deleted_so_far: u64, chunk_size: u64) -> DeletionJob {
        let plan = (0..plan_len)
            .map(|i| PlanEntry::new("post", i.to_string()))
            .collect::<Vec<_>>();
        DeletionJob {
            id: JobId::generate(),
            root_table: "user".into(),
            root_id: "1".into(),
            total_to_delete: plan.len() as u64,
            plan,
            status: JobStatus::Deleting,
            deleted_so_far,
            chunk_size,
            documents_removed: 0,
            error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [JobStatus::Deleting, JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("paused".parse::<JobStatus>().is_err());
    }

    #[test]
    fn only_deleting_is_active() {
        assert!(!JobStatus::Deleting.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn next_chunk_is_bounded_by_chunk_size() {
        let job = job_with(10, 3, 3);
        let chunk: Vec<&str> = job.next_chunk().iter().map(|e| e.document_id.as_str()).collect();
        assert_eq!(chunk, vec!["3", "4", "5"]);
        assert_eq!(job.remaining(), 7);
    }

    #[test]
    fn last_chunk_may_be_short() {
        let job = job_with(10, 9, 3);
        assert_eq!(job.next_chunk().len(), 1);
    }

    #[test]
    fn exhausted_plan_yields_empty_chunk() {
        let job = job_with(4, 4, 3);
        assert!(job.next_chunk().is_empty());
        assert_eq!(job.remaining(), 0);
    }

    #[test]
    fn job_id_parses_record_form() {
        let id: JobId = "deletion_job:01HZX".parse().unwrap();
        assert_eq!(id.as_str(), "01HZX");
        assert_eq!(JobId::from_record_id(&id.record_id()), id);
    }
}
