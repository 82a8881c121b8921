use chrono::{DateTime, Utc};
use surrealdb::types::{RecordId, SurrealValue};
use thiserror::Error;

use crate::{
	db::DbHandle,
	models::{DeletionJob, JobId, JobStatus, PlanEntry},
};

// `ORDER BY` must name a projected field, hence `created_nanos`.
const JOB_FIELDS: &str = "id, root_table, root_id, plan, status, deleted_so_far, total_to_delete,
	chunk_size, documents_removed, error,
	time::nano(created_at) AS created_nanos, time::nano(updated_at) AS updated_nanos";

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("chunk size must be at least 1, got {0}")]
	InvalidChunkSize(u64),

	#[error("deletion plan is empty")]
	EmptyPlan,

	#[error("corrupt job record {id}: {reason}")]
	Corrupt { id: String, reason: String },

	#[error("database error: {0}")]
	DbError(String),
}

/// Partial update of a job record. `None` fields are left untouched;
/// `documents_removed` is added to the stored counter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
	pub status: Option<JobStatus>,
	pub deleted_so_far: Option<u64>,
	pub documents_removed: u64,
	pub error: Option<String>,
}

#[derive(Debug, Clone, SurrealValue)]
struct JobRow {
	id: RecordId,
	root_table: String,
	root_id: String,
	plan: Vec<PlanEntry>,
	status: String,
	deleted_so_far: i64,
	total_to_delete: i64,
	chunk_size: i64,
	documents_removed: i64,
	error: Option<String>,
	created_nanos: i64,
	updated_nanos: i64,
}

/// Durable CRUD over `deletion_job` records.
#[derive(Debug, Clone)]
pub struct JobStore {
	db: DbHandle,
}

pub fn validate_chunk_size(chunk_size: u64) -> Result<(), StoreError> {
	if chunk_size == 0 {
		return Err(StoreError::InvalidChunkSize(chunk_size));
	}
	Ok(())
}

impl JobStore {
	pub fn new(db: DbHandle) -> Self {
		JobStore { db }
	}

	/// Persist a new job in `deleting` state with no progress.
	pub async fn create(
		&self,
		root_table: &str,
		root_id: &str,
		plan: Vec<PlanEntry>,
		chunk_size: u64,
	) -> Result<JobId, StoreError> {
		validate_chunk_size(chunk_size)?;
		if plan.is_empty() {
			return Err(StoreError::EmptyPlan);
		}

		let id = JobId::generate();
		let total = plan.len() as i64;

		self.db
			.db
			.query(
				"CREATE $id CONTENT {
                    root_table: $root_table,
                    root_id: $root_id,
                    plan: $plan,
                    status: 'deleting',
                    deleted_so_far: 0,
                    total_to_delete: $total,
                    chunk_size: $chunk_size,
                    documents_removed: 0,
                    error: NONE,
                    created_at: time::now(),
                    updated_at: time::now(),
                }",
			)
			.bind(("id", id.record_id()))
			.bind(("root_table", root_table.to_string()))
			.bind(("root_id", root_id.to_string()))
			.bind(("plan", plan))
			.bind(("total", total))
			.bind(("chunk_size", chunk_size as i64))
			.await
			.map_err(|e| StoreError::DbError(e.to_string()))?
			.check()
			.map_err(|e| StoreError::DbError(e.to_string()))?;

		tracing::info!(job_id = %id, root_table, root_id, total, chunk_size, "deletion job created");
		Ok(id)
	}

	pub async fn get(&self, id: &JobId) -> Result<Option<DeletionJob>, StoreError> {
		let mut response = self
			.db
			.db
			.query(format!("SELECT {JOB_FIELDS} FROM $id"))
			.bind(("id", id.record_id()))
			.await
			.map_err(|e| StoreError::DbError(e.to_string()))?;

		let row: Option<JobRow> = response
			.take(0)
			.map_err(|e| StoreError::DbError(e.to_string()))?;

		row.map(into_job).transpose()
	}

	/// Apply `patch` only while the job is still `deleting`.
	///
	/// Returns `false` when the record is gone or already terminal, in which
	/// case nothing was written.
	pub async fn patch(&self, id: &JobId, patch: JobPatch) -> Result<bool, StoreError> {
		let mut assignments = vec!["updated_at = time::now()"];
		if patch.status.is_some() {
			assignments.push("status = $status");
		}
		if patch.deleted_so_far.is_some() {
			assignments.push("deleted_so_far = $deleted_so_far");
		}
		if patch.documents_removed > 0 {
			assignments.push("documents_removed += $documents_removed");
		}
		if patch.error.is_some() {
			assignments.push("error = $error");
		}

		let sql = format!(
			"UPDATE $id SET {} WHERE status = 'deleting' RETURN VALUE id",
			assignments.join(", ")
		);

		let mut response = self
			.db
			.db
			.query(sql)
			.bind(("id", id.record_id()))
			.bind(("status", patch.status.map(|s| s.as_str().to_string())))
			.bind(("deleted_so_far", patch.deleted_so_far.map(|n| n as i64)))
			.bind(("documents_removed", patch.documents_removed as i64))
			.bind(("error", patch.error))
			.await
			.map_err(|e| StoreError::DbError(e.to_string()))?;

		let updated: Vec<RecordId> = response
			.take(0)
			.map_err(|e| StoreError::DbError(e.to_string()))?;

		Ok(!updated.is_empty())
	}

	/// All jobs, most recently created first.
	pub async fn list_all(&self) -> Result<Vec<DeletionJob>, StoreError> {
		self.select_many(format!("SELECT {JOB_FIELDS} FROM deletion_job ORDER BY created_nanos DESC"), None)
			.await
	}

	pub async fn list_by_status(&self, status: JobStatus) -> Result<Vec<DeletionJob>, StoreError> {
		self.select_many(
			format!("SELECT {JOB_FIELDS} FROM deletion_job WHERE status = $status ORDER BY created_nanos DESC"),
			Some(status),
		)
		.await
	}

	/// The most relevant job for a status display: the newest job still
	/// deleting, otherwise the newest job of any status.
	pub async fn current(&self) -> Result<Option<DeletionJob>, StoreError> {
		let active = self.list_by_status(JobStatus::Deleting).await?;
		if let Some(job) = active.into_iter().next() {
			return Ok(Some(job));
		}

		let mut response = self
			.db
			.db
			.query(format!("SELECT {JOB_FIELDS} FROM deletion_job ORDER BY created_nanos DESC LIMIT 1"))
			.await
			.map_err(|e| StoreError::DbError(e.to_string()))?;

		let row: Option<JobRow> = response
			.take(0)
			.map_err(|e| StoreError::DbError(e.to_string()))?;

		row.map(into_job).transpose()
	}

	/// Remove every job record regardless of status. Pending ticks for removed
	/// jobs find nothing and stop on their own.
	pub async fn delete_all(&self) -> Result<u64, StoreError> {
		let mut response = self
			.db
			.db
			.query("SELECT VALUE id FROM deletion_job; DELETE deletion_job;")
			.await
			.map_err(|e| StoreError::DbError(e.to_string()))?;

		let removed: Vec<RecordId> = response
			.take(0)
			.map_err(|e| StoreError::DbError(e.to_string()))?;
		response.check().map_err(|e| StoreError::DbError(e.to_string()))?;

		tracing::info!(removed = removed.len(), "deletion jobs cleared");
		Ok(removed.len() as u64)
	}

	async fn select_many(&self, sql: String, status: Option<JobStatus>) -> Result<Vec<DeletionJob>, StoreError> {
		let mut query = self.db.db.query(sql);
		if let Some(status) = status {
			query = query.bind(("status", status.as_str().to_string()));
		}

		let mut response = query.await.map_err(|e| StoreError::DbError(e.to_string()))?;

		let rows: Vec<JobRow> = response
			.take(0)
			.map_err(|e| StoreError::DbError(e.to_string()))?;

		rows.into_iter().map(into_job).collect()
	}
}

fn into_job(row: JobRow) -> Result<DeletionJob, StoreError> {
	let id = JobId::from_record_id(&row.id);
	let id_str = id.to_string();
	let corrupt = move |reason: String| StoreError::Corrupt { id: id_str.clone(), reason };

	let status = row.status.parse::<JobStatus>().map_err(|e| corrupt(e.to_string()))?;
	let count = |field: &str, value: i64| {
		u64::try_from(value).map_err(|_| corrupt(format!("{field} is negative: {value}")))
	};

	Ok(DeletionJob {
		root_table: row.root_table,
		root_id: row.root_id,
		deleted_so_far: count("deleted_so_far", row.deleted_so_far)?,
		total_to_delete: count("total_to_delete", row.total_to_delete)?,
		chunk_size: count("chunk_size", row.chunk_size)?,
		documents_removed: count("documents_removed", row.documents_removed)?,
		plan: row.plan,
		status,
		error: row.error,
		created_at: DateTime::<Utc>::from_timestamp_nanos(row.created_nanos),
		updated_at: DateTime::<Utc>::from_timestamp_nanos(row.updated_nanos),
		id,
	})
}
