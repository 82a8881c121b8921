use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::{
	config::EngineSettings,
	db::DbHandle,
	engine::{executor::ChunkExecutor, scheduler::ChunkScheduler},
	models::{DeletionJob, JobId, JobStatus},
	planner::{Planner, PlannerError},
	ratelimit::{spawn_cleanup_task, RateLimitError, RateLimiter},
	store::{jobs::validate_chunk_size, DocumentStore, JobPatch, JobStore, StoreError},
};

#[derive(Debug, Error)]
pub enum JobError {
	#[error(transparent)]
	RateLimited(#[from] RateLimitError),

	#[error("invalid request: {0}")]
	Validation(String),

	#[error("planning failed: {0}")]
	Planner(#[from] PlannerError),

	#[error("job store error: {0}")]
	Store(StoreError),
}

impl From<StoreError> for JobError {
	fn from(err: StoreError) -> Self {
		match err {
			StoreError::InvalidChunkSize(_) | StoreError::EmptyPlan => JobError::Validation(err.to_string()),
			other => JobError::Store(other),
		}
	}
}

/// Public surface for starting, cancelling, listing and clearing
/// scheduled cascade deletes.
pub struct JobController<P, R> {
	planner: P,
	limiter: Arc<R>,
	jobs: JobStore,
	scheduler: ChunkScheduler,
	default_chunk_size: u64,
	limiter_cleanup: JoinHandle<()>,
}

impl<P: Planner, R: RateLimiter + 'static> JobController<P, R> {
	/// Must be called from within a tokio runtime: the limiter's periodic
	/// cleanup runs as a background task for the controller's lifetime.
	pub fn new(
		db: DbHandle,
		planner: P,
		limiter: R,
		documents: Arc<dyn DocumentStore>,
		settings: EngineSettings,
	) -> Self {
		let jobs = JobStore::new(db);
		let executor = ChunkExecutor::new(jobs.clone(), documents);
		let scheduler = ChunkScheduler::new(
			executor,
			jobs.clone(),
			settings.chunk_delay,
			settings.max_concurrent_chunks,
		);

		let limiter = Arc::new(limiter);
		let limiter_cleanup = spawn_cleanup_task(limiter.clone(), settings.limiter_cleanup_interval);

		JobController {
			planner,
			limiter,
			jobs,
			scheduler,
			default_chunk_size: settings.default_chunk_size,
			limiter_cleanup,
		}
	}

	/// Plan the cascade for `table:id`, persist it as a new job, and run its
	/// first chunk immediately.
	pub async fn start_scheduled_delete(
		&self,
		table: &str,
		id: &str,
		chunk_size: Option<u64>,
		session_id: &str,
	) -> Result<JobId, JobError> {
		self.limiter.check(session_id)?;

		if table.is_empty() || id.is_empty() {
			return Err(JobError::Validation("table and id are required".into()));
		}
		let chunk_size = chunk_size.unwrap_or(self.default_chunk_size);
		validate_chunk_size(chunk_size)?;

		let dry_run = self.planner.compute_plan(table, id).await?;
		tracing::info!(
			root_table = table,
			root_id = id,
			total = dry_run.plan.len(),
			tables = dry_run.deleted_by_table.len(),
			"cascade planned"
		);

		let job_id = self.jobs.create(table, id, dry_run.into_entries(), chunk_size).await?;
		self.scheduler.trigger(job_id.clone());
		Ok(job_id)
	}

	/// Cancel a job that is still deleting. Cancelling a finished, failed,
	/// already cancelled, or unknown job does nothing.
	///
	/// Cancellation is cooperative: a chunk already in flight finishes its
	/// deletions, but records no progress.
	pub async fn cancel_scheduled_delete(&self, job_id: &JobId, session_id: &str) -> Result<(), JobError> {
		self.limiter.check(session_id)?;

		let patch = JobPatch { status: Some(JobStatus::Cancelled), ..Default::default() };
		if self.jobs.patch(job_id, patch).await? {
			tracing::info!(%job_id, "deletion job cancelled");
		} else {
			tracing::debug!(%job_id, "cancel ignored; job not deleting");
		}
		Ok(())
	}

	/// All jobs, most recently created first.
	pub async fn list_scheduled_jobs(&self) -> Result<Vec<DeletionJob>, JobError> {
		Ok(self.jobs.list_all().await?)
	}

	/// The job a status view should show: the newest deleting job, else the newest job.
	pub async fn current_job(&self) -> Result<Option<DeletionJob>, JobError> {
		Ok(self.jobs.current().await?)
	}

	pub async fn get_job(&self, job_id: &JobId) -> Result<Option<DeletionJob>, JobError> {
		Ok(self.jobs.get(job_id).await?)
	}

	/// Delete every job record, whatever its status. Jobs still deleting are
	/// not cancelled first; their next tick finds no record and stops.
	pub async fn clear_scheduled_jobs(&self, session_id: &str) -> Result<u64, JobError> {
		self.limiter.check(session_id)?;
		Ok(self.jobs.delete_all().await?)
	}

	/// Re-trigger every job left `deleting` by a previous process.
	pub async fn resume_jobs(&self) -> Result<usize, JobError> {
		Ok(self.scheduler.resume().await?)
	}

	/// Poll until the job leaves `deleting`. Returns `None` if the job does
	/// not exist (or was cleared while waiting).
	pub async fn wait_for_job(&self, job_id: &JobId, poll: Duration) -> Result<Option<DeletionJob>, JobError> {
		loop {
			match self.jobs.get(job_id).await? {
				Some(job) if job.status.is_terminal() => return Ok(Some(job)),
				Some(_) => tokio::time::sleep(poll).await,
				None => return Ok(None),
			}
		}
	}

	pub fn shutdown(&self) {
		self.limiter_cleanup.abort();
		self.scheduler.shutdown();
	}
}

impl<P, R> Drop for JobController<P, R> {
	fn drop(&mut self) {
		self.limiter_cleanup.abort();
	}
}
