use std::sync::Arc;

use thiserror::Error;

use crate::{
	models::{JobId, JobStatus},
	store::{DocumentError, DocumentStore, JobPatch, JobStore, StoreError},
};

#[derive(Debug, Error)]
enum ChunkError {
	#[error(transparent)]
	Store(#[from] StoreError),

	#[error("failed to delete {entry}: {source}")]
	Document {
		entry: String,
		#[source]
		source: DocumentError,
	},
}

/// What one tick did to its job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
	/// Job missing or no longer deleting; nothing was touched.
	Skipped,
	/// A chunk was processed and more of the plan remains.
	Continue { deleted_so_far: u64, remaining: u64 },
	/// The final chunk was processed.
	Completed,
	/// The tick hit an unexpected error and the job was marked failed.
	Failed { error: String },
	/// The job left `deleting` while the chunk ran (cancelled or cleared), so
	/// its progress was not recorded.
	Superseded,
	/// The tick failed and the failure could not be recorded either. The job
	/// is still `deleting` with no tick pending until the next resume.
	Stalled { error: String },
}

impl TickOutcome {
	pub fn should_reschedule(&self) -> bool {
		matches!(self, TickOutcome::Continue { .. })
	}
}

/// Runs one chunk of one job per invocation.
#[derive(Clone)]
pub struct ChunkExecutor {
	jobs: JobStore,
	documents: Arc<dyn DocumentStore>,
}

impl ChunkExecutor {
	pub fn new(jobs: JobStore, documents: Arc<dyn DocumentStore>) -> Self {
		ChunkExecutor { jobs, documents }
	}

	/// Process the next chunk of `job_id`.
	///
	/// Never returns an error: anything unexpected is recorded on the job as
	/// `failed` so the caller's loop is not disrupted by one bad job.
	pub async fn run_chunk(&self, job_id: &JobId) -> TickOutcome {
		match self.try_run_chunk(job_id).await {
			Ok(outcome) => outcome,
			Err(err) => {
				let error = err.to_string();
				tracing::error!(%job_id, %error, "chunk failed; marking job failed");

				let patch = JobPatch {
					status: Some(JobStatus::Failed),
					error: Some(error.clone()),
					..Default::default()
				};
				match self.jobs.patch(job_id, patch).await {
					Ok(true) => TickOutcome::Failed { error },
					Ok(false) => TickOutcome::Superseded,
					Err(e) => {
						tracing::error!(
							%job_id,
							%error,
							store_error = %e,
							"could not record job failure; job stalled in deleting until resumed"
						);
						TickOutcome::Stalled { error }
					}
				}
			}
		}
	}

	async fn try_run_chunk(&self, job_id: &JobId) -> Result<TickOutcome, ChunkError> {
		let Some(job) = self.jobs.get(job_id).await? else {
			tracing::debug!(%job_id, "job not found; skipping tick");
			return Ok(TickOutcome::Skipped);
		};
		if job.status != JobStatus::Deleting {
			tracing::debug!(%job_id, status = %job.status, "job not deleting; skipping tick");
			return Ok(TickOutcome::Skipped);
		}

		let chunk = job.next_chunk();
		let mut deleted = 0u64;

		for entry in chunk {
			let found = self
				.documents
				.delete(entry)
				.await
				.map_err(|source| ChunkError::Document { entry: entry.to_string(), source })?;

			if found {
				deleted += 1;
			} else {
				tracing::debug!(%job_id, %entry, "document already absent");
			}
		}

		// Progress counts entries attempted, so a resumed job never re-runs a
		// chunk that was already recorded.
		let processed = job.deleted_so_far + chunk.len() as u64;
		let remaining = (job.plan.len() as u64).saturating_sub(processed);

		let patch = if remaining == 0 {
			JobPatch {
				status: Some(JobStatus::Completed),
				deleted_so_far: Some(job.total_to_delete.max(processed)),
				documents_removed: deleted,
				..Default::default()
			}
		} else {
			JobPatch { deleted_so_far: Some(processed), documents_removed: deleted, ..Default::default() }
		};

		if !self.jobs.patch(job_id, patch).await? {
			tracing::info!(%job_id, deleted, "job left deleting during chunk; progress not recorded");
			return Ok(TickOutcome::Superseded);
		}

		tracing::info!(
			%job_id,
			chunk = chunk.len(),
			deleted,
			deleted_so_far = processed,
			total = job.total_to_delete,
			"chunk processed"
		);

		if remaining == 0 {
			tracing::info!(%job_id, total = job.total_to_delete, "deletion job completed");
			Ok(TickOutcome::Completed)
		} else {
			Ok(TickOutcome::Continue { deleted_so_far: processed, remaining })
		}
	}
}

#[cfg(test)]
mod tests {
	use async_trait::async_trait;
	use parking_lot::Mutex;

	use super::*;
	use crate::{
		db::{self, DbHandle},
		models::PlanEntry,
		store::{documents::record_id, SurrealDocuments},
	};

	async fn seed(db: &DbHandle, entries: &[PlanEntry]) {
		for entry in entries {
			db.db
				.query("CREATE $id CONTENT { seeded: true }")
				.bind(("id", record_id(entry).unwrap()))
				.await
				.unwrap()
				.check()
				.unwrap();
		}
	}

	async fn exists(db: &DbHandle, entry: &PlanEntry) -> bool {
		let mut resp = db
			.db
			.query("SELECT VALUE id FROM $id")
			.bind(("id", record_id(entry).unwrap()))
			.await
			.unwrap();
		let ids: Vec<surrealdb::types::RecordId> = resp.take(0).unwrap();
		!ids.is_empty()
	}

	struct Fixture {
		db: DbHandle,
		jobs: JobStore,
		executor: ChunkExecutor,
	}

	async fn fixture() -> Fixture {
		let db = db::open_memory().await.unwrap();
		let jobs = JobStore::new(db.clone());
		let executor = ChunkExecutor::new(jobs.clone(), Arc::new(SurrealDocuments::new(db.clone())));
		Fixture { db, jobs, executor }
	}

	fn scenario_plan() -> Vec<PlanEntry> {
		vec![PlanEntry::new("a", "1"), PlanEntry::new("a", "2"), PlanEntry::new("b", "1")]
	}

	#[tokio::test]
	async fn three_entry_plan_completes_in_two_ticks() {
		let f = fixture().await;
		let plan = scenario_plan();
		seed(&f.db, &plan).await;
		let id = f.jobs.create("a", "root", plan.clone(), 2).await.unwrap();

		let outcome = f.executor.run_chunk(&id).await;
		assert_eq!(outcome, TickOutcome::Continue { deleted_so_far: 2, remaining: 1 });
		let job = f.jobs.get(&id).await.unwrap().unwrap();
		assert_eq!(job.deleted_so_far, 2);
		assert_eq!(job.status, JobStatus::Deleting);
		assert!(!exists(&f.db, &plan[0]).await);
		assert!(!exists(&f.db, &plan[1]).await);
		assert!(exists(&f.db, &plan[2]).await);

		assert_eq!(f.executor.run_chunk(&id).await, TickOutcome::Completed);
		let job = f.jobs.get(&id).await.unwrap().unwrap();
		assert_eq!(job.deleted_so_far, 3);
		assert_eq!(job.status, JobStatus::Completed);
		assert_eq!(job.documents_removed, 3);
		assert!(!exists(&f.db, &plan[2]).await);
	}

	#[tokio::test]
	async fn ten_entries_in_chunks_of_three() {
		let f = fixture().await;
		let plan: Vec<PlanEntry> = (0..10).map(|i| PlanEntry::new("comment", i.to_string())).collect();
		seed(&f.db, &plan).await;
		let id = f.jobs.create("post", "p1", plan, 3).await.unwrap();

		let mut progress = vec![0];
		loop {
			let outcome = f.executor.run_chunk(&id).await;
			let job = f.jobs.get(&id).await.unwrap().unwrap();
			assert!(job.deleted_so_far >= *progress.last().unwrap());
			assert!(job.deleted_so_far <= job.total_to_delete);
			progress.push(job.deleted_so_far);
			if !outcome.should_reschedule() {
				assert_eq!(outcome, TickOutcome::Completed);
				break;
			}
		}

		assert_eq!(progress, vec![0, 3, 6, 9, 10]);
		let job = f.jobs.get(&id).await.unwrap().unwrap();
		assert_eq!(job.status, JobStatus::Completed);
		assert_eq!(job.deleted_so_far, job.total_to_delete);
	}

	#[tokio::test]
	async fn missing_entry_still_advances_full_chunk() {
		let f = fixture().await;
		let plan = scenario_plan();
		// a:2 was deleted out of band.
		seed(&f.db, &[plan[0].clone(), plan[2].clone()]).await;
		let id = f.jobs.create("a", "root", plan, 2).await.unwrap();

		let outcome = f.executor.run_chunk(&id).await;
		assert_eq!(outcome, TickOutcome::Continue { deleted_so_far: 2, remaining: 1 });

		let job = f.jobs.get(&id).await.unwrap().unwrap();
		assert_eq!(job.deleted_so_far, 2);
		assert_eq!(job.documents_removed, 1);
		assert_eq!(job.status, JobStatus::Deleting);
		assert_eq!(job.error, None);
	}

	#[tokio::test]
	async fn rerun_over_already_deleted_chunk_does_not_fail() {
		let f = fixture().await;
		let plan = scenario_plan();
		// Nothing seeded: as if a previous run deleted the chunk but crashed
		// before recording progress.
		let id = f.jobs.create("a", "root", plan, 2).await.unwrap();

		assert_eq!(
			f.executor.run_chunk(&id).await,
			TickOutcome::Continue { deleted_so_far: 2, remaining: 1 }
		);
		assert_eq!(f.executor.run_chunk(&id).await, TickOutcome::Completed);

		let job = f.jobs.get(&id).await.unwrap().unwrap();
		assert_eq!(job.status, JobStatus::Completed);
		assert_eq!(job.deleted_so_far, 3);
		assert_eq!(job.documents_removed, 0);
	}

	#[tokio::test]
	async fn tick_on_terminal_job_is_a_no_op() {
		let f = fixture().await;
		let id = f.jobs.create("a", "root", scenario_plan(), 2).await.unwrap();
		f.executor.run_chunk(&id).await;
		f.executor.run_chunk(&id).await;
		let before = f.jobs.get(&id).await.unwrap().unwrap();
		assert_eq!(before.status, JobStatus::Completed);

		assert_eq!(f.executor.run_chunk(&id).await, TickOutcome::Skipped);
		assert_eq!(f.jobs.get(&id).await.unwrap().unwrap(), before);
	}

	#[tokio::test]
	async fn tick_on_missing_job_is_a_no_op() {
		let f = fixture().await;
		assert_eq!(f.executor.run_chunk(&JobId::generate()).await, TickOutcome::Skipped);
		assert!(f.jobs.list_all().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn cancel_between_ticks_stops_progress() {
		let f = fixture().await;
		let plan = scenario_plan();
		seed(&f.db, &plan).await;
		let id = f.jobs.create("a", "root", plan.clone(), 2).await.unwrap();

		f.executor.run_chunk(&id).await;
		let cancelled = f
			.jobs
			.patch(&id, JobPatch { status: Some(JobStatus::Cancelled), ..Default::default() })
			.await
			.unwrap();
		assert!(cancelled);

		// Redelivered tick.
		assert_eq!(f.executor.run_chunk(&id).await, TickOutcome::Skipped);

		let job = f.jobs.get(&id).await.unwrap().unwrap();
		assert_eq!(job.status, JobStatus::Cancelled);
		assert_eq!(job.deleted_so_far, 2);
		assert!(exists(&f.db, &plan[2]).await);
	}

	/// Cancels the job from inside the chunk, the way a cancel request racing
	/// an in-flight tick would land.
	struct CancelMidChunk {
		inner: SurrealDocuments,
		jobs: JobStore,
		job: Mutex<Option<JobId>>,
	}

	#[async_trait]
	impl DocumentStore for CancelMidChunk {
		async fn delete(&self, entry: &PlanEntry) -> Result<bool, DocumentError> {
			let job = self.job.lock().take();
			if let Some(job) = job {
				let patch = JobPatch { status: Some(JobStatus::Cancelled), ..Default::default() };
				self.jobs.patch(&job, patch).await.unwrap();
			}
			self.inner.delete(entry).await
		}
	}

	#[tokio::test]
	async fn cancel_racing_an_in_flight_chunk_lets_the_chunk_finish() {
		let f = fixture().await;
		let plan = scenario_plan();
		seed(&f.db, &plan).await;
		let id = f.jobs.create("a", "root", plan.clone(), 2).await.unwrap();

		let racing = CancelMidChunk {
			inner: SurrealDocuments::new(f.db.clone()),
			jobs: f.jobs.clone(),
			job: Mutex::new(Some(id.clone())),
		};
		let executor = ChunkExecutor::new(f.jobs.clone(), Arc::new(racing));

		assert_eq!(executor.run_chunk(&id).await, TickOutcome::Superseded);

		// The in-flight chunk's deletions happened, but the cancelled job
		// records no further progress and is never rescheduled.
		assert!(!exists(&f.db, &plan[0]).await);
		assert!(!exists(&f.db, &plan[1]).await);
		let job = f.jobs.get(&id).await.unwrap().unwrap();
		assert_eq!(job.status, JobStatus::Cancelled);
		assert_eq!(job.deleted_so_far, 0);
		assert_eq!(executor.run_chunk(&id).await, TickOutcome::Skipped);
	}

	struct FailOn {
		inner: SurrealDocuments,
		target: PlanEntry,
	}

	#[async_trait]
	impl DocumentStore for FailOn {
		async fn delete(&self, entry: &PlanEntry) -> Result<bool, DocumentError> {
			if *entry == self.target {
				return Err(DocumentError::DbError("disk on fire".into()));
			}
			self.inner.delete(entry).await
		}
	}

	#[tokio::test]
	async fn unexpected_error_fails_the_job_where_it_stopped() {
		let f = fixture().await;
		let plan = scenario_plan();
		seed(&f.db, &plan).await;
		let id = f.jobs.create("a", "root", plan.clone(), 2).await.unwrap();

		let failing = FailOn { inner: SurrealDocuments::new(f.db.clone()), target: plan[2].clone() };
		let executor = ChunkExecutor::new(f.jobs.clone(), Arc::new(failing));

		assert_eq!(executor.run_chunk(&id).await, TickOutcome::Continue { deleted_so_far: 2, remaining: 1 });

		let outcome = executor.run_chunk(&id).await;
		assert!(matches!(outcome, TickOutcome::Failed { ref error } if error.contains("disk on fire")));
		assert!(!outcome.should_reschedule());

		let job = f.jobs.get(&id).await.unwrap().unwrap();
		assert_eq!(job.status, JobStatus::Failed);
		assert_eq!(job.deleted_so_far, 2);
		assert!(job.error.unwrap().contains("b:1"));

		// Failed jobs are not retried.
		assert_eq!(executor.run_chunk(&id).await, TickOutcome::Skipped);
	}

	#[tokio::test]
	async fn unrecordable_failure_stalls_instead_of_reporting_failed() {
		let f = fixture().await;
		let plan = scenario_plan();
		seed(&f.db, &plan).await;
		let id = f.jobs.create("a", "root", plan.clone(), 2).await.unwrap();

		// Any write of an error message is now rejected by the schema.
		f.db.db
			.query("DEFINE FIELD OVERWRITE error ON deletion_job TYPE option<string> ASSERT $value = NONE")
			.await
			.unwrap()
			.check()
			.unwrap();

		let failing = FailOn { inner: SurrealDocuments::new(f.db.clone()), target: plan[0].clone() };
		let executor = ChunkExecutor::new(f.jobs.clone(), Arc::new(failing));

		let outcome = executor.run_chunk(&id).await;
		assert!(matches!(outcome, TickOutcome::Stalled { ref error } if error.contains("a:1")));
		assert!(!outcome.should_reschedule());

		let job = f.jobs.get(&id).await.unwrap().unwrap();
		assert_eq!(job.status, JobStatus::Deleting);
		assert_eq!(job.deleted_so_far, 0);
		assert_eq!(job.error, None);
	}

	#[tokio::test]
	async fn plan_over_tables_that_do_not_exist_completes() {
		let f = fixture().await;
		let id = f.jobs.create("a", "root", scenario_plan(), 2).await.unwrap();

		assert_eq!(f.executor.run_chunk(&id).await, TickOutcome::Continue { deleted_so_far: 2, remaining: 1 });
		assert_eq!(f.executor.run_chunk(&id).await, TickOutcome::Completed);

		let job = f.jobs.get(&id).await.unwrap().unwrap();
		assert_eq!(job.status, JobStatus::Completed);
		assert_eq!(job.error, None);
	}
}
