use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{sync::Semaphore, task::JoinHandle};

use crate::{
	engine::executor::{ChunkExecutor, TickOutcome},
	models::{JobId, JobStatus},
	store::{JobStore, StoreError},
};

/// Decides when each job's next chunk runs.
///
/// At most one tick is pending per job: a job's follow-up tick is only
/// enqueued by the tick before it, after that tick has written its progress.
#[derive(Clone)]
pub struct ChunkScheduler {
	inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
	executor: ChunkExecutor,
	jobs: JobStore,
	chunk_delay: Duration,
	permits: Arc<Semaphore>,
	pending: Mutex<HashMap<JobId, JoinHandle<()>>>,
}

impl ChunkScheduler {
	pub fn new(executor: ChunkExecutor, jobs: JobStore, chunk_delay: Duration, max_concurrent_chunks: usize) -> Self {
		ChunkScheduler {
			inner: Arc::new(SchedulerInner {
				executor,
				jobs,
				chunk_delay,
				permits: Arc::new(Semaphore::new(max_concurrent_chunks.max(1))),
				pending: Mutex::new(HashMap::new()),
			}),
		}
	}

	/// Run the job's next chunk right away. Returns `false` if a tick for the
	/// job is already pending, in which case nothing is enqueued.
	pub fn trigger(&self, job_id: JobId) -> bool {
		let mut pending = self.inner.pending.lock();
		if self.inner.permits.is_closed() {
			tracing::debug!(%job_id, "scheduler shut down; not triggering");
			return false;
		}
		if pending.contains_key(&job_id) {
			tracing::debug!(%job_id, "tick already pending");
			return false;
		}
		self.spawn_tick(&mut pending, job_id, Duration::ZERO);
		true
	}

	pub fn is_pending(&self, job_id: &JobId) -> bool {
		self.inner.pending.lock().contains_key(job_id)
	}

	pub fn pending_count(&self) -> usize {
		self.inner.pending.lock().len()
	}

	/// Re-trigger every job still `deleting`, e.g. after a crash or restart.
	/// Returns the number of jobs enqueued.
	pub async fn resume(&self) -> Result<usize, StoreError> {
		let active = self.inner.jobs.list_by_status(JobStatus::Deleting).await?;
		let mut resumed = 0;
		for job in active {
			tracing::info!(job_id = %job.id, deleted_so_far = job.deleted_so_far, remaining = job.remaining(), "resuming job");
			if self.trigger(job.id) {
				resumed += 1;
			}
		}
		Ok(resumed)
	}

	/// Abort every pending tick and refuse new ones. Jobs keep their persisted
	/// progress and stay `deleting`, so a later [`resume`](Self::resume) on a
	/// fresh scheduler continues them.
	pub fn shutdown(&self) {
		let mut pending = self.inner.pending.lock();
		self.inner.permits.close();
		for (job_id, handle) in pending.drain() {
			tracing::debug!(%job_id, "aborting pending tick");
			handle.abort();
		}
	}

	// The pending lock is held while spawning so a fast tick cannot clear its
	// slot before the slot is recorded.
	fn spawn_tick(&self, pending: &mut HashMap<JobId, JoinHandle<()>>, job_id: JobId, delay: Duration) {
		let scheduler = self.clone();
		let id = job_id.clone();
		let handle = tokio::spawn(async move { scheduler.tick(id, delay).await });
		pending.insert(job_id, handle);
	}

	async fn tick(self, job_id: JobId, delay: Duration) {
		if !delay.is_zero() {
			tokio::time::sleep(delay).await;
		}

		let outcome = match self.inner.permits.clone().acquire_owned().await {
			Ok(_permit) => self.inner.executor.run_chunk(&job_id).await,
			Err(_) => {
				tracing::debug!(%job_id, "scheduler closed; dropping tick");
				TickOutcome::Skipped
			}
		};

		let mut pending = self.inner.pending.lock();
		pending.remove(&job_id);
		if outcome.should_reschedule() && !self.inner.permits.is_closed() {
			self.spawn_tick(&mut pending, job_id, self.inner.chunk_delay);
		} else {
			tracing::debug!(%job_id, ?outcome, "job needs no further ticks");
		}
	}
}
