pub mod job;
pub mod plan;

pub use job::{DeletionJob, JobId, JobStatus};
pub use plan::{DryRunPlan, PlanEntry, PlannedDeletion};
